/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postino, a command-line SMTP mailer.
 *
 * Postino is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postino is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postino.  If not, see <http://www.gnu.org/licenses/>.
 */

//! SMTP session engine: error taxonomy, session knobs, negotiated text
//! encoding. The protocol machinery itself lives in `session`.

pub mod session;

pub use session::SmtpSession;

use std::fmt;
use std::io;
use std::time::Duration;

/// Errors surfaced by the session engine and its callers.
#[derive(Debug)]
pub enum SmtpError {
    /// Connect or receive retries exhausted; the server never answered.
    ServerUnavailable(String),
    /// The server answered with an unexpected status code; the raw
    /// response line is attached.
    Protocol(String),
    /// Local I/O failure: reading an attachment, writing the checkpoint.
    Transfer(String),
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpError::ServerUnavailable(m) => write!(f, "server unavailable: {}", m),
            SmtpError::Protocol(r) => write!(f, "unexpected server response: {}", r),
            SmtpError::Transfer(m) => write!(f, "transfer failed: {}", m),
        }
    }
}

impl std::error::Error for SmtpError {}

impl From<io::Error> for SmtpError {
    fn from(e: io::Error) -> Self {
        SmtpError::Transfer(e.to_string())
    }
}

pub type SmtpResult<T> = Result<T, SmtpError>;

/// Per-operation socket timeout and retry budget. The retry budget bounds
/// total blocking time per logical operation to roughly retries x timeout.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 3,
        }
    }
}

/// Text encoding negotiated for the conversation: ASCII unless the server
/// advertises SMTPUTF8 during the STARTTLS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Ascii,
    Utf8,
}

impl TextEncoding {
    /// MIME charset token for message bodies in this encoding.
    pub fn charset(self) -> &'static str {
        match self {
            TextEncoding::Ascii => "us-ascii",
            TextEncoding::Utf8 => "utf-8",
        }
    }
}
