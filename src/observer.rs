/*
 * observer.rs
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

//! Observer capability injected into the session engine and the batch
//! controller at construction; tests swap in recording or no-op
//! implementations instead of relying on a process-wide logger.

/// Receives diagnostics from the session engine and the batch controller.
/// All methods default to no-ops so implementations pick what they need.
pub trait Observer: Send + Sync {
    fn info(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    /// A protocol command line as written to the wire (credentials redacted).
    fn command(&self, _line: &str) {}
    /// A protocol response line as read from the wire.
    fn response(&self, _line: &str) {}
}

/// Discards every event.
pub struct NullObserver;

impl Observer for NullObserver {}

/// Bridges observer events to `tracing`; the verbosity flag on the CLI
/// decides whether the wire-level events are visible.
pub struct LogObserver;

impl Observer for LogObserver {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn command(&self, line: &str) {
        tracing::debug!(">> {}", line);
    }

    fn response(&self, line: &str) {
        tracing::debug!("<< {}", line);
    }
}
