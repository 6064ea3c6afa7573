/*
 * lib.rs
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

//! Postino sends email over SMTP from the command line: single messages,
//! resumable batch broadcasts, MIME attachments with optional zip
//! bundling and oversize splitting across follow-up messages.

pub mod attachments;
pub mod batch;
pub mod cli;
pub mod message;
pub mod net;
pub mod observer;
pub mod send;
pub mod smtp;
