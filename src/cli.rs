/*
 * cli.rs
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

//! Command-line surface and resolution of prompted or file-backed values
//! (password, letter text).

use std::io;
use std::io::BufRead as _;
use std::io::Read as _;
use std::io::Write as _;
use std::path::PathBuf;

use clap::Parser;

/// Send email via SMTP.
#[derive(Parser, Debug)]
#[command(name = "postino", version, about = "Send email via SMTP.")]
pub struct Args {
    /// SMTP server address
    #[arg(long)]
    pub host: String,

    /// SMTP server port
    #[arg(short, long, default_value_t = 587)]
    pub port: u16,

    /// Mailbox name
    #[arg(short, long)]
    pub login: String,

    /// Mailbox password (prompted when omitted)
    #[arg(long)]
    pub password: Option<String>,

    /// Sender address
    #[arg(short, long)]
    pub sender: String,

    /// Sender display name (defaults to the sender address)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Recipient address
    #[arg(short, long, required_unless_present = "batch")]
    pub recipient: Option<String>,

    /// Letter subject
    #[arg(long, default_value = "")]
    pub subject: String,

    /// Letter text content
    #[arg(short, long)]
    pub text: Option<String>,

    /// Read the letter text from a file (stdin when neither this nor
    /// --text is given)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Carbon-copy address (repeatable)
    #[arg(short, long)]
    pub cc: Vec<String>,

    /// Attach a file (repeatable)
    #[arg(short, long)]
    pub attachment: Vec<PathBuf>,

    /// Attach a file under a display name (repeatable)
    #[arg(long, num_args = 2, value_names = ["PATH", "NAME"])]
    pub named_attachment: Vec<String>,

    /// Bundle all attachments into one zip archive
    #[arg(long)]
    pub zip: bool,

    /// Split attachments larger than this many bytes across follow-up
    /// messages (0 disables splitting)
    #[arg(long, default_value_t = 0)]
    pub max_file_size: usize,

    /// Disable the STARTTLS upgrade
    #[arg(long)]
    pub no_ssl: bool,

    /// Broadcast to every address in this recipient file
    #[arg(short, long)]
    pub batch: Option<PathBuf>,

    /// Treat contiguous lines after a primary recipient as BCC for one
    /// envelope
    #[arg(long)]
    pub batch_bcc: bool,

    /// Log the protocol conversation
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn sender_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sender)
    }

    /// Flattened `--named-attachment PATH NAME` pairs.
    pub fn named_attachments(&self) -> Vec<(PathBuf, String)> {
        self.named_attachment
            .chunks(2)
            .filter_map(|pair| match pair {
                [path, name] => Some((PathBuf::from(path), name.clone())),
                _ => None,
            })
            .collect()
    }

    /// The password flag, or one line read from stdin.
    pub fn resolve_password(&self) -> io::Result<String> {
        if let Some(ref password) = self.password {
            return Ok(password.clone());
        }
        eprint!("Password: ");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Letter text: the flag, the file, or stdin to EOF.
    pub async fn resolve_body(&self) -> io::Result<String> {
        if let Some(ref text) = self.text {
            return Ok(text.clone());
        }
        if let Some(ref file) = self.file {
            return tokio::fs::read_to_string(file).await;
        }
        let mut body = String::new();
        io::stdin().lock().read_to_string(&mut body)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_single_send_args_parse() {
        let args = Args::parse_from([
            "postino",
            "--host",
            "smtp.example.com",
            "-l",
            "user",
            "-s",
            "me@example.com",
            "-r",
            "you@example.com",
        ]);
        assert_eq!(args.port, 587);
        assert_eq!(args.sender_name(), "me@example.com");
        assert!(!args.no_ssl);
        assert_eq!(args.max_file_size, 0);
    }

    #[test]
    fn recipient_not_required_in_batch_mode() {
        let args = Args::parse_from([
            "postino",
            "--host",
            "smtp.example.com",
            "-l",
            "user",
            "-s",
            "me@example.com",
            "-b",
            "recipients.txt",
            "--batch-bcc",
        ]);
        assert!(args.recipient.is_none());
        assert!(args.batch.is_some());
        assert!(args.batch_bcc);
    }

    #[test]
    fn named_attachments_pair_up() {
        let args = Args::parse_from([
            "postino",
            "--host",
            "h",
            "-l",
            "u",
            "-s",
            "a@b",
            "-r",
            "c@d",
            "--named-attachment",
            "/tmp/report.pdf",
            "Q3 report",
        ]);
        assert_eq!(
            args.named_attachments(),
            vec![(PathBuf::from("/tmp/report.pdf"), "Q3 report".to_string())]
        );
    }
}
