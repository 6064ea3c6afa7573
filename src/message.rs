/*
 * message.rs
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

//! Message provider: assembles the RFC 5322 headers and MIME body handed
//! to DATA. The session engine never looks inside the payload; this
//! module guarantees the dot-escape boundary rule.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;

use crate::attachments::{Attachment, AttachmentPart};
use crate::smtp::TextEncoding;

/// Everything needed to format one outgoing message. `part` carries a
/// slice of an oversized attachment on follow-up messages; the whole
/// attachment set only rides on the first message.
pub struct OutgoingMessage<'a> {
    pub sender: &'a str,
    pub sender_name: &'a str,
    pub recipient: &'a str,
    pub cc: &'a [String],
    pub subject: &'a str,
    pub text: &'a str,
    pub attachments: &'a [Attachment],
    pub part: Option<&'a AttachmentPart>,
    pub encoding: TextEncoding,
}

/// Format the full message payload, dot-escaped and ready for DATA.
pub fn build_message(msg: &OutgoingMessage<'_>) -> String {
    let mut out = String::new();
    append_header(&mut out, "Date", &Utc::now().to_rfc2822());
    append_header(
        &mut out,
        "From",
        &format!("{} <{}>", msg.sender_name, msg.sender),
    );
    append_header(&mut out, "To", msg.recipient);
    if !msg.cc.is_empty() {
        append_header(&mut out, "Cc", &msg.cc.join(", "));
    }
    append_header(&mut out, "Subject", msg.subject);
    append_header(&mut out, "MIME-Version", "1.0");

    if msg.attachments.is_empty() && msg.part.is_none() {
        append_header(
            &mut out,
            "Content-Type",
            &format!("text/plain; charset={}", msg.encoding.charset()),
        );
        out.push_str("\r\n");
        out.push_str(msg.text);
        out.push_str("\r\n");
        return escape_dots(&out);
    }

    let boundary = make_boundary();
    append_header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{}\"", boundary),
    );
    out.push_str("\r\n");

    out.push_str("--");
    out.push_str(&boundary);
    out.push_str("\r\n");
    append_header(
        &mut out,
        "Content-Type",
        &format!("text/plain; charset={}", msg.encoding.charset()),
    );
    out.push_str("\r\n");
    out.push_str(msg.text);
    out.push_str("\r\n");

    for att in msg.attachments {
        append_attachment_part(&mut out, &boundary, &att.name, &att.content);
    }
    if let Some(part) = msg.part {
        append_attachment_part(&mut out, &boundary, &part.name, &part.content);
    }

    out.push_str("--");
    out.push_str(&boundary);
    out.push_str("--\r\n");
    escape_dots(&out)
}

/// Double any leading `.` so no payload line can be the bare DATA
/// terminator (RFC 5321 section 4.5.2). The session engine relies on this
/// having been done and sends the result verbatim.
pub fn escape_dots(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut at_line_start = true;
    for ch in payload.chars() {
        if at_line_start && ch == '.' {
            out.push('.');
        }
        out.push(ch);
        at_line_start = ch == '\n';
    }
    out
}

fn append_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn append_attachment_part(out: &mut String, boundary: &str, name: &str, content: &[u8]) {
    out.push_str("--");
    out.push_str(boundary);
    out.push_str("\r\n");
    append_header(out, "Content-Type", "application/octet-stream");
    append_header(
        out,
        "Content-Disposition",
        &format!(
            "attachment; filename=\"{}\"",
            name.replace('\\', "\\\\").replace('"', "\\\"")
        ),
    );
    append_header(out, "Content-Transfer-Encoding", "base64");
    out.push_str("\r\n");
    let encoded = BASE64.encode(content);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
}

fn make_boundary() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("_bound_{}_{}", std::process::id(), secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &str) -> String {
        build_message(&OutgoingMessage {
            sender: "me@example.com",
            sender_name: "Me",
            recipient: "you@example.com",
            cc: &[],
            subject: "hi",
            text,
            attachments: &[],
            part: None,
            encoding: TextEncoding::Ascii,
        })
    }

    #[test]
    fn plain_message_has_headers_and_body() {
        let m = plain("Hello there");
        assert!(m.contains("From: Me <me@example.com>\r\n"));
        assert!(m.contains("To: you@example.com\r\n"));
        assert!(m.contains("Subject: hi\r\n"));
        assert!(m.contains("Content-Type: text/plain; charset=us-ascii\r\n"));
        assert!(m.ends_with("Hello there\r\n"));
    }

    #[test]
    fn utf8_encoding_selects_utf8_charset() {
        let m = build_message(&OutgoingMessage {
            sender: "me@example.com",
            sender_name: "Me",
            recipient: "you@example.com",
            cc: &[],
            subject: "hi",
            text: "привет",
            attachments: &[],
            part: None,
            encoding: TextEncoding::Utf8,
        });
        assert!(m.contains("charset=utf-8"));
    }

    #[test]
    fn cc_header_joins_addresses() {
        let m = build_message(&OutgoingMessage {
            sender: "me@example.com",
            sender_name: "Me",
            recipient: "you@example.com",
            cc: &["a@x.com".to_string(), "b@y.com".to_string()],
            subject: "hi",
            text: "t",
            attachments: &[],
            part: None,
            encoding: TextEncoding::Ascii,
        });
        assert!(m.contains("Cc: a@x.com, b@y.com\r\n"));
    }

    #[test]
    fn leading_dots_are_escaped() {
        let m = plain(".\r\nmiddle\r\n.trailing");
        assert!(m.contains("..\r\nmiddle\r\n..trailing"));
        assert!(!m.contains("\r\n.\r\n"));
    }

    #[test]
    fn escape_dots_only_touches_line_starts() {
        assert_eq!(escape_dots("a.b\r\n.c"), "a.b\r\n..c");
        assert_eq!(escape_dots(".start"), "..start");
        assert_eq!(escape_dots("no dots"), "no dots");
    }

    #[test]
    fn attachment_is_base64_with_disposition() {
        let att = Attachment {
            name: "data.bin".to_string(),
            content: vec![0u8, 1, 2, 3],
        };
        let m = build_message(&OutgoingMessage {
            sender: "me@example.com",
            sender_name: "Me",
            recipient: "you@example.com",
            cc: &[],
            subject: "hi",
            text: "see attached",
            attachments: std::slice::from_ref(&att),
            part: None,
            encoding: TextEncoding::Ascii,
        });
        assert!(m.contains("multipart/mixed"));
        assert!(m.contains("Content-Disposition: attachment; filename=\"data.bin\"\r\n"));
        assert!(m.contains(&BASE64.encode(&att.content)));
    }
}
