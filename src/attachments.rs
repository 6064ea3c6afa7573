/*
 * attachments.rs
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

//! Attachment handling: loading from disk, bundling into a zip archive,
//! and splitting oversized files into cap-sized parts that go out as
//! separate follow-up messages.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipWriter;

use crate::observer::Observer;
use crate::smtp::{SmtpError, SmtpResult};

/// One whole attachment, carried on the first message.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

/// One cap-sized slice of an oversized attachment. Parts are keyed by
/// `(name, index)` so the receiver can reassemble them in order.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPart {
    pub name: String,
    pub index: usize,
    pub content: Vec<u8>,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Load attachment contents. A file that cannot be read is reported to
/// the observer and skipped; it never aborts the send.
pub async fn open_attachments(
    paths: &[PathBuf],
    named: &[(PathBuf, String)],
    observer: &dyn Observer,
) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    for path in paths {
        match tokio::fs::read(path).await {
            Ok(content) => attachments.push(Attachment {
                name: display_name(path),
                content,
            }),
            Err(e) => observer.warning(&format!(
                "could not open attachment {}: {}",
                path.display(),
                e
            )),
        }
    }
    for (path, name) in named {
        match tokio::fs::read(path).await {
            Ok(content) => attachments.push(Attachment {
                name: name.clone(),
                content,
            }),
            Err(e) => observer.warning(&format!(
                "could not open attachment {}: {}",
                path.display(),
                e
            )),
        }
    }
    attachments
}

/// Replace the whole attachment set with a single in-memory
/// `attachments.zip` archive containing every attachment.
pub fn zip_attachments(attachments: &mut Vec<Attachment>) -> SmtpResult<()> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for att in attachments.iter() {
        writer
            .start_file(att.name.as_str(), options)
            .map_err(|e| SmtpError::Transfer(e.to_string()))?;
        writer
            .write_all(&att.content)
            .map_err(|e| SmtpError::Transfer(e.to_string()))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| SmtpError::Transfer(e.to_string()))?;
    attachments.clear();
    attachments.push(Attachment {
        name: "attachments.zip".to_string(),
        content: cursor.into_inner(),
    });
    Ok(())
}

/// Split attachments larger than `cap` bytes into cap-sized parts,
/// removing them from the whole set. The final part is the non-empty
/// remainder; a trailing zero-length part is never produced. Attachments
/// at or under the cap stay whole. A cap of zero disables splitting.
pub fn split_attachments(attachments: &mut Vec<Attachment>, cap: usize) -> Vec<AttachmentPart> {
    if cap == 0 {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut kept = Vec::new();
    for att in attachments.drain(..) {
        if att.content.len() <= cap {
            kept.push(att);
            continue;
        }
        for (index, chunk) in att.content.chunks(cap).enumerate() {
            parts.push(AttachmentPart {
                name: att.name.clone(),
                index,
                content: chunk.to_vec(),
            });
        }
    }
    *attachments = kept;
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 2_097_152;

    fn att(name: &str, len: usize) -> Attachment {
        let content = (0..len).map(|i| (i % 251) as u8).collect();
        Attachment {
            name: name.to_string(),
            content,
        }
    }

    #[test]
    fn oversized_file_splits_into_cap_and_remainder() {
        let original = att("big", 2_099_152);
        let mut set = vec![original.clone()];
        let parts = split_attachments(&mut set, CAP);
        assert!(set.is_empty());
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content.len(), CAP);
        assert_eq!(parts[1].content.len(), 2_099_152 - CAP);
        assert_eq!((parts[0].index, parts[1].index), (0, 1));

        let mut rebuilt = Vec::new();
        for part in &parts {
            rebuilt.extend_from_slice(&part.content);
        }
        assert_eq!(rebuilt, original.content);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_part() {
        let mut set = vec![att("even", CAP * 2)];
        let parts = split_attachments(&mut set, CAP);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| !p.content.is_empty()));
    }

    #[test]
    fn file_at_cap_stays_whole() {
        let mut set = vec![att("fits", CAP)];
        let parts = split_attachments(&mut set, CAP);
        assert!(parts.is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn zero_cap_disables_splitting() {
        let mut set = vec![att("big", CAP + 1)];
        let parts = split_attachments(&mut set, 0);
        assert!(parts.is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn mixed_set_splits_only_oversized() {
        let mut set = vec![att("big", CAP + 10), att("small", 10)];
        let parts = split_attachments(&mut set, CAP);
        assert_eq!(parts.len(), 2);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].name, "small");
        assert!(parts.iter().all(|p| p.name == "big"));
    }

    #[test]
    fn zip_replaces_set_with_single_archive() {
        let mut set = vec![att("a.txt", 64), att("b.txt", 32)];
        zip_attachments(&mut set).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].name, "attachments.zip");

        let reader = std::io::Cursor::new(set[0].content.clone());
        let mut archive = zip::ZipArchive::new(reader).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
