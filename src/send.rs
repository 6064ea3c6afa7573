/*
 * send.rs
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

//! Single-delivery pipeline: prepare attachments (zip, split), then send
//! the first message plus one follow-up message per attachment part, each
//! over its own SMTP session.

use std::sync::Arc;

use crate::attachments::{open_attachments, split_attachments, zip_attachments, Attachment, AttachmentPart};
use crate::batch::Deliver;
use crate::cli::Args;
use crate::message::{build_message, OutgoingMessage};
use crate::observer::Observer;
use crate::smtp::{SessionConfig, SmtpResult, SmtpSession};

/// Deliver one full message (with follow-up part messages) to `primary`;
/// `group` holds the grouped-BCC envelope when batch BCC mode is on.
pub async fn run(
    args: &Args,
    password: &str,
    body: &str,
    primary: &str,
    group: &[String],
    observer: &Arc<dyn Observer>,
) -> SmtpResult<()> {
    let named = args.named_attachments();
    let mut attachments = open_attachments(&args.attachment, &named, &**observer).await;
    if args.zip && !attachments.is_empty() {
        zip_attachments(&mut attachments)?;
    }
    let parts = split_attachments(&mut attachments, args.max_file_size);

    send_one(args, password, primary, group, &args.subject, body, &attachments, None, observer)
        .await?;
    for (i, part) in parts.iter().enumerate() {
        let subject = format!("{} - {}", args.subject, i + 2);
        send_one(
            args,
            password,
            primary,
            group,
            &subject,
            "Letter continuation.",
            &[],
            Some(part),
            observer,
        )
        .await?;
    }
    Ok(())
}

/// One SMTP conversation: connect, greet, optional STARTTLS, AUTH LOGIN,
/// envelope, body, QUIT. On any failure the socket is abandoned by
/// dropping the session.
#[allow(clippy::too_many_arguments)]
async fn send_one(
    args: &Args,
    password: &str,
    primary: &str,
    group: &[String],
    subject: &str,
    text: &str,
    attachments: &[Attachment],
    part: Option<&AttachmentPart>,
    observer: &Arc<dyn Observer>,
) -> SmtpResult<()> {
    let mut session = SmtpSession::connect(
        &args.host,
        args.port,
        SessionConfig::default(),
        Arc::clone(observer),
    )
    .await?;
    session.greet().await?;
    if !args.no_ssl {
        session.secure().await?;
    }
    session.authenticate(&args.login, password).await?;
    session.set_sender(&args.sender).await?;
    session.add_recipient(primary).await?;
    for cc in &args.cc {
        session.add_recipient(cc).await?;
    }
    for bcc in group.iter().skip(1) {
        session.add_recipient(bcc).await?;
    }

    let payload = build_message(&OutgoingMessage {
        sender: &args.sender,
        sender_name: args.sender_name(),
        recipient: primary,
        cc: &args.cc,
        subject,
        text,
        attachments,
        part,
        encoding: session.encoding(),
    });
    session.send_body(&payload).await?;
    session.disconnect().await;
    Ok(())
}

/// Adapter that lets the batch controller drive the single-delivery
/// pipeline for each recipient group.
pub struct SmtpDeliver<'a> {
    pub args: &'a Args,
    pub password: &'a str,
    pub body: &'a str,
    pub observer: Arc<dyn Observer>,
}

impl Deliver for SmtpDeliver<'_> {
    async fn deliver(&mut self, primary: &str, group: &[String]) -> SmtpResult<()> {
        run(self.args, self.password, self.body, primary, group, &self.observer).await
    }
}
