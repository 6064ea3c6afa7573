/*
 * batch.rs
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

//! Batch controller: walks a recipient file, delivers one message per
//! recipient group, and persists a resumable checkpoint (position plus
//! retry queue) so a crash or interrupt never loses the whole batch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};

use crate::observer::Observer;
use crate::smtp::{SmtpError, SmtpResult};

/// Checkpoint is written every this many recipient groups; on resume up
/// to cadence-1 groups may be redelivered, which is accepted.
const SAVE_CADENCE: u32 = 10;

/// Most addresses one grouped-BCC envelope may carry.
const BCC_LIMIT: usize = 15;

static ADDRESS_SHAPE: OnceLock<Regex> = OnceLock::new();

/// Loose `token@token` shape check, anchored at the start of the line;
/// anything else is silently skipped.
fn address_shape() -> &'static Regex {
    ADDRESS_SHAPE.get_or_init(|| Regex::new(r"^\S+@\S+").expect("static pattern"))
}

/// Persisted batch progress. `position` is a byte offset into the
/// recipient file and always lands on a fully-consumed line boundary.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub position: u64,
    pub retry: Vec<String>,
}

/// Checkpoint file with atomic replace: serialize to a sibling temp file,
/// then rename over the previous checkpoint.
pub struct Checkpoint {
    path: PathBuf,
    temp: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let temp = path.with_extension("tmp");
        Self { path, temp }
    }

    /// Missing, empty, or malformed checkpoints all load as the default
    /// state; the batch simply restarts from the beginning.
    pub async fn load(&self) -> BatchState {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => serde_json::from_str(&body).unwrap_or_default(),
            Err(_) => BatchState::default(),
        }
    }

    pub async fn save(&self, state: &BatchState) -> SmtpResult<()> {
        let body =
            serde_json::to_string(state).map_err(|e| SmtpError::Transfer(e.to_string()))?;
        tokio::fs::write(&self.temp, body)
            .await
            .map_err(|e| SmtpError::Transfer(e.to_string()))?;
        tokio::fs::rename(&self.temp, &self.path)
            .await
            .map_err(|e| SmtpError::Transfer(e.to_string()))
    }

    /// The checkpoint's absence signals that no resumable batch is
    /// pending, so removal failure is ignored.
    pub async fn remove(&self) {
        let _ = tokio::fs::remove_file(&self.path).await;
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }
}

/// Delivery of one message to a recipient group; injected so tests can
/// script failures without a server.
#[allow(async_fn_in_trait)]
pub trait Deliver {
    /// `primary` is the group's first recipient (the one queued for retry
    /// on failure); `group` is the full envelope recipient list.
    async fn deliver(&mut self, primary: &str, group: &[String]) -> SmtpResult<()>;
}

/// Iterates the recipient file once, then drains the retry queue.
pub struct BatchSender {
    recipients: PathBuf,
    checkpoint: Checkpoint,
    state: BatchState,
    group_bcc: bool,
    cadence: u32,
    interrupted: Arc<AtomicBool>,
    observer: Arc<dyn Observer>,
}

impl BatchSender {
    pub fn new(
        recipients: impl Into<PathBuf>,
        checkpoint: impl Into<PathBuf>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            recipients: recipients.into(),
            checkpoint: Checkpoint::new(checkpoint),
            state: BatchState::default(),
            group_bcc: false,
            cadence: SAVE_CADENCE,
            interrupted: Arc::new(AtomicBool::new(false)),
            observer,
        }
    }

    /// Group contiguous follow-on lines after a primary recipient into one
    /// envelope (up to the BCC limit). Default off.
    pub fn set_group_bcc(&mut self, on: bool) -> &mut Self {
        self.group_bcc = on;
        self
    }

    /// Checkpoint write cadence in groups. Default 10.
    pub fn set_save_cadence(&mut self, every: u32) -> &mut Self {
        self.cadence = every.max(1);
        self
    }

    /// External interrupt flag; when set, `broadcast` persists the
    /// checkpoint at the next group boundary and returns.
    pub fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>) -> &mut Self {
        self.interrupted = flag;
        self
    }

    /// Restore persisted progress. Any read or parse failure means "no
    /// checkpoint": the batch restarts from the beginning.
    pub async fn load(&mut self) {
        self.state = self.checkpoint.load().await;
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    async fn persist(&self) {
        if let Err(e) = self.checkpoint.save(&self.state).await {
            self.observer
                .warning(&format!("could not save checkpoint: {}", e));
        }
    }

    /// Primary pass over the recipient file from the persisted position,
    /// then the retry drain. Delivery failures queue the primary recipient
    /// for retry and never abort the batch; only local I/O on the
    /// recipient file itself is fatal. The retry drain pops the most
    /// recent failure first and pushes renewed failures back, with no
    /// backoff and no attempt cap, so a downed server loops until
    /// interrupted.
    pub async fn broadcast<D: Deliver>(&mut self, deliver: &mut D) -> SmtpResult<()> {
        let mut file = tokio::fs::File::open(&self.recipients)
            .await
            .map_err(|e| SmtpError::Transfer(e.to_string()))?;
        file.seek(SeekFrom::Start(self.state.position))
            .await
            .map_err(|e| SmtpError::Transfer(e.to_string()))?;
        let mut reader = BufReader::new(file);
        let mut offset = self.state.position;
        let mut before_save = self.cadence;

        loop {
            if self.interrupted() {
                self.persist().await;
                self.observer.warning("interrupted; batch progress saved");
                return Ok(());
            }
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| SmtpError::Transfer(e.to_string()))?;
            if n == 0 {
                break;
            }
            offset += n as u64;
            let recipient = line.trim_end_matches(['\r', '\n']);
            if recipient.is_empty() {
                break;
            }
            if !address_shape().is_match(recipient) {
                continue;
            }

            let mut group = vec![recipient.to_string()];
            if self.group_bcc {
                while group.len() < BCC_LIMIT {
                    let mut extra = String::new();
                    let n = reader
                        .read_line(&mut extra)
                        .await
                        .map_err(|e| SmtpError::Transfer(e.to_string()))?;
                    if n == 0 {
                        break;
                    }
                    offset += n as u64;
                    let extra = extra.trim_end_matches(['\r', '\n']);
                    if extra.is_empty() {
                        break;
                    }
                    group.push(extra.to_string());
                }
            }

            match deliver.deliver(&group[0], &group).await {
                Ok(()) => self.observer.info(&format!("sent to {}", group[0])),
                Err(e) => {
                    self.observer
                        .warning(&format!("delivery to {} failed: {}", group[0], e));
                    self.state.retry.push(group[0].clone());
                }
            }
            self.state.position = offset;
            before_save -= 1;
            if before_save == 0 {
                before_save = self.cadence;
                self.persist().await;
            }
        }

        while let Some(recipient) = self.state.retry.pop() {
            if self.interrupted() {
                self.state.retry.push(recipient);
                self.persist().await;
                self.observer.warning("interrupted; batch progress saved");
                return Ok(());
            }
            let group = vec![recipient.clone()];
            match deliver.deliver(&recipient, &group).await {
                Ok(()) => self.observer.info(&format!("sent to {}", recipient)),
                Err(e) => {
                    self.observer
                        .warning(&format!("retry of {} failed: {}", recipient, e));
                    self.state.retry.push(recipient);
                }
            }
        }

        self.checkpoint.remove().await;
        self.observer.info("batch complete");
        Ok(())
    }
}
