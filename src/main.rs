/*
 * main.rs
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

//! Process entry: argument parsing, logging setup, a current-thread
//! runtime (all sends are strictly sequential), and dispatch to the
//! single-message or batch path. Any failure is reported as a single-line
//! diagnostic with a nonzero exit.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use postino::batch::BatchSender;
use postino::cli::Args;
use postino::observer::{LogObserver, Observer};
use postino::send;
use postino::send::SmtpDeliver;
use postino::smtp::{SmtpError, SmtpResult};

const CHECKPOINT_FILE: &str = "backup.json";

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("postino: could not start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("postino: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> SmtpResult<()> {
    let observer: Arc<dyn Observer> = Arc::new(LogObserver);
    let password = args
        .resolve_password()
        .map_err(|e| SmtpError::Transfer(e.to_string()))?;
    let body = args
        .resolve_body()
        .await
        .map_err(|e| SmtpError::Transfer(e.to_string()))?;

    // ctrl-c flips the flag; the batch loop saves its checkpoint at the
    // next group boundary and exits cleanly.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    if let Some(ref recipients) = args.batch {
        let mut batch = BatchSender::new(recipients.clone(), CHECKPOINT_FILE, Arc::clone(&observer));
        batch
            .set_group_bcc(args.batch_bcc)
            .set_interrupt_flag(interrupted);
        batch.load().await;
        let mut deliver = SmtpDeliver {
            args: &args,
            password: &password,
            body: &body,
            observer: Arc::clone(&observer),
        };
        batch.broadcast(&mut deliver).await
    } else {
        let primary = args
            .recipient
            .clone()
            .ok_or_else(|| SmtpError::Transfer("no recipient given".to_string()))?;
        let group = vec![primary.clone()];
        send::run(&args, &password, &body, &primary, &group, &observer).await
    }
}
