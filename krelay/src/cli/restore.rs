//! `krelay restore`: runs the restore engine in-process with a progress bar.
//!
//! Ctrl-C requests a stop; the job ends after the license in flight.

use std::{
    io::{self, IsTerminal},
    time::Duration,
};

use anyhow::{Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use keyrelay::prelude::*;
use tracing::{info, warn};

use crate::{
    cli::{AppContext, RestoreArgs, backup::read_backup, require_confirm},
    output::OutputFormat,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub async fn handle(ctx: &AppContext, args: RestoreArgs) -> Result<()> {
    if args.wipe {
        require_confirm(args.confirm, "wipe licenses and users")?;
    }
    let (records, format) = read_backup(ctx, &args.file)?;
    info!(%format, count = records.len(), "loaded {}", args.file.display());

    let config = RestoreConfig::default().item_delay(Duration::from_millis(args.item_delay));
    let engine = RestoreEngine::new(ctx.client.clone(), config);
    let ack = engine.start(RestoreRequest::new(records).wipe(args.wipe))?;
    let status = engine.reporter();

    let stopper = status.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted: stopping after the current license");
            stopper.request_stop();
        }
    });

    let progress = RestoreProgress::new(ctx.output.format() != OutputFormat::Quiet, ack.total);
    let snapshot = loop {
        let snapshot = status.snapshot();
        progress.update(&snapshot);
        if !snapshot.running {
            break snapshot;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    progress.finish(&snapshot);

    ctx.output.emit_json(&snapshot)?;
    if snapshot.phase == RestorePhase::Failed {
        bail!(
            "restore failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn progress_enabled(visible: bool, stderr_is_tty: bool) -> bool {
    visible && stderr_is_tty
}

struct RestoreProgress {
    bar: Option<ProgressBar>,
}

impl RestoreProgress {
    fn new(visible: bool, total: usize) -> Self {
        if !progress_enabled(visible, io::stderr().is_terminal()) {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar: Some(bar) }
    }

    fn update(&self, snapshot: &RestoreSnapshot) {
        if let Some(bar) = &self.bar {
            bar.set_position(snapshot.processed as u64);
            bar.set_message(format!(
                "ok={} skipped={} failed={} {}",
                snapshot.succeeded, snapshot.skipped, snapshot.failed, snapshot.current_key
            ));
        }
    }

    fn finish(&self, snapshot: &RestoreSnapshot) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(snapshot.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::progress_enabled;

    #[test]
    fn progress_needs_tty_and_output() {
        assert!(progress_enabled(true, true));
        assert!(!progress_enabled(true, false));
        assert!(!progress_enabled(false, true));
    }
}
