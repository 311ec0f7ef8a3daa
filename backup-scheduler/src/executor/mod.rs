//! Backup attempt executor.
//!
//! Runs one backup once a check has decided it is due:
//! - compute the transfer cutoff from the last successful run
//! - start the live ETA watch on a fresh per-run log file
//! - run the transfer and wait for it to exit
//! - on success persist the snapshot, the run timestamp and, for forced runs,
//!   the force timestamp (in that order)
//! - parse the log for summary statistics and delete it
//!
//! Nothing is persisted when the transfer fails, so the next check sees the
//! same differences and tries again.

pub mod cutoff;

use crate::config::Config;
use crate::decision::BackupDecision;
use crate::state::StateStore;
use crate::transfer::progress::{
    format_duration, remove_log, watch_first_eta, EtaWatch, TransferSummary,
};
use crate::transfer::rclone::{run_log_path, SyncTool, TransferRequest};
use crate::transfer::tail::LogTail;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long the executor waits for the ETA watch to wind down after the
/// transfer has exited.
const WATCH_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// What happened during one backup attempt.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    /// Transfer exited successfully
    pub succeeded: bool,
    /// Cutoff passed to the transfer, `None` for a full transfer
    pub cutoff: Option<DateTime<Utc>>,
    /// First ETA seen in the live log
    pub first_eta: Option<String>,
    /// Post-run statistics, `None` if the log could not be read
    pub summary: Option<TransferSummary>,
    /// Wall-clock time spent in the transfer
    pub elapsed: Duration,
}

pub struct BackupExecutor {
    tool: Arc<dyn SyncTool>,
    store: StateStore,
    source: String,
    destination: String,
    overlap_buffer: Duration,
    log_dir: PathBuf,
    poll_interval: Duration,
    open_retries: u32,
}

impl BackupExecutor {
    pub fn new(config: &Config, tool: Arc<dyn SyncTool>, store: StateStore) -> Self {
        Self {
            tool,
            store,
            source: config.backup.source.clone(),
            destination: config.backup.dest.clone(),
            overlap_buffer: config.backup.overlap_buffer,
            log_dir: config.rclone.log_dir.clone(),
            poll_interval: config.monitor.poll_interval,
            open_retries: config.monitor.open_retries,
        }
    }

    /// Run one backup of `files`. Every fault is handled here and reflected in
    /// the returned report.
    pub async fn execute(
        &self,
        files: &[String],
        decision: BackupDecision,
        shutdown: &CancellationToken,
    ) -> BackupReport {
        let reason = decision.reason().unwrap_or("requested");
        info!("Performing backup: {}", reason);

        let mut report = BackupReport {
            cutoff: self.transfer_cutoff(decision.forced).await,
            ..Default::default()
        };

        let log_file = run_log_path(&self.log_dir);
        let watch_cancel = shutdown.child_token();
        let watch_handle = self.start_watch(&log_file, &watch_cancel).await;

        let request = TransferRequest {
            source: self.source.clone(),
            destination: self.destination.clone(),
            cutoff: report.cutoff,
            log_file: log_file.clone(),
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let result = self.tool.transfer(&request).await;
        report.elapsed = started.elapsed();

        watch_cancel.cancel();
        report.first_eta = match tokio::time::timeout(WATCH_STOP_TIMEOUT, watch_handle).await {
            Ok(Ok(eta)) => eta,
            Ok(Err(e)) => {
                warn!(error = %e, "ETA watch task failed");
                None
            }
            Err(_) => {
                warn!("ETA watch did not stop in time");
                None
            }
        };

        match result {
            Ok(()) => {
                report.succeeded = true;
                self.record_success(files, decision, started_at).await;
                info!(
                    "Backup completed successfully in {}",
                    format_duration(report.elapsed.as_secs())
                );
            }
            Err(e) if e.is_transfer_fault() => {
                error!(
                    source = %self.source,
                    destination = %self.destination,
                    error = %e,
                    "Backup failed"
                );
            }
            Err(e) => {
                error!(
                    source = %self.source,
                    destination = %self.destination,
                    error = %e,
                    "Backup failed before the transfer could complete"
                );
            }
        }

        report.summary = summarize(&log_file).await;
        remove_log(&log_file).await;
        report
    }

    /// Create the run's log and position the ETA watch at its start before the
    /// transfer can write to it. If the file cannot be created here, the watch
    /// falls back to waiting for the transfer to create it.
    async fn start_watch(
        &self,
        log_file: &Path,
        cancel: &CancellationToken,
    ) -> JoinHandle<Option<String>> {
        let cancel = cancel.clone();
        let opened = match tokio::fs::File::create(log_file).await {
            Ok(_) => LogTail::open(log_file, self.poll_interval, 0, &cancel).await,
            Err(e) => {
                warn!(
                    path = %log_file.display(),
                    error = %e,
                    "Failed to create rclone log file"
                );
                Ok(None)
            }
        };

        let watch = EtaWatch::new(log_file, self.poll_interval, self.open_retries);
        tokio::spawn(async move {
            match opened {
                Ok(Some(tail)) => watch_first_eta(tail, cancel).await,
                _ => watch.run(cancel).await,
            }
        })
    }

    async fn transfer_cutoff(&self, forced: bool) -> Option<DateTime<Utc>> {
        let last_run = match self.store.last_run().await {
            Ok(last_run) => last_run,
            Err(e) => {
                warn!(error = %e, "Unreadable last run timestamp, treating as never run");
                None
            }
        };

        match cutoff::cutoff(last_run, self.overlap_buffer, forced) {
            Ok(Some(at)) => {
                info!(
                    "Cutoff with overlap: last run={}, adjusted={} (buffer: {})",
                    last_run.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    at.to_rfc3339(),
                    humantime::format_duration(self.overlap_buffer)
                );
                Some(at)
            }
            Ok(None) if forced => {
                info!("Forced backup, copying all files");
                None
            }
            Ok(None) => {
                info!("No previous run timestamp, copying all files");
                None
            }
            Err(e) => {
                warn!(error = %e, "Could not compute cutoff, copying all files");
                None
            }
        }
    }

    /// Persistence after a successful transfer. A failed write leaves that
    /// piece of state stale; it is reported, not retried.
    async fn record_success(&self, files: &[String], decision: BackupDecision, at: DateTime<Utc>) {
        if let Err(e) = self.store.save_snapshot(files).await {
            error!(error = %e, "Failed to save file list");
        }

        if let Err(e) = self.store.save_last_run(at).await {
            error!(error = %e, "Failed to save run timestamp");
        }

        if decision.forced {
            if let Err(e) = self.store.save_last_force(at).await {
                error!(error = %e, "Failed to save force timestamp");
            }
        }
    }
}

async fn summarize(log_file: &Path) -> Option<TransferSummary> {
    match TransferSummary::from_log(log_file).await {
        Ok(summary) => {
            info!(
                "Total size: {}, Copied items: {}",
                summary.total_size.as_deref().unwrap_or("unknown"),
                summary.copied_items
            );
            Some(summary)
        }
        Err(e) => {
            warn!(path = %log_file.display(), error = %e, "Failed to parse rclone log");
            None
        }
    }
}
