//! Periodic check-and-backup loop.
//!
//! One check runs immediately at startup, then one per interval tick. Each
//! check lists the source, decides whether a backup is due and, if so, hands
//! off to the [`BackupExecutor`]. Only one check is ever in flight; the next
//! tick waits until it has finished.
//!
//! The loop exits as soon as the shutdown token fires, including while a
//! check is running. A transfer child that is already running is left to
//! finish on its own and nothing further is persisted for that cycle.

use crate::config::Config;
use crate::decision::{BackupDecision, ChangeDetector};
use crate::executor::{BackupExecutor, BackupReport};
use crate::state::StateStore;
use crate::transfer::rclone::remove_stale_logs;
use crate::transfer::SyncTool;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Result of a single check cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The source could not be listed; no decision was made
    ListingFailed,
    /// Nothing changed and no forced backup was due
    Skipped,
    /// A backup ran; see the report for whether it succeeded
    BackedUp {
        decision: BackupDecision,
        report: BackupReport,
    },
    /// Shutdown was requested before the cycle finished
    Interrupted,
}

impl CycleOutcome {
    pub fn transferred(&self) -> bool {
        matches!(self, CycleOutcome::BackedUp { report, .. } if report.succeeded)
    }
}

pub struct Scheduler {
    tool: Arc<dyn SyncTool>,
    detector: ChangeDetector,
    executor: BackupExecutor,
    source: String,
    log_dir: PathBuf,
    interval: Duration,
    force_interval: Duration,
}

impl Scheduler {
    pub fn new(config: &Config, tool: Arc<dyn SyncTool>) -> Self {
        let store = StateStore::new(&config.state);
        Self {
            detector: ChangeDetector::new(store.clone()),
            executor: BackupExecutor::new(config, tool.clone(), store),
            tool,
            source: config.backup.source.clone(),
            log_dir: config.rclone.log_dir.clone(),
            interval: config.backup.interval,
            force_interval: config.backup.force_interval,
        }
    }

    /// Run checks until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting backup scheduler (checking every {})",
            humantime::format_duration(self.interval)
        );
        remove_stale_logs(&self.log_dir).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let CycleOutcome::Interrupted = self.check_once(&shutdown).await {
                break;
            }
        }

        info!("Backup scheduler stopped");
    }

    /// Run exactly one check cycle, abandoning it if `shutdown` fires.
    pub async fn check_once(&self, shutdown: &CancellationToken) -> CycleOutcome {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, abandoning current check");
                CycleOutcome::Interrupted
            }
            outcome = self.run_cycle(shutdown) => outcome,
        }
    }

    async fn run_cycle(&self, shutdown: &CancellationToken) -> CycleOutcome {
        info!("Starting backup check...");

        let files = match self.tool.list_entries(&self.source).await {
            Ok(files) => files,
            Err(e) => {
                error!(source = %self.source, error = %e, "Failed to list files");
                return CycleOutcome::ListingFailed;
            }
        };
        info!("Found {} files in source directory", files.len());

        let decision = self
            .detector
            .decide(&files, self.force_interval, Utc::now())
            .await;
        if !decision.is_due() {
            info!("No changes detected and no forced backup needed, skipping backup");
            return CycleOutcome::Skipped;
        }

        let report = self.executor.execute(&files, decision, shutdown).await;
        CycleOutcome::BackedUp { decision, report }
    }
}
