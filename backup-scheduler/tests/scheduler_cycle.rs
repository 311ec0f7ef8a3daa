//! End-to-end check cycles against a scripted transfer tool.

use async_trait::async_trait;
use backup_scheduler::config::Config;
use backup_scheduler::state::StateStore;
use backup_scheduler::transfer::{SyncTool, TransferRequest};
use backup_scheduler::{CycleOutcome, Result, Scheduler};
use chrono::{TimeZone, Utc};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Lists a mutable file set and writes rclone-style log lines during transfers.
struct FakeRclone {
    files: Mutex<Vec<String>>,
    fail_next: AtomicBool,
    requests: Mutex<Vec<TransferRequest>>,
}

impl FakeRclone {
    fn new(files: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(files.iter().map(|s| s.to_string()).collect()),
            fail_next: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn set_files(&self, files: &[&str]) {
        *self.files.lock().unwrap() = files.iter().map(|s| s.to_string()).collect();
    }

    fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncTool for FakeRclone {
    async fn list_entries(&self, _source: &str) -> Result<Vec<String>> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());

        let mut log = std::fs::OpenOptions::new().append(true).open(&request.log_file)?;
        writeln!(log, "2024/01/01 10:00:00 INFO  : 0.50 GiB / 3.00 GiB, 16%, 10 MiB/s, ETA 4m15s")?;
        tokio::time::sleep(Duration::from_millis(150)).await;
        writeln!(log, "2024/01/01 10:00:01 INFO  : 1.00 GiB / 1.00 GiB, 100%, 10 MiB/s, ETA 0s")?;
        writeln!(log, "2024/01/01 10:00:02 INFO  : a: Copied (new)")?;
        writeln!(log, "2024/01/01 10:00:03 INFO  : b: Multi-thread Copied (new)")?;
        writeln!(log, "2024/01/01 10:00:04 INFO  : 2.00 GiB / 3.00 GiB, 66%, 10 MiB/s, ETA 1m")?;
        writeln!(log, "2024/01/01 10:00:05 INFO  : c: Copied (new)")?;

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::other("destination unreachable").into());
        }
        Ok(())
    }
}

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.backup.source = "/srv/data".into();
    config.backup.dest = "remote:backup".into();
    config.state.timestamp_file = dir.path().join("last_run.txt");
    config.state.files_cache = dir.path().join("previous_files.json");
    config.state.force_file = dir.path().join("last_force.txt");
    config.rclone.log_dir = dir.path().join("logs");
    config.monitor.poll_interval = Duration::from_millis(10);
    std::fs::create_dir_all(&config.rclone.log_dir).unwrap();
    config
}

fn remaining_logs(config: &Config) -> usize {
    std::fs::read_dir(&config.rclone.log_dir).unwrap().count()
}

#[tokio::test]
async fn first_run_is_full_forced_transfer_with_progress() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let tool = FakeRclone::new(&["a", "b", "c"]);
    let scheduler = Scheduler::new(&config, tool.clone());
    let shutdown = tokio_util::sync::CancellationToken::new();

    match scheduler.check_once(&shutdown).await {
        CycleOutcome::BackedUp { decision, report } => {
            assert!(decision.changed && decision.forced);
            assert_eq!(decision.reason(), Some("changes detected + forced backup due"));
            assert!(report.succeeded);
            assert_eq!(report.cutoff, None);
            assert_eq!(report.first_eta.as_deref(), Some("4m15s"));
            let summary = report.summary.expect("summary");
            assert_eq!(summary.total_size.as_deref(), Some("3.00 GiB"));
            assert_eq!(summary.copied_items, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(remaining_logs(&config), 0);
    let store = StateStore::new(&config.state);
    assert!(store.last_run().await.unwrap().is_some());
    assert!(store.last_force().await.unwrap().is_some());
}

#[tokio::test]
async fn unchanged_source_is_skipped_until_it_changes() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let tool = FakeRclone::new(&["a", "b"]);
    let scheduler = Scheduler::new(&config, tool.clone());
    let shutdown = tokio_util::sync::CancellationToken::new();

    assert!(scheduler.check_once(&shutdown).await.transferred());
    assert!(matches!(scheduler.check_once(&shutdown).await, CycleOutcome::Skipped));

    tool.set_files(&["a"]);
    match scheduler.check_once(&shutdown).await {
        CycleOutcome::BackedUp { decision, report } => {
            assert_eq!(decision.reason(), Some("changes detected"));
            let last_run = StateStore::new(&config.state).last_run().await.unwrap();
            assert!(report.cutoff.is_some());
            assert!(report.cutoff < last_run);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(tool.requests().len(), 2);
}

#[tokio::test]
async fn cutoff_uses_overlap_buffer_from_last_run() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let store = StateStore::new(&config.state);
    store.save_snapshot(&["a".to_string()]).await.unwrap();
    store
        .save_last_run(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();
    store.save_last_force(Utc::now()).await.unwrap();

    let tool = FakeRclone::new(&["a", "b"]);
    let scheduler = Scheduler::new(&config, tool.clone());
    scheduler.check_once(&tokio_util::sync::CancellationToken::new()).await;

    let requests = tool.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].cutoff,
        Some(Utc.with_ymd_and_hms(2023, 12, 31, 23, 55, 0).unwrap())
    );
    assert_eq!(requests[0].source, "/srv/data");
    assert_eq!(requests[0].destination, "remote:backup");
}

#[tokio::test]
async fn forced_run_without_changes_stamps_force_time() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let store = StateStore::new(&config.state);
    let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    store.save_snapshot(&["a".to_string()]).await.unwrap();
    store.save_last_run(old).await.unwrap();
    store.save_last_force(old).await.unwrap();

    let tool = FakeRclone::new(&["a"]);
    let scheduler = Scheduler::new(&config, tool.clone());

    match scheduler.check_once(&tokio_util::sync::CancellationToken::new()).await {
        CycleOutcome::BackedUp { decision, report } => {
            assert_eq!(decision.reason(), Some("forced backup (no changes detected)"));
            assert_eq!(report.cutoff, None);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(store.last_force().await.unwrap() > Some(old));
    assert_eq!(store.last_run().await.unwrap(), store.last_force().await.unwrap());
}

#[tokio::test]
async fn failed_transfer_is_retried_next_cycle() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let tool = FakeRclone::new(&["a"]);
    let scheduler = Scheduler::new(&config, tool.clone());
    let shutdown = tokio_util::sync::CancellationToken::new();
    let store = StateStore::new(&config.state);

    tool.fail_next.store(true, Ordering::SeqCst);
    match scheduler.check_once(&shutdown).await {
        CycleOutcome::BackedUp { report, .. } => {
            assert!(!report.succeeded);
            // Output written before the failure is still summarized.
            assert_eq!(report.summary.map(|s| s.copied_items), Some(3));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(store.last_run().await.unwrap().is_none());
    assert!(store.snapshot().await.unwrap().is_none());
    assert_eq!(remaining_logs(&config), 0);

    assert!(scheduler.check_once(&shutdown).await.transferred());
    assert!(matches!(scheduler.check_once(&shutdown).await, CycleOutcome::Skipped));
    assert_eq!(tool.requests().len(), 2);
}

#[tokio::test]
async fn every_run_gets_its_own_log_file() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let tool = FakeRclone::new(&["a"]);
    let scheduler = Scheduler::new(&config, tool.clone());
    let shutdown = tokio_util::sync::CancellationToken::new();

    scheduler.check_once(&shutdown).await;
    tool.set_files(&["a", "b"]);
    scheduler.check_once(&shutdown).await;

    let requests = tool.requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].log_file, requests[1].log_file);
}
