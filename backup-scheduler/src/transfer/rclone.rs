//! rclone invocation: source enumeration and the copy itself.

use crate::config::RcloneConfig;
use crate::state::store::format_timestamp;
use crate::utils::{Result, SchedulerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, warn};

/// One transfer to perform.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
    /// Only entries modified after this instant; everything when `None`
    pub cutoff: Option<DateTime<Utc>>,
    /// Where the tool must write its progress log
    pub log_file: PathBuf,
}

/// External synchronization tool the scheduler drives.
#[async_trait]
pub trait SyncTool: Send + Sync {
    /// Every file (not directory) under `source`, recursively.
    async fn list_entries(&self, source: &str) -> Result<Vec<String>>;

    /// Run one transfer to completion. The log file named in the request
    /// already exists when this is called.
    async fn transfer(&self, request: &TransferRequest) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RcloneClient {
    binary: String,
    config_path: Option<PathBuf>,
}

impl RcloneClient {
    pub fn new(config: &RcloneConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            config_path: config.config_path.clone(),
        }
    }

    fn global_args(&self) -> Vec<String> {
        match &self.config_path {
            Some(path) => vec!["--config".to_string(), path.display().to_string()],
            None => Vec::new(),
        }
    }

    pub fn list_args(&self, source: &str) -> Vec<String> {
        let mut args = self.global_args();
        args.extend(
            ["lsf", source, "-R", "--files-only"]
                .into_iter()
                .map(String::from),
        );
        args
    }

    pub fn copy_args(&self, request: &TransferRequest) -> Vec<String> {
        let mut args = self.global_args();
        args.extend([
            "copy".to_string(),
            request.source.clone(),
            request.destination.clone(),
            "--log-file".to_string(),
            request.log_file.display().to_string(),
            "--log-level".to_string(),
            "INFO".to_string(),
            "--stats".to_string(),
            "1s".to_string(),
            "--stats-one-line".to_string(),
            "--stats-one-line-date".to_string(),
        ]);
        if let Some(cutoff) = request.cutoff {
            args.push("--max-age".to_string());
            args.push(format_timestamp(cutoff));
        }
        args
    }
}

/// Split `lsf` output into entries, dropping blank lines.
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn spawn_error(program: &str, source: std::io::Error) -> SchedulerError {
    SchedulerError::Spawn {
        program: program.to_string(),
        source,
    }
}

#[async_trait]
impl SyncTool for RcloneClient {
    async fn list_entries(&self, source: &str) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .args(self.list_args(source))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(&self.binary, e))?;

        if !output.status.success() {
            return Err(SchedulerError::Listing(format!(
                "{} lsf exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<()> {
        match request.cutoff {
            Some(cutoff) => info!("Using --max-age cutoff {}", format_timestamp(cutoff)),
            None => info!("No cutoff, copying all files"),
        }

        let args = self.copy_args(request);
        info!("Executing: {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(&self.binary, e))?;

        if !output.status.success() {
            error!(
                source = %request.source,
                destination = %request.destination,
                "rclone output: {}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(SchedulerError::TransferFailed {
                status: output.status,
            });
        }

        if !output.stdout.is_empty() {
            info!("Copy operation output:\n{}", String::from_utf8_lossy(&output.stdout));
        }
        Ok(())
    }
}

const RUN_LOG_PREFIX: &str = "rclone-";
const RUN_LOG_SUFFIX: &str = ".log";

/// Name of the log file for one transfer attempt, unique per run.
pub fn run_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "{}{}{}",
        RUN_LOG_PREFIX,
        uuid::Uuid::new_v4(),
        RUN_LOG_SUFFIX
    ))
}

fn is_run_log(name: &str) -> bool {
    name.starts_with(RUN_LOG_PREFIX) && name.ends_with(RUN_LOG_SUFFIX)
}

/// Delete per-run logs left in `log_dir` by attempts that never finished,
/// e.g. a cycle abandoned on shutdown. Returns how many were removed.
pub async fn remove_stale_logs(log_dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(log_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %log_dir.display(), error = %e, "Cannot scan log directory");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %log_dir.display(), error = %e, "Error scanning log directory");
                break;
            }
        };

        if !entry.file_name().to_str().is_some_and(is_run_log) {
            continue;
        }
        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove stale rclone log")
            }
        }
    }

    if removed > 0 {
        info!("Removed {} stale rclone log file(s) from {}", removed, log_dir.display());
    }
    removed
}
