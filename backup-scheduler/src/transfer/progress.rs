//! Progress observation for a running rclone transfer.
//!
//! Two readers share the same append-only rclone log:
//! - the live ETA watch, which tails the log while the transfer runs and
//!   reports the first "ETA" figure it sees
//! - the summary parse, which reads the whole log once the transfer has
//!   exited and extracts the final transferred size and the number of newly
//!   copied items
//!
//! Neither reader can affect the outcome of a backup; failures here only
//! degrade what gets reported.

use crate::transfer::tail::LogTail;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static ETA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ETA\s+([0-9]+[hms]+(?:[0-9]+[ms]+)*)").expect("valid ETA pattern")
});

static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.\d+\s+[KMGT]?i?B)\s+/\s+(\d+\.\d+\s+[KMGT]?i?B)")
        .expect("valid size pattern")
});

/// Marker rclone logs at INFO level for every item copied that did not exist
/// at the destination. Also matches "Multi-thread Copied (new)".
pub const COPIED_MARKER: &str = "Copied (new)";

/// ETA figure on a stats line, e.g. `3m20s` from `..., ETA 3m20s`.
pub fn extract_eta(line: &str) -> Option<&str> {
    ETA_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Totals extracted from a finished rclone log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Total size from the most recent `<done> / <total>` stats line
    pub total_size: Option<String>,

    /// Lines reporting a newly copied item
    pub copied_items: usize,
}

impl TransferSummary {
    pub fn parse(content: &str) -> Self {
        let mut summary = Self::default();
        for line in content.lines() {
            if let Some(caps) = SIZE_PATTERN.captures(line) {
                summary.total_size = Some(caps[2].to_string());
            }
            if line.contains(COPIED_MARKER) {
                summary.copied_items += 1;
            }
        }
        summary
    }

    /// Read and parse the log at `path`.
    pub async fn from_log(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        Ok(Self::parse(&String::from_utf8_lossy(&data)))
    }
}

/// Settings for the live ETA watch.
#[derive(Debug, Clone)]
pub struct EtaWatch {
    path: PathBuf,
    poll_interval: Duration,
    open_retries: u32,
}

impl EtaWatch {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration, open_retries: u32) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            open_retries,
        }
    }

    /// Tail the log until the first ETA appears or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Option<String> {
        let opened =
            LogTail::open(&self.path, self.poll_interval, self.open_retries, &cancel).await;
        let tail = match opened {
            Ok(Some(tail)) => tail,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to open rclone log for monitoring"
                );
                return None;
            }
        };
        watch_first_eta(tail, cancel).await
    }
}

/// Report the first ETA read from `tail`, then stop watching.
pub async fn watch_first_eta(mut tail: LogTail, cancel: CancellationToken) -> Option<String> {
    loop {
        match tail.next_line(&cancel).await {
            Ok(Some(line)) => {
                if let Some(eta) = extract_eta(&line) {
                    info!("First ETA found: {}", eta);
                    return Some(eta.to_string());
                }
            }
            Ok(None) => {
                debug!("ETA watch stopped before an ETA was reported");
                return None;
            }
            Err(e) => {
                warn!(path = %tail.path().display(), error = %e, "Error reading rclone log");
                return None;
            }
        }
    }
}

/// Delete a finished run's log. Failures are logged and otherwise ignored.
pub async fn remove_log(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed rclone log"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove rclone log file"),
    }
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}
