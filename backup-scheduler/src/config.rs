//! Configuration management for the backup scheduler.
//!
//! Loads configuration from an optional TOML file; command-line flags are
//! applied on top by the binary before validation.

use crate::utils::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub rclone: RcloneConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Source directory or rclone remote to back up
    #[serde(default)]
    pub source: String,

    /// Destination directory or rclone remote
    #[serde(default)]
    pub dest: String,

    /// How often the source is checked for changes
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,

    /// Maximum time between full transfers, regardless of changes
    #[serde(default = "default_force_interval", with = "duration_str")]
    pub force_interval: Duration,

    /// Window subtracted from the last run when computing the cutoff
    #[serde(default = "default_overlap_buffer", with = "duration_str")]
    pub overlap_buffer: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Last successful run timestamp
    #[serde(default = "default_timestamp_file")]
    pub timestamp_file: PathBuf,

    /// Snapshot of the source file list
    #[serde(default = "default_files_cache")]
    pub files_cache: PathBuf,

    /// Last forced run timestamp
    #[serde(default = "default_force_file")]
    pub force_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneConfig {
    /// rclone executable
    #[serde(default = "default_rclone_binary")]
    pub binary: String,

    /// rclone config file (rclone's default location when unset)
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Directory holding the per-run rclone log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between reads of the live rclone log
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,

    /// Attempts to open the rclone log before the ETA watch gives up
    #[serde(default = "default_open_retries")]
    pub open_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_force_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_overlap_buffer() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_timestamp_file() -> PathBuf {
    PathBuf::from("last_run.txt")
}

fn default_files_cache() -> PathBuf {
    PathBuf::from("previous_files.json")
}

fn default_force_file() -> PathBuf {
    PathBuf::from("last_force.txt")
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_open_retries() -> u32 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            dest: String::new(),
            interval: default_interval(),
            force_interval: default_force_interval(),
            overlap_buffer: default_overlap_buffer(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            timestamp_file: default_timestamp_file(),
            files_cache: default_files_cache(),
            force_file: default_force_file(),
        }
    }
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            binary: default_rclone_binary(),
            config_path: None,
            log_dir: default_log_dir(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            open_retries: default_open_retries(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.backup.source.trim().is_empty() {
            return Err(SchedulerError::Config("source is required".into()));
        }
        if self.backup.dest.trim().is_empty() {
            return Err(SchedulerError::Config("destination is required".into()));
        }
        if self.backup.interval.is_zero() {
            return Err(SchedulerError::Config("interval must be greater than zero".into()));
        }
        if self.monitor.poll_interval.is_zero() {
            return Err(SchedulerError::Config(
                "monitor poll interval must be greater than zero".into(),
            ));
        }
        if let Some(path) = &self.rclone.config_path {
            if !path.exists() {
                return Err(SchedulerError::Config(format!(
                    "rclone config file does not exist: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Log the effective configuration once at startup.
    pub fn log_summary(&self) {
        info!("Source: {}", self.backup.source);
        info!("Destination: {}", self.backup.dest);
        info!("Check interval: {}", humantime::format_duration(self.backup.interval));
        info!("Force interval: {}", humantime::format_duration(self.backup.force_interval));
        info!("Overlap buffer: {}", humantime::format_duration(self.backup.overlap_buffer));
        match &self.rclone.config_path {
            Some(path) => info!("Rclone config: {}", path.display()),
            None => info!("Rclone config: using default location"),
        }
    }
}

/// Durations written the way the CLI accepts them ("30m", "24h", "200ms").
mod duration_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
