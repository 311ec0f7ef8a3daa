//! Backup Scheduler - Main entry point
//!
//! Periodically checks a source for changes and runs incremental rclone
//! copies to the destination.

use anyhow::Result;
use backup_scheduler::{config::Config, daemon::shutdown::ShutdownCoordinator, utils, Scheduler};
use backup_scheduler::transfer::RcloneClient;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Automated backup scheduler using rclone",
    long_about = "Monitors a source for changes and performs incremental backups using rclone.\n\
                  Supports local and remote sources and destinations, with configurable\n\
                  check intervals, forced full backups and an overlap buffer.",
    after_help = "Examples:\n  \
        backup-scheduler --source /home/user/docs --dest /backup/docs\n  \
        backup-scheduler --source gdrive:Documents --dest /local/backup --rclone-config /path/to/rclone.conf\n  \
        backup-scheduler --source /data --dest s3:mybucket/backup --interval 15m --overlap-buffer 10m"
)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source directory/remote to back up
    #[arg(long)]
    source: Option<String>,

    /// Destination directory/remote for the backup
    #[arg(long)]
    dest: Option<String>,

    /// Backup check interval (e.g. 5m, 1h, 30s) [default: 30m]
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Interval for a forced backup regardless of changes [default: 24h]
    #[arg(long, value_parser = humantime::parse_duration)]
    force_interval: Option<Duration>,

    /// Time subtracted from the last run to avoid missing files [default: 5m]
    #[arg(long, value_parser = humantime::parse_duration)]
    overlap_buffer: Option<Duration>,

    /// File storing the last run timestamp [default: last_run.txt]
    #[arg(long, value_name = "FILE")]
    timestamp_file: Option<PathBuf>,

    /// File caching the previous file list [default: previous_files.json]
    #[arg(long, value_name = "FILE")]
    files_cache: Option<PathBuf>,

    /// File storing the last forced backup timestamp [default: last_force.txt]
    #[arg(long, value_name = "FILE")]
    force_file: Option<PathBuf>,

    /// Path to rclone config file (rclone's default location if not given)
    #[arg(long, value_name = "FILE")]
    rclone_config: Option<PathBuf>,

    /// rclone executable [default: rclone]
    #[arg(long)]
    rclone_binary: Option<String>,

    /// Directory for per-run rclone log files [default: system temp dir]
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single check and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    /// Command-line values take precedence over the config file.
    fn apply(self, config: &mut Config) {
        if let Some(source) = self.source {
            config.backup.source = source;
        }
        if let Some(dest) = self.dest {
            config.backup.dest = dest;
        }
        if let Some(interval) = self.interval {
            config.backup.interval = interval;
        }
        if let Some(force_interval) = self.force_interval {
            config.backup.force_interval = force_interval;
        }
        if let Some(overlap_buffer) = self.overlap_buffer {
            config.backup.overlap_buffer = overlap_buffer;
        }
        if let Some(path) = self.timestamp_file {
            config.state.timestamp_file = path;
        }
        if let Some(path) = self.files_cache {
            config.state.files_cache = path;
        }
        if let Some(path) = self.force_file {
            config.state.force_file = path;
        }
        if let Some(path) = self.rclone_config {
            config.rclone.config_path = Some(path);
        }
        if let Some(binary) = self.rclone_binary {
            config.rclone.binary = binary;
        }
        if let Some(dir) = self.log_dir {
            config.rclone.log_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let once = args.once;
    args.apply(&mut config);

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    config.validate()?;

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!(
        "Starting backup-scheduler v{} on {}",
        env!("CARGO_PKG_VERSION"),
        host
    );
    config.log_summary();

    let tool = Arc::new(RcloneClient::new(&config.rclone));
    let scheduler = Scheduler::new(&config, tool);

    // Create shutdown coordinator
    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new());
    let shutdown = shutdown_coordinator.token();
    let signal_task = {
        let coordinator = shutdown_coordinator.clone();
        tokio::spawn(async move { coordinator.wait_for_signal().await })
    };

    if once {
        scheduler.check_once(&shutdown).await;
    } else {
        scheduler.run(shutdown).await;
    }

    // Release the signal listener if the loop ended on its own (`--once`).
    shutdown_coordinator.trigger();
    if let Err(e) = signal_task.await {
        tracing::warn!("Signal listener task failed: {}", e);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
