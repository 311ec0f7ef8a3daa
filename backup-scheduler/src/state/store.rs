//! File-backed state store.
//!
//! Three independent resources live on disk:
//! - the last successful run timestamp (RFC 3339, second precision)
//! - the last forced run timestamp (same format, separate file)
//! - the file snapshot of the most recent enumeration (pretty-printed JSON array)
//!
//! Nothing is cached in memory; every read and write goes to disk. Writes land
//! in a sibling temp file first and are renamed into place, so an interrupted
//! write never leaves a truncated state file behind.

use crate::config::StateConfig;
use crate::utils::{Result, SchedulerError};
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct StateStore {
    timestamp_file: PathBuf,
    force_file: PathBuf,
    files_cache: PathBuf,
}

impl StateStore {
    pub fn new(config: &StateConfig) -> Self {
        Self {
            timestamp_file: config.timestamp_file.clone(),
            force_file: config.force_file.clone(),
            files_cache: config.files_cache.clone(),
        }
    }

    pub async fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        read_timestamp(&self.timestamp_file).await
    }

    pub async fn save_last_run(&self, at: DateTime<Utc>) -> Result<()> {
        write_timestamp(&self.timestamp_file, at).await
    }

    pub async fn last_force(&self) -> Result<Option<DateTime<Utc>>> {
        read_timestamp(&self.force_file).await
    }

    pub async fn save_last_force(&self, at: DateTime<Utc>) -> Result<()> {
        write_timestamp(&self.force_file, at).await
    }

    /// Previous snapshot; `Ok(None)` when it was never written.
    pub async fn snapshot(&self) -> Result<Option<Vec<String>>> {
        read_snapshot(&self.files_cache).await
    }

    pub async fn save_snapshot(&self, files: &[String]) -> Result<()> {
        write_snapshot(&self.files_cache, files).await?;
        info!("Current files saved to: {}", self.files_cache.display());
        Ok(())
    }
}

/// Format a timestamp the way it is persisted.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a persisted timestamp, accepting any RFC 3339 offset.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())?;
    Ok(parsed.with_timezone(&Utc))
}

pub async fn read_timestamp(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match fs::read_to_string(path).await {
        Ok(content) => parse_timestamp(&content).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Timestamp file {} does not exist", path.display());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn write_timestamp(path: &Path, at: DateTime<Utc>) -> Result<()> {
    write_atomic(path, format_timestamp(at).as_bytes()).await?;
    info!("Timestamp saved to file: {}", path.display());
    Ok(())
}

pub async fn read_snapshot(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn write_snapshot(path: &Path, files: &[String]) -> Result<()> {
    let data = serde_json::to_vec_pretty(files)?;
    write_atomic(path, &data).await
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path.file_name().ok_or_else(|| SchedulerError::Persistence {
        path: path.display().to_string(),
        reason: "path has no file name".into(),
    })?;

    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, data).await?;
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}
