//! Transfer cutoff with a backward overlap buffer.
//!
//! A file modified at T may still be mid-write when a run uses T as its
//! boundary, so the cutoff re-examines `overlap_buffer` before the last run.

use crate::utils::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// `None` means transfer everything.
pub fn cutoff(
    last_run: Option<DateTime<Utc>>,
    overlap_buffer: Duration,
    forced: bool,
) -> Result<Option<DateTime<Utc>>> {
    let Some(last_run) = last_run else {
        return Ok(None);
    };
    if forced {
        return Ok(None);
    }

    let buffer = chrono::Duration::from_std(overlap_buffer)
        .map_err(|e| SchedulerError::Cutoff(format!("overlap buffer out of range: {}", e)))?;

    last_run
        .checked_sub_signed(buffer)
        .map(Some)
        .ok_or_else(|| {
            SchedulerError::Cutoff(format!(
                "{} minus {} is not representable",
                last_run,
                humantime::format_duration(overlap_buffer)
            ))
        })
}
