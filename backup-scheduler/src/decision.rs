//! Change and force detection.
//!
//! Two independent predicates are evaluated every cycle: whether the source
//! listing differs from the persisted snapshot, and whether the force interval
//! has elapsed since the last forced run. Either one makes a backup due.

use crate::state::StateStore;
use crate::transfer::progress::format_duration;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of one check, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupDecision {
    pub changed: bool,
    pub forced: bool,
}

impl BackupDecision {
    pub fn new(changed: bool, forced: bool) -> Self {
        Self { changed, forced }
    }

    pub fn is_due(&self) -> bool {
        self.changed || self.forced
    }

    /// Human-readable reason; `None` when no backup is due.
    pub fn reason(&self) -> Option<&'static str> {
        match (self.changed, self.forced) {
            (true, true) => Some("changes detected + forced backup due"),
            (false, true) => Some("forced backup (no changes detected)"),
            (true, false) => Some("changes detected"),
            (false, false) => None,
        }
    }
}

/// Compare the current listing against the previous snapshot.
///
/// `previous` is `None` when the snapshot could not be read, which always
/// counts as a change. An empty previous snapshot only counts as a change
/// when something exists now.
pub fn has_changes(current: &[String], previous: Option<&[String]>) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if previous.is_empty() {
        return !current.is_empty();
    }

    let current: HashSet<&str> = current.iter().map(String::as_str).collect();
    let previous: HashSet<&str> = previous.iter().map(String::as_str).collect();
    current.symmetric_difference(&previous).next().is_some()
}

/// True when no forced run was ever recorded or `force_interval` has elapsed.
pub fn should_force(
    last_force: Option<DateTime<Utc>>,
    force_interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_force) = last_force else {
        return true;
    };

    match chrono::Duration::from_std(force_interval) {
        Ok(interval) => now.signed_duration_since(last_force) >= interval,
        // An interval too large for chrono can never elapse.
        Err(_) => false,
    }
}

/// Runs both predicates against the state store, logging what it finds.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    store: StateStore,
}

impl ChangeDetector {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub async fn has_changes(&self, current: &[String]) -> bool {
        let previous = match self.store.snapshot().await {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                info!("No previous file list found, treating as changed");
                return true;
            }
            Err(e) => {
                warn!(error = %e, "Error reading previous files, treating as changed");
                return true;
            }
        };

        if previous.is_empty() {
            info!("No previous files to compare with");
        }

        let changed = has_changes(current, Some(previous.as_slice()));
        if changed {
            log_differences(current, &previous);
        } else {
            info!("No file changes detected");
        }
        changed
    }

    pub async fn should_force(&self, force_interval: Duration, now: DateTime<Utc>) -> bool {
        let last_force = match self.store.last_force().await {
            Ok(Some(at)) => at,
            Ok(None) => {
                info!("No previous forced backup found, will force backup");
                return true;
            }
            Err(e) => {
                warn!(error = %e, "Unreadable forced backup timestamp, will force backup");
                return true;
            }
        };

        let forced = should_force(Some(last_force), force_interval, now);
        let since = now
            .signed_duration_since(last_force)
            .to_std()
            .map(|d| format_duration(d.as_secs()))
            .unwrap_or_else(|_| "0s".to_string());
        let interval = format_duration(force_interval.as_secs());

        if forced {
            info!(
                "Time since last forced backup: {} (>= {}), forcing backup",
                since, interval
            );
        } else {
            info!(
                "Time since last forced backup: {} (< {}), no force needed",
                since, interval
            );
        }
        forced
    }

    pub async fn decide(
        &self,
        current: &[String],
        force_interval: Duration,
        now: DateTime<Utc>,
    ) -> BackupDecision {
        let forced = self.should_force(force_interval, now).await;
        let changed = self.has_changes(current).await;
        BackupDecision::new(changed, forced)
    }
}

fn log_differences(current: &[String], previous: &[String]) {
    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
    let previous_set: HashSet<&str> = previous.iter().map(String::as_str).collect();

    let added = current_set.difference(&previous_set).count();
    let removed = previous_set.difference(&current_set).count();
    if let Some(first) = current_set.difference(&previous_set).next() {
        info!("New file detected: {}", first);
    }
    info!(added, removed, "File list changed since last check");
}
