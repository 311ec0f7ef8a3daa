//! Custom error types for the backup scheduler.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Cutoff error: {0}")]
    Cutoff(String),

    #[error("Failed to list source entries: {0}")]
    Listing(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer exited with {status}")]
    TransferFailed { status: std::process::ExitStatus },

    #[error("Persistence error for {path}: {reason}")]
    Persistence { path: String, reason: String },
}

impl SchedulerError {
    /// True for faults raised by the external transfer itself.
    pub fn is_transfer_fault(&self) -> bool {
        matches!(
            self,
            SchedulerError::Spawn { .. } | SchedulerError::TransferFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
