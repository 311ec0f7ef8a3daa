//! Backup Scheduler Library
//!
//! Decides when a source tree needs to be copied to its destination with
//! rclone and supervises the copy while it runs.

pub mod config;
pub mod daemon;
pub mod decision;
pub mod executor;
pub mod scheduler;
pub mod state;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use scheduler::{CycleOutcome, Scheduler};
pub use utils::errors::SchedulerError;
pub type Result<T> = std::result::Result<T, SchedulerError>;
