//! Utility modules for the backup scheduler.

pub mod errors;
pub mod logger;

pub use errors::{Result, SchedulerError};
