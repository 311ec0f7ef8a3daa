//! External transfer tool and observation of its progress log.

pub mod progress;
pub mod rclone;
pub mod tail;

pub use progress::{EtaWatch, TransferSummary};
pub use rclone::{RcloneClient, SyncTool, TransferRequest};
