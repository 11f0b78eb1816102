//! Writer backend trait for finalized windows
//!
//! A backend commits a whole unit (one cycle's windows) atomically and can
//! report the highest window end it already holds, so a restart that crashed
//! between the sink commit and the ledger update does not write them twice.

use crate::aggregator_core::AlertedWindow;
use crate::pipeline::checkpoint::CheckpointError;
use async_trait::async_trait;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Ledger(CheckpointError),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

impl From<CheckpointError> for SinkError {
    fn from(err: CheckpointError) -> Self {
        SinkError::Ledger(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Database(e) => write!(f, "Database error: {}", e),
            SinkError::Ledger(e) => write!(f, "Commit ledger error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

#[async_trait]
pub trait SinkBackend: Send {
    /// Durably write one unit of windows; all or nothing
    async fn commit_unit(&mut self, windows: &[AlertedWindow]) -> Result<(), SinkError>;

    /// Highest window end present in the backend's storage
    async fn committed_through(&mut self) -> Result<Option<i64>, SinkError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
