//! Simulation harness errors.

use motionsync_core::SyncError;
use motionsync_env::PeerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Export failed: {0}")]
    Export(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimError {
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;

/// Fails with `msg` unless `condition` holds.
pub fn ensure(condition: bool, msg: impl FnOnce() -> String) -> SimResult<()> {
    if condition {
        Ok(())
    } else {
        Err(SimError::Assertion(msg()))
    }
}
