//! Error types for the motion synchronization engine.

use motionsync_env::{AvatarId, EnvError};
use thiserror::Error;

/// Errors surfaced by [`MotionSynchronizer`](crate::MotionSynchronizer) operations.
///
/// Transport faults are deliberately absent from the tick path: they are
/// logged and counted in [`SyncMetrics`](crate::SyncMetrics) instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Motion id has no entry in the catalog.
    #[error("Unknown motion: {0}")]
    UnknownMotion(i32),

    #[error("Invalid motion catalog: {0}")]
    InvalidCatalog(String),

    /// Mutation attempted on an avatar this peer does not own.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Avatar {0} is moving")]
    AvatarMoving(AvatarId),

    #[error("Unknown avatar: {0}")]
    UnknownAvatar(AvatarId),

    /// A peer controls exactly one avatar.
    #[error("Peer already owns avatar {0}")]
    LocalAvatarExists(AvatarId),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),
}

impl SyncError {
    pub fn unauthorized(avatar: AvatarId) -> Self {
        Self::Unauthorized(format!("avatar {} is not owned by this peer", avatar))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
