//! Core environment context trait for MotionSync peers.

use crate::types::{ServerTime, Timestamp};
use async_trait::async_trait;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - system wall clock, `tokio::time`
/// - **Simulation**: `SimContext` - shared virtual clock with per-peer skew
///
/// # Clocks
///
/// `now()` is the peer's local wall clock. Two peers may disagree by an
/// arbitrary amount, and the protocol never compares timestamps taken on
/// different peers except through the server clock.
#[async_trait]
pub trait SyncContext: Send + Sync + 'static {
    /// Local wall-clock time in ticks.
    fn now(&self) -> Timestamp;

    /// Session-wide server time in milliseconds.
    ///
    /// Used only to measure transmission delay of replication frames.
    fn server_now(&self) -> ServerTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
