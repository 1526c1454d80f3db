//! Production implementation of SyncContext using Tokio.

use crate::types::{ServerTime, Timestamp, TICKS_PER_SECOND};
use crate::SyncContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Production context backed by Tokio and the system clock.
///
/// The server clock is approximated by the local wall clock plus an offset
/// the session layer learns during its handshake.
pub struct TokioContext {
    /// Milliseconds to add to the local wall clock to obtain server time.
    server_offset_ms: i64,
}

impl TokioContext {
    pub fn new() -> Self {
        Self { server_offset_ms: 0 }
    }

    /// Creates a context whose server clock is shifted by `offset_ms`.
    pub fn with_server_offset(offset_ms: i64) -> Self {
        Self {
            server_offset_ms: offset_ms,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn since_epoch() -> Duration {
        // A clock set before 1970 collapses to zero rather than panicking.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncContext for TokioContext {
    fn now(&self) -> Timestamp {
        let since = Self::since_epoch();
        let ticks = since.as_secs() as i64 * TICKS_PER_SECOND
            + since.subsec_nanos() as i64 / (1_000_000_000 / TICKS_PER_SECOND);
        Timestamp(ticks)
    }

    fn server_now(&self) -> ServerTime {
        ServerTime(Self::since_epoch().as_millis() as i64 + self.server_offset_ms)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn seed(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2.since(t1) >= TICKS_PER_SECOND / 100);
    }

    #[test]
    fn test_server_offset_applied() {
        let plain = TokioContext::new();
        let shifted = TokioContext::with_server_offset(60_000);
        let diff = shifted.server_now().millis() - plain.server_now().millis();
        assert!((59_000..=61_000).contains(&diff));
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
