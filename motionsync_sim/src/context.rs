//! Simulation context implementing SyncContext for deterministic testing.

use async_trait::async_trait;
use motionsync_env::{ServerTime, SyncContext, Timestamp, TICKS_PER_SECOND};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2024-01-01 00:00:00 UTC in local clock ticks.
const EPOCH_TICKS: i64 = 1_704_067_200 * TICKS_PER_SECOND;

/// 2024-01-01 00:00:00 UTC in server milliseconds.
const EPOCH_SERVER_MS: i64 = 1_704_067_200_000;

const NANOS_PER_TICK: i64 = 1_000_000_000 / TICKS_PER_SECOND;

/// Simulation context backed by a shared virtual clock.
///
/// Every peer gets its own `SimContext`, but all of them read the same
/// virtual time. What differs is the skew: a peer's local wall clock may run
/// ahead of or behind the session's server clock by a fixed amount, which is
/// exactly the situation the protocol has to tolerate.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start), shared
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Local clock offset from server time
    skew_ms: i64,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            skew_ms: 0,
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// A context on the same virtual timeline whose local clock is shifted.
    pub fn with_skew_ms(&self, skew_ms: i64) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            skew_ms,
        }
    }

    pub fn skew_ms(&self) -> i64 {
        self.skew_ms
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(|e| e.into_inner());
        *time += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Virtual time in whole milliseconds.
    pub fn time_ms(&self) -> u64 {
        self.time_ns() / 1_000_000
    }

    pub fn time_secs(&self) -> f64 {
        self.time_ns() as f64 / 1e9
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        self.with_skew_ms(self.skew_ms)
    }
}

#[async_trait]
impl SyncContext for SimContext {
    fn now(&self) -> Timestamp {
        let virtual_ticks = self.time_ns() as i64 / NANOS_PER_TICK;
        Timestamp(EPOCH_TICKS + self.skew_ms * (TICKS_PER_SECOND / 1000) + virtual_ticks)
    }

    fn server_now(&self) -> ServerTime {
        ServerTime(EPOCH_SERVER_MS + self.time_ms() as i64)
    }

    async fn sleep(&self, duration: Duration) {
        // In simulation, sleep advances virtual time
        self.advance_time(duration);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
