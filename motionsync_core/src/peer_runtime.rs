//! Peer Runtime - drives a MotionSynchronizer at a fixed tick rate.
//!
//! This module is the integration layer between the protocol engine and the
//! environment abstraction (`SyncContext`, `BroadcastTransport`).
//!
//! # Tick order
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      PeerRuntime::tick                    │
//! │  1. drain transport      → apply calls / replicas         │
//! │  2. locomotion sample    → transform, stop on movement    │
//! │  3. volume events        → proximity groups               │
//! │  4. every N ticks        → try_sync_to_neighbor           │
//! │  5. every M ticks        → replicate_local                │
//! │  6. always               → smooth mirrors                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use motionsync_core::peer_runtime::{PeerRuntime, PeerConfig};
//! use motionsync_env::TokioContext;
//!
//! let mut runtime = PeerRuntime::new(ctx, net, catalog, PeerConfig::default());
//! runtime.synchronizer_mut().spawn_avatar(me, peer, AvatarConfig::default())?;
//! runtime.run(&locomotion, 300).await;
//! ```

use crate::catalog::MotionCatalog;
use crate::locomotion::Locomotion;
use crate::synchronizer::MotionSynchronizer;
use crate::volume::VolumeEvent;
use motionsync_env::{BroadcastTransport, SyncContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Configuration for a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer's logical name (for logging)
    pub name: String,

    /// Tick rate in Hz (default: 30)
    pub tick_rate_hz: u32,

    /// Ticks between neighbor-sync attempts (default: 15, twice a second)
    pub sync_poll_interval_ticks: u64,

    /// Join nearby performances automatically (default: true)
    pub auto_sync: bool,

    /// Ticks between replication frames (default: 3, 10 Hz)
    pub replicate_interval_ticks: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "motionsync-peer".to_string(),
            tick_rate_hz: 30,
            sync_poll_interval_ticks: 15,
            auto_sync: true,
            replicate_interval_ticks: 3,
        }
    }
}

impl PeerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

/// A peer: one synchronizer plus its tick schedule.
pub struct PeerRuntime<Ctx, Net>
where
    Ctx: SyncContext,
    Net: BroadcastTransport,
{
    pub config: PeerConfig,
    context: Arc<Ctx>,
    synchronizer: MotionSynchronizer<Ctx, Net>,
    tick_count: u64,
}

impl<Ctx, Net> PeerRuntime<Ctx, Net>
where
    Ctx: SyncContext,
    Net: BroadcastTransport,
{
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, catalog: MotionCatalog, config: PeerConfig) -> Self {
        let synchronizer = MotionSynchronizer::new(context.clone(), network, catalog);
        Self::with_synchronizer(context, synchronizer, config)
    }

    pub fn with_synchronizer(
        context: Arc<Ctx>,
        synchronizer: MotionSynchronizer<Ctx, Net>,
        config: PeerConfig,
    ) -> Self {
        Self {
            config,
            context,
            synchronizer,
            tick_count: 0,
        }
    }

    pub fn synchronizer(&self) -> &MotionSynchronizer<Ctx, Net> {
        &self.synchronizer
    }

    pub fn synchronizer_mut(&mut self) -> &mut MotionSynchronizer<Ctx, Net> {
        &mut self.synchronizer
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    fn due(&self, interval: u64) -> bool {
        interval > 0 && self.tick_count % interval == 0
    }

    /// Runs one tick. Returns the new tick count.
    pub fn tick<L>(&mut self, locomotion: &L, events: &[VolumeEvent]) -> u64
    where
        L: Locomotion + ?Sized,
    {
        self.tick_count += 1;
        let name = &self.config.name;

        self.synchronizer.process_inbound();

        if let Err(e) = self.synchronizer.apply_locomotion(locomotion.sample()) {
            warn!(peer = %name, error = %e, "locomotion update failed");
        }

        for event in events {
            self.synchronizer.on_volume_event(*event);
        }

        if self.config.auto_sync && self.due(self.config.sync_poll_interval_ticks) {
            if let Err(e) = self.synchronizer.try_sync_to_neighbor() {
                warn!(peer = %name, error = %e, "neighbor sync failed");
            }
        }

        if self.due(self.config.replicate_interval_ticks) {
            if let Err(e) = self.synchronizer.replicate_local() {
                warn!(peer = %name, error = %e, "replication failed");
            }
        }

        let dt = 1.0 / self.config.tick_rate_hz.max(1) as f64;
        self.synchronizer.on_tick(dt);

        self.tick_count
    }

    /// Ticks `ticks` times, sleeping one tick period in between.
    pub async fn run<L>(&mut self, locomotion: &L, ticks: u64)
    where
        L: Locomotion + ?Sized,
    {
        let period = self.config.tick_duration();
        for _ in 0..ticks {
            self.tick(locomotion, &[]);
            self.context.sleep(period).await;
        }
    }
}
