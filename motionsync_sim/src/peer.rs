//! SimulatedPeer - runs a PeerRuntime in simulation.
//!
//! Bridges `motionsync_core::PeerRuntime` with the simulation infrastructure:
//! - Locomotion samples from the Oracle
//! - Overlap events from a per-peer [`ProximitySensor`]
//! - Inbound processing through the simulated transport

use crate::context::SimContext;
use crate::error::SimResult;
use crate::network::SimNetwork;
use crate::oracle::Oracle;
use crate::sensor::ProximitySensor;

use motionsync_core::{
    AvatarConfig, DetectionVolume, MotionCatalog, MotionId, MotionSynchronizer, PeerConfig,
    PeerRuntime, SyncMetrics,
};
use motionsync_env::{AvatarId, BroadcastTransport, PeerId, SyncContext, Timestamp};
use std::sync::Arc;

/// What one peer believes about one avatar's motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionView {
    pub motion: MotionId,
    pub started_at: Option<Timestamp>,
    pub volume_enabled: bool,
}

/// A simulated peer owning exactly one avatar.
pub struct SimulatedPeer {
    runtime: PeerRuntime<SimContext, SimNetwork>,

    /// Ground-truth position feed and overlap edges
    sensor: ProximitySensor,

    peer_id: PeerId,
    avatar: AvatarId,

    /// Spawn order, used for deterministic iteration and naming
    peer_index: u64,
}

impl SimulatedPeer {
    /// Creates a peer and spawns its own avatar.
    pub fn new(
        context: Arc<SimContext>,
        network: Arc<SimNetwork>,
        catalog: MotionCatalog,
        peer_index: u64,
        avatar: AvatarId,
        config: PeerConfig,
        avatar_config: AvatarConfig,
    ) -> SimResult<Self> {
        let peer_id = network.local_peer();
        let mut runtime = PeerRuntime::new(context, network, catalog, config);
        runtime
            .synchronizer_mut()
            .spawn_avatar(avatar, peer_id, avatar_config)?;

        Ok(Self {
            runtime,
            sensor: ProximitySensor::new(avatar),
            peer_id,
            avatar,
            peer_index,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn avatar(&self) -> AvatarId {
        self.avatar
    }

    pub fn peer_index(&self) -> u64 {
        self.peer_index
    }

    pub fn name(&self) -> &str {
        &self.runtime.config.name
    }

    /// Processes a single tick against the oracle's ground truth.
    pub fn tick(&mut self, oracle: &Oracle) -> u64 {
        let sample = oracle.locomotion(self.avatar);
        let events = self
            .sensor
            .scan_view(sample.position, self.runtime.synchronizer().avatars());
        self.runtime.tick(&sample, &events)
    }

    pub fn add_remote(&mut self, avatar: AvatarId, owner: PeerId, config: AvatarConfig) -> SimResult<()> {
        self.runtime
            .synchronizer_mut()
            .spawn_avatar(avatar, owner, config)?;
        Ok(())
    }

    pub fn remove_remote(&mut self, avatar: AvatarId) -> SimResult<()> {
        self.sensor.forget(avatar);
        self.runtime.synchronizer_mut().despawn_avatar(avatar)?;
        Ok(())
    }

    pub fn request_start(&mut self, motion: MotionId) -> SimResult<()> {
        let avatar = self.avatar;
        self.runtime.synchronizer_mut().request_start(avatar, motion)?;
        Ok(())
    }

    pub fn request_stop(&mut self) -> SimResult<()> {
        let avatar = self.avatar;
        self.runtime.synchronizer_mut().request_stop(avatar)?;
        Ok(())
    }

    /// This peer's view of `avatar`, if it knows it.
    pub fn view_of(&self, avatar: AvatarId) -> Option<MotionView> {
        let state = self.runtime.synchronizer().avatar(avatar).ok()?;
        Some(MotionView {
            motion: state.motion().motion(),
            started_at: state.motion().started_at(),
            volume_enabled: state.volume().is_enabled(),
        })
    }

    /// Offset derived from the start timestamp on this peer's clock.
    pub fn derived_offset(&self, avatar: AvatarId) -> Option<f64> {
        let sync = self.runtime.synchronizer();
        let now = self.runtime.context().now();
        sync.avatar(avatar)
            .ok()?
            .motion()
            .offset_at(sync.estimator(), now)
    }

    /// Offset the animation layer shows (mirrors blend toward replicas).
    pub fn displayed_offset(&self, avatar: AvatarId) -> Option<f64> {
        self.runtime.synchronizer().displayed_offset(avatar)
    }

    /// Source the local avatar currently follows.
    pub fn following(&self) -> Option<AvatarId> {
        self.runtime.synchronizer().registry().source_of(self.avatar)
    }

    pub fn metrics(&self) -> &SyncMetrics {
        self.runtime.synchronizer().metrics()
    }

    pub fn tick_count(&self) -> u64 {
        self.runtime.tick_count()
    }

    pub fn synchronizer(&self) -> &MotionSynchronizer<SimContext, SimNetwork> {
        self.runtime.synchronizer()
    }

    pub fn synchronizer_mut(&mut self) -> &mut MotionSynchronizer<SimContext, SimNetwork> {
        self.runtime.synchronizer_mut()
    }

    /// Clock skew of this peer against the session's server clock.
    pub fn clock_skew_ms(&self) -> i64 {
        self.runtime.context().skew_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn peer(seed: u64) -> SimulatedPeer {
        let context = SimContext::shared(seed);
        let network = Arc::new(SimNetwork::new_stub(PeerId::from_seed(seed)));
        SimulatedPeer::new(
            context,
            network,
            MotionCatalog::uniform(4, 2.0).unwrap(),
            0,
            AvatarId::from_seed(seed),
            PeerConfig::default(),
            AvatarConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_peer_owns_its_avatar() {
        let p = peer(1);
        assert!(p.synchronizer().avatar(p.avatar()).unwrap().is_local());
        assert_eq!(p.view_of(p.avatar()).unwrap().motion, MotionId::IDLE);
    }

    #[test]
    fn test_start_with_detached_transport_still_applies_locally() {
        let mut p = peer(1);
        let mut oracle = Oracle::new(1);
        oracle.spawn_body(p.avatar(), Vector3::zeros());
        p.tick(&oracle);

        p.request_start(MotionId(2)).unwrap();
        let view = p.view_of(p.avatar()).unwrap();
        assert_eq!(view.motion, MotionId(2));
        assert!(view.volume_enabled);
        assert!(p.metrics().transport_failures > 0);
    }

    #[test]
    fn test_remote_lifecycle() {
        let mut p = peer(1);
        let other = AvatarId::from_seed(2);
        p.add_remote(other, PeerId::from_seed(2), AvatarConfig::default()).unwrap();
        assert!(p.view_of(other).is_some());
        assert!(p.request_start(MotionId(9)).is_err());

        p.remove_remote(other).unwrap();
        assert!(p.view_of(other).is_none());
    }
}
