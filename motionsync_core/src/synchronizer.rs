//! The "SYNC" Engine - motion-state replication between peers.
//!
//! Owns every avatar known to this peer and is the only writer of their
//! [`MotionState`](crate::MotionState). State changes reach it from three
//! directions:
//!
//! 1. **Local requests** (`request_start`, `request_stop`, movement): owner only.
//! 2. **Buffered calls** from the transport (`on_receive`): any origin,
//!    applied the same way whether they loop back from this peer or not.
//! 3. **Proximity** (`on_volume_event`, `try_sync_to_neighbor`): the local
//!    avatar copies the timeline of the oldest performer it overlaps and
//!    keeps following it until it acts on its own.
//!
//! ```text
//!  request_start ──► issue_motion ──► transport.call(All) ──► every peer
//!                         │                                       │
//!                         └──► apply_motion ◄──── on_receive ◄────┘
//!                                   │
//!                                   ├─► volume on/off (+ ColliderToggle)
//!                                   ├─► registry.deactivate (volume off)
//!                                   └─► propagate_change ─► followers re-issue
//! ```

use crate::avatar::{Authority, Avatar, AvatarConfig, ReplicaPhase};
use crate::catalog::{MotionCatalog, MotionId};
use crate::clock::ClockOffsetEstimator;
use crate::error::{SyncError, SyncResult};
use crate::locomotion::LocomotionSample;
use crate::messages::{self, MotionCall, ReplicatedState, VolumeToggle};
use crate::metrics::SyncMetrics;
use crate::motion_state::Transition;
use crate::proximity::DiscoveryRegistry;
use crate::volume::{DetectionVolume, VolumeEvent};
use motionsync_env::{
    AvatarId, BroadcastTransport, BufferedCall, CallKind, CallTarget, Inbound, PeerId,
    ReplicationFrame, SyncContext,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Per-peer motion synchronization engine.
///
/// Generic over the context and transport so the same code runs against a
/// live session or inside the simulator.
pub struct MotionSynchronizer<Ctx, Net>
where
    Ctx: SyncContext,
    Net: BroadcastTransport,
{
    context: Arc<Ctx>,
    network: Arc<Net>,
    catalog: MotionCatalog,
    estimator: ClockOffsetEstimator,
    registry: DiscoveryRegistry,
    avatars: HashMap<AvatarId, Avatar>,
    local_avatar: Option<AvatarId>,
    next_seq: u64,
    metrics: SyncMetrics,
}

impl<Ctx, Net> MotionSynchronizer<Ctx, Net>
where
    Ctx: SyncContext,
    Net: BroadcastTransport,
{
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, catalog: MotionCatalog) -> Self {
        Self {
            context,
            network,
            catalog,
            estimator: ClockOffsetEstimator::default(),
            registry: DiscoveryRegistry::new(),
            avatars: HashMap::new(),
            local_avatar: None,
            next_seq: 0,
            metrics: SyncMetrics::default(),
        }
    }

    /// Replaces the clock resolution used for offset derivation.
    pub fn with_estimator(mut self, estimator: ClockOffsetEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn local_peer(&self) -> PeerId {
        self.network.local_peer()
    }

    pub fn local_avatar(&self) -> Option<AvatarId> {
        self.local_avatar
    }

    pub fn avatar(&self, id: AvatarId) -> SyncResult<&Avatar> {
        self.avatars.get(&id).ok_or(SyncError::UnknownAvatar(id))
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn catalog(&self) -> &MotionCatalog {
        &self.catalog
    }

    pub fn estimator(&self) -> &ClockOffsetEstimator {
        &self.estimator
    }

    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn motion_of(&self, id: AvatarId) -> Option<MotionId> {
        self.avatars.get(&id).map(|a| a.motion.motion())
    }

    /// Phase the animation layer should show for `id` right now.
    pub fn displayed_offset(&self, id: AvatarId) -> Option<f64> {
        let now = self.context.now();
        self.avatars
            .get(&id)
            .and_then(|a| a.displayed_offset(&self.estimator, now))
    }

    fn is_local(&self, id: AvatarId) -> bool {
        self.avatars.get(&id).map_or(false, Avatar::is_local)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Adds an avatar. Its authority follows from `owner`.
    ///
    /// A peer owns at most one avatar. Spawning a known avatar again is a
    /// no-op that reports the existing authority.
    pub fn spawn_avatar(
        &mut self,
        id: AvatarId,
        owner: PeerId,
        config: AvatarConfig,
    ) -> SyncResult<Authority> {
        if let Some(existing) = self.avatars.get(&id) {
            return Ok(existing.authority());
        }
        let authority = if owner == self.network.local_peer() {
            Authority::Local
        } else {
            Authority::Remote
        };
        if authority == Authority::Local {
            if let Some(current) = self.local_avatar {
                return Err(SyncError::LocalAvatarExists(current));
            }
            self.local_avatar = Some(id);
        }

        self.avatars
            .insert(id, Avatar::new(id, owner, authority, config));
        self.registry.register(id);
        debug!(avatar = %id, owner = %owner, ?authority, "avatar spawned");
        Ok(authority)
    }

    /// Removes an avatar (its peer left).
    ///
    /// Followers of the departed avatar keep their current motion but stop
    /// following.
    pub fn despawn_avatar(&mut self, id: AvatarId) -> SyncResult<()> {
        self.avatars.remove(&id).ok_or(SyncError::UnknownAvatar(id))?;
        let orphaned = self.registry.unregister(id);
        if self.local_avatar == Some(id) {
            self.local_avatar = None;
        }
        debug!(avatar = %id, orphaned = orphaned.len(), "avatar despawned");
        Ok(())
    }

    // ========================================================================
    // LOCAL REQUESTS
    // ========================================================================

    fn authorize(&mut self, id: AvatarId) -> SyncResult<()> {
        let avatar = self.avatars.get(&id).ok_or(SyncError::UnknownAvatar(id))?;
        if !avatar.is_local() {
            self.metrics.rejected += 1;
            warn!(avatar = %id, "mutation refused: not the owner");
            return Err(SyncError::unauthorized(id));
        }
        Ok(())
    }

    /// Starts `motion` on an owned avatar with a fresh start timestamp.
    ///
    /// Restarting the motion already playing restarts it from zero. The idle
    /// sentinel is treated as a stop.
    pub fn request_start(&mut self, id: AvatarId, motion: MotionId) -> SyncResult<()> {
        self.authorize(id)?;
        if motion.is_idle() {
            return self.request_stop(id);
        }
        if self.avatars.get(&id).map_or(false, Avatar::is_moving) {
            self.metrics.rejected += 1;
            debug!(avatar = %id, "start refused while moving");
            return Err(SyncError::AvatarMoving(id));
        }
        let clip_duration = self.catalog.clip_duration(motion)?;

        self.registry.unfollow(id);
        let started_at = self.context.now();
        self.issue_motion(id, MotionCall::start(motion, clip_duration, started_at))
    }

    /// Returns an owned avatar to idle.
    pub fn request_stop(&mut self, id: AvatarId) -> SyncResult<()> {
        self.authorize(id)?;
        self.registry.unfollow(id);
        self.issue_motion(id, MotionCall::stop())
    }

    /// Feeds the local movement intent. Moving while performing stops.
    pub fn on_movement(&mut self, moving: bool) -> SyncResult<()> {
        let Some(id) = self.local_avatar else {
            return Ok(());
        };
        let performing = match self.avatars.get_mut(&id) {
            Some(avatar) => {
                avatar.moving = moving;
                avatar.motion.is_active()
            }
            None => return Ok(()),
        };
        if moving && performing {
            debug!(avatar = %id, "movement interrupts motion");
            self.request_stop(id)?;
        }
        Ok(())
    }

    /// Applies a locomotion frame to the local avatar.
    pub fn apply_locomotion(&mut self, sample: LocomotionSample) -> SyncResult<()> {
        let Some(id) = self.local_avatar else {
            return Ok(());
        };
        if let Some(avatar) = self.avatars.get_mut(&id) {
            avatar.transform.snap(sample.position, sample.rotation);
            avatar.walk_intensity = sample.walk_intensity;
        }
        self.on_movement(sample.is_moving)
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn send_call(&mut self, call: BufferedCall, target: CallTarget) {
        let kind = call.kind;
        match self.network.call(call, target) {
            Ok(()) => self.metrics.calls_issued += 1,
            Err(e) => {
                self.metrics.transport_failures += 1;
                warn!(?kind, error = %e, "buffered call failed");
            }
        }
    }

    /// Broadcasts a motion call for an owned avatar, applies it locally, then
    /// announces the resulting volume state.
    fn issue_motion(&mut self, id: AvatarId, call: MotionCall) -> SyncResult<()> {
        let kind = if call.is_stop() {
            CallKind::Stop
        } else {
            CallKind::Start
        };
        let payload = messages::encode(&call)?;
        let seq = self.bump_seq();
        self.send_call(BufferedCall::new(id, kind, seq, payload), CallTarget::All);
        self.apply_motion(id, &call, seq);

        let enabled = self
            .avatars
            .get(&id)
            .map_or(false, |a| a.motion.is_active());
        let toggle = messages::encode(&VolumeToggle { enabled })?;
        let toggle_seq = self.bump_seq();
        if let Some(avatar) = self.avatars.get_mut(&id) {
            avatar.last_volume_seq = Some(toggle_seq);
        }
        self.send_call(
            BufferedCall::new(id, CallKind::ColliderToggle, toggle_seq, toggle),
            CallTarget::All,
        );
        Ok(())
    }

    // ========================================================================
    // APPLICATION
    // ========================================================================

    fn apply_motion(&mut self, id: AvatarId, call: &MotionCall, seq: u64) -> Option<Transition> {
        let Some(avatar) = self.avatars.get_mut(&id) else {
            self.metrics.unroutable += 1;
            return None;
        };
        let transition = avatar.motion.apply(call, seq);
        match transition {
            Transition::Stale => {
                self.metrics.stale += 1;
                trace!(avatar = %id, seq, "stale motion call dropped");
                return Some(transition);
            }
            Transition::Unchanged => {
                self.metrics.duplicates += 1;
                trace!(avatar = %id, seq, "motion call already applied");
                return Some(transition);
            }
            _ => {}
        }
        self.metrics.transitions_applied += 1;

        let active = avatar.motion.is_active();
        avatar.volume.set_enabled(active);
        if !active {
            avatar.replica = None;
        }
        debug!(avatar = %id, motion = %call.motion, ?transition, seq, "motion applied");

        if !active {
            let observers = self.registry.deactivate(id);
            if !observers.is_empty() {
                debug!(avatar = %id, observers = observers.len(), "groups torn down");
            }
        }
        self.propagate_change(id);
        Some(transition)
    }

    /// Re-issues `source`'s new timeline for every locally owned follower.
    fn propagate_change(&mut self, source: AvatarId) {
        let followers = self.registry.followers_of(source);
        if followers.is_empty() {
            return;
        }
        let Some(timeline) = self.avatars.get(&source).map(|a| a.motion.timeline()) else {
            return;
        };

        for follower in followers {
            if !self.is_local(follower) {
                continue;
            }
            if timeline.is_stop() {
                self.registry.unfollow(follower);
            } else if self
                .avatars
                .get(&follower)
                .map_or(false, |a| a.motion.timeline() == timeline)
            {
                continue;
            }
            self.metrics.propagations += 1;
            debug!(follower = %follower, source = %source, motion = %timeline.motion, "following source change");
            if let Err(e) = self.issue_motion(follower, timeline) {
                warn!(follower = %follower, error = %e, "propagation failed");
            }
        }
    }

    /// Routes one buffered call from the transport.
    pub fn on_receive(&mut self, call: BufferedCall) {
        if !self.avatars.contains_key(&call.origin) {
            self.metrics.unroutable += 1;
            trace!(origin = %call.origin, "call for unknown avatar");
            return;
        }
        match call.kind {
            CallKind::Start => match messages::decode::<MotionCall>(&call.payload) {
                Ok(motion) => self.on_receive_start(call.origin, motion, call.seq),
                Err(e) => self.decode_failed(call.origin, e),
            },
            CallKind::Stop => self.on_receive_stop(call.origin, call.seq),
            CallKind::ColliderToggle => match messages::decode::<VolumeToggle>(&call.payload) {
                Ok(toggle) => self.on_receive_volume(call.origin, toggle, call.seq),
                Err(e) => self.decode_failed(call.origin, e),
            },
        }
    }

    fn decode_failed(&mut self, origin: AvatarId, error: SyncError) {
        self.metrics.decode_failures += 1;
        warn!(origin = %origin, error = %error, "undecodable payload dropped");
    }

    /// Applies a received start. The idle sentinel means stop.
    pub fn on_receive_start(&mut self, origin: AvatarId, call: MotionCall, seq: u64) {
        if call.is_stop() {
            self.on_receive_stop(origin, seq);
            return;
        }
        if !call.clip_duration.is_finite() || call.clip_duration <= 0.0 {
            self.metrics.decode_failures += 1;
            warn!(origin = %origin, duration = call.clip_duration, "start with invalid clip duration dropped");
            return;
        }
        self.apply_motion(origin, &call, seq);
    }

    pub fn on_receive_stop(&mut self, origin: AvatarId, seq: u64) {
        self.apply_motion(origin, &MotionCall::stop(), seq);
    }

    /// Applies a volume beacon when it agrees with the known motion state.
    fn on_receive_volume(&mut self, origin: AvatarId, toggle: VolumeToggle, seq: u64) {
        let Some(avatar) = self.avatars.get_mut(&origin) else {
            self.metrics.unroutable += 1;
            return;
        };
        if let Some(last) = avatar.last_volume_seq {
            if seq <= last {
                self.metrics.duplicates += 1;
                return;
            }
        }
        avatar.last_volume_seq = Some(seq);

        if toggle.enabled != avatar.motion.is_active() {
            self.metrics.stale += 1;
            trace!(origin = %origin, enabled = toggle.enabled, "volume beacon disagrees with motion state");
            return;
        }
        avatar.volume.set_enabled(toggle.enabled);
        if !toggle.enabled {
            self.registry.deactivate(origin);
        }
    }

    // ========================================================================
    // PROXIMITY
    // ========================================================================

    pub fn on_volume_event(&mut self, event: VolumeEvent) -> bool {
        match event {
            VolumeEvent::Enter { observer, other } => self.on_overlap_enter(observer, other),
            VolumeEvent::Exit { observer, other } => self.on_overlap_exit(observer, other),
        }
    }

    /// `observer` entered `other`'s volume. Returns true if it joined the group.
    pub fn on_overlap_enter(&mut self, observer: AvatarId, other: AvatarId) -> bool {
        let other_active = self.avatars.get(&other).map_or(false, |a| a.motion.is_active());
        let observer_idle = self.avatars.get(&observer).map_or(false, |a| !a.motion.is_active());
        let joined = self
            .registry
            .try_join_group(observer, other, other_active, observer_idle);
        if joined {
            debug!(observer = %observer, other = %other, "joined group");
        }
        joined
    }

    /// `observer` left `other`'s volume. Leaving the source also ends following.
    pub fn on_overlap_exit(&mut self, observer: AvatarId, other: AvatarId) -> bool {
        let left = self.registry.leave_group(observer, other);
        if left {
            debug!(observer = %observer, other = %other, "left group");
            if self.registry.source_of(observer) == Some(other) {
                self.registry.unfollow(observer);
                debug!(observer = %observer, source = %other, "stopped following");
            }
        }
        left
    }

    /// Adopts the default source's timeline for the idle local avatar.
    ///
    /// The source's `(motion, duration, start)` is copied verbatim, so both
    /// avatars derive their offset from the same start timestamp. Returns
    /// the source that was joined, if any.
    pub fn try_sync_to_neighbor(&mut self) -> SyncResult<Option<AvatarId>> {
        let Some(local) = self.local_avatar else {
            return Ok(None);
        };
        let avatar = self.avatar(local)?;
        if avatar.motion.is_active() || avatar.is_moving() {
            return Ok(None);
        }
        let Some(source) = self.registry.default_source(local) else {
            return Ok(None);
        };
        let timeline = match self.avatars.get(&source) {
            Some(a) if a.motion.is_active() => a.motion.timeline(),
            _ => return Ok(None),
        };
        self.catalog.clip_duration(timeline.motion)?;

        self.registry.follow(local, source);
        self.metrics.neighbor_syncs += 1;
        debug!(avatar = %local, source = %source, motion = %timeline.motion, "synced to neighbor");
        self.issue_motion(local, timeline)?;
        Ok(Some(source))
    }

    // ========================================================================
    // REPLICATION
    // ========================================================================

    /// Sends the owned avatar's per-tick mirror frame.
    pub fn replicate_local(&mut self) -> SyncResult<()> {
        let Some(local) = self.local_avatar else {
            return Ok(());
        };
        let avatar = self.avatar(local)?;
        let state = ReplicatedState {
            position: avatar.transform.position(),
            rotation: avatar.transform.rotation(),
            walk_intensity: avatar.walk_intensity,
            motion: avatar.motion.motion(),
            offset: avatar
                .motion
                .offset_at(&self.estimator, self.context.now())
                .unwrap_or(0.0),
        };
        let frame = ReplicationFrame {
            origin: local,
            sent_at: self.context.server_now(),
            payload: messages::encode(&state)?,
        };
        match self.network.replicate(frame) {
            Ok(()) => self.metrics.replicas_sent += 1,
            Err(e) => {
                self.metrics.transport_failures += 1;
                warn!(error = %e, "replication failed");
            }
        }
        Ok(())
    }

    /// Mirrors a received frame onto a remote avatar.
    ///
    /// Motion state itself only changes through buffered calls; the frame's
    /// offset only refines the displayed phase.
    pub fn on_replica(&mut self, frame: ReplicationFrame) {
        let state: ReplicatedState = match messages::decode(&frame.payload) {
            Ok(state) => state,
            Err(e) => return self.decode_failed(frame.origin, e),
        };
        let received_at = self.context.server_now();
        let now = self.context.now();
        let estimator = self.estimator;

        let Some(avatar) = self.avatars.get_mut(&frame.origin) else {
            self.metrics.unroutable += 1;
            return;
        };
        if avatar.is_local() {
            return;
        }
        self.metrics.replicas_received += 1;
        avatar.transform.set_target(state.position, state.rotation);
        avatar.walk_intensity = state.walk_intensity;

        avatar.replica = match avatar.motion.clip_duration() {
            Some(clip) if state.motion == avatar.motion.motion() => Some(ReplicaPhase {
                motion: state.motion,
                offset: estimator.corrected_offset(state.offset, frame.sent_at, received_at, clip),
                received_at: now,
            }),
            _ => None,
        };
    }

    /// Routes anything the transport delivered.
    pub fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Call(call) => self.on_receive(call),
            Inbound::Replica(frame) => self.on_replica(frame),
        }
    }

    /// Drains and applies the transport inbox. Returns the message count.
    pub fn process_inbound(&mut self) -> usize {
        let inbound = self.network.drain();
        let count = inbound.len();
        for message in inbound {
            self.handle_inbound(message);
        }
        count
    }

    /// Smooths every mirrored transform toward its last target.
    pub fn on_tick(&mut self, dt: f64) {
        for avatar in self.avatars.values_mut().filter(|a| !a.is_local()) {
            let (damping, rotation) = (avatar.config().damping_rate, avatar.config().rotation_speed);
            avatar.transform.smooth(damping, rotation, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingTransport, TestContext};
    use approx::assert_relative_eq;
    use motionsync_env::Timestamp;

    type TestSync = MotionSynchronizer<TestContext, RecordingTransport>;

    struct Fixture {
        ctx: Arc<TestContext>,
        net: Arc<RecordingTransport>,
        sync: TestSync,
        me: AvatarId,
    }

    fn fixture() -> Fixture {
        let ctx = Arc::new(TestContext::new(1000));
        let net = Arc::new(RecordingTransport::new(PeerId::from_seed(1)));
        let catalog = MotionCatalog::new(vec![2.0, 4.0, 1.0, 3.0, 2.5, 2.0]).unwrap();
        let mut sync = MotionSynchronizer::new(ctx.clone(), net.clone(), catalog)
            .with_estimator(ClockOffsetEstimator::new(1000));
        let me = AvatarId::from_seed(1);
        sync.spawn_avatar(me, PeerId::from_seed(1), AvatarConfig::default())
            .unwrap();
        Fixture { ctx, net, sync, me }
    }

    fn remote(f: &mut Fixture, seed: u64) -> AvatarId {
        let id = AvatarId::from_seed(seed);
        f.sync
            .spawn_avatar(id, PeerId::from_seed(seed), AvatarConfig::default())
            .unwrap();
        id
    }

    fn start_call(origin: AvatarId, motion: i32, t0: i64, seq: u64) -> BufferedCall {
        let payload = messages::encode(&MotionCall::start(MotionId(motion), 2.0, Timestamp(t0))).unwrap();
        BufferedCall::new(origin, CallKind::Start, seq, payload)
    }

    fn stop_call(origin: AvatarId, seq: u64) -> BufferedCall {
        let payload = messages::encode(&MotionCall::stop()).unwrap();
        BufferedCall::new(origin, CallKind::Stop, seq, payload)
    }

    #[test]
    fn test_spawn_authority() {
        let mut f = fixture();
        assert_eq!(f.sync.local_avatar(), Some(f.me));
        let other = remote(&mut f, 2);
        assert_eq!(f.sync.avatar(other).unwrap().authority(), Authority::Remote);

        let second = f.sync.spawn_avatar(
            AvatarId::from_seed(50),
            PeerId::from_seed(1),
            AvatarConfig::default(),
        );
        assert!(matches!(second, Err(SyncError::LocalAvatarExists(_))));
    }

    #[test]
    fn test_request_start_broadcasts_and_applies() {
        let mut f = fixture();
        f.ctx.set_now(1000);
        f.sync.request_start(f.me, MotionId(0)).unwrap();

        let calls = f.net.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.kind, CallKind::Start);
        assert_eq!(calls[0].1, CallTarget::All);
        assert_eq!(calls[1].0.kind, CallKind::ColliderToggle);

        let avatar = f.sync.avatar(f.me).unwrap();
        assert!(avatar.motion().is_active());
        assert!(avatar.volume().is_enabled());
        assert_eq!(avatar.motion().started_at(), Some(Timestamp(1000)));

        f.ctx.set_now(3500);
        assert_relative_eq!(f.sync.displayed_offset(f.me).unwrap(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_loopback_is_idempotent() {
        let mut f = fixture();
        f.sync.request_start(f.me, MotionId(1)).unwrap();
        let before = f.sync.avatar(f.me).unwrap().motion().clone();
        for (call, _) in f.net.calls() {
            f.sync.on_receive(call.clone());
            f.sync.on_receive(call);
        }
        let after = f.sync.avatar(f.me).unwrap().motion();
        assert_eq!(after.phase(), before.phase());
        assert_eq!(f.sync.metrics().transitions_applied, 1);
        assert_eq!(f.sync.metrics().duplicates, 4);
    }

    #[test]
    fn test_non_owner_cannot_mutate() {
        let mut f = fixture();
        let other = remote(&mut f, 2);
        f.sync.on_receive(start_call(other, 0, 100, 1));

        let err = f.sync.request_stop(other).unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert!(f.sync.request_start(other, MotionId(2)).is_err());

        assert_eq!(f.sync.motion_of(other), Some(MotionId(0)));
        assert!(f.net.calls().is_empty());
        assert_eq!(f.sync.metrics().rejected, 2);
    }

    #[test]
    fn test_unknown_motion_aborts() {
        let mut f = fixture();
        let err = f.sync.request_start(f.me, MotionId(42)).unwrap_err();
        assert!(matches!(err, SyncError::UnknownMotion(42)));
        assert!(!f.sync.avatar(f.me).unwrap().motion().is_active());
        assert!(f.net.calls().is_empty());
    }

    #[test]
    fn test_restart_issues_fresh_timestamp() {
        let mut f = fixture();
        f.ctx.set_now(100);
        f.sync.request_start(f.me, MotionId(0)).unwrap();
        f.ctx.set_now(900);
        f.sync.request_start(f.me, MotionId(0)).unwrap();
        assert_eq!(
            f.sync.avatar(f.me).unwrap().motion().started_at(),
            Some(Timestamp(900))
        );
    }

    #[test]
    fn test_stop_overtaking_start_ends_idle() {
        let mut f = fixture();
        let other = remote(&mut f, 2);
        f.sync.on_receive(stop_call(other, 2));
        f.sync.on_receive(start_call(other, 0, 100, 1));
        assert_eq!(f.sync.motion_of(other), Some(MotionId::IDLE));
        assert_eq!(f.sync.metrics().stale, 1);
    }

    #[test]
    fn test_idle_sentinel_in_start() {
        let mut f = fixture();
        let other = remote(&mut f, 2);
        f.sync.on_receive(start_call(other, 3, 100, 1));
        f.sync.on_receive(start_call(other, -1, 100, 2));
        let avatar = f.sync.avatar(other).unwrap();
        assert!(!avatar.motion().is_active());
        assert!(!avatar.volume().is_enabled());
    }

    #[test]
    fn test_neighbor_join_copies_timeline() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        let payload = messages::encode(&MotionCall::start(MotionId(5), 2.0, Timestamp(500))).unwrap();
        f.sync.on_receive(BufferedCall::new(b, CallKind::Start, 1, payload));

        assert!(f.sync.on_volume_event(VolumeEvent::Enter { observer: f.me, other: b }));
        assert_eq!(f.sync.try_sync_to_neighbor().unwrap(), Some(b));

        let (call, target) = f.net.calls().remove(0);
        assert_eq!(target, CallTarget::All);
        let sent: MotionCall = messages::decode(&call.payload).unwrap();
        assert_eq!(sent.motion, MotionId(5));
        assert_eq!(sent.started_at, Timestamp(500));
        assert_eq!(f.sync.registry().source_of(f.me), Some(b));
    }

    #[test]
    fn test_sync_uses_first_discovered() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        let c = remote(&mut f, 3);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_receive(start_call(c, 2, 700, 1));
        f.sync.on_overlap_enter(f.me, b);
        f.sync.on_overlap_enter(f.me, c);

        f.sync.try_sync_to_neighbor().unwrap();
        assert_eq!(f.sync.motion_of(f.me), Some(MotionId(1)));
    }

    #[test]
    fn test_no_sync_while_performing_or_moving() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_overlap_enter(f.me, b);

        f.sync.on_movement(true).unwrap();
        assert_eq!(f.sync.try_sync_to_neighbor().unwrap(), None);
        f.sync.on_movement(false).unwrap();

        f.sync.request_start(f.me, MotionId(2)).unwrap();
        assert_eq!(f.sync.try_sync_to_neighbor().unwrap(), None);
        assert_eq!(f.sync.motion_of(f.me), Some(MotionId(2)));
    }

    #[test]
    fn test_performer_does_not_discover() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.request_start(f.me, MotionId(0)).unwrap();
        f.sync.on_receive(start_call(b, 1, 100, 1));
        assert!(!f.sync.on_overlap_enter(f.me, b));
    }

    #[test]
    fn test_source_stop_tears_down_group_and_stops_follower() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_overlap_enter(f.me, b);
        f.sync.try_sync_to_neighbor().unwrap();
        assert!(f.sync.avatar(f.me).unwrap().motion().is_active());

        f.sync.on_receive(stop_call(b, 2));
        assert!(f.sync.registry().group(f.me).is_empty());
        assert!(!f.sync.avatar(f.me).unwrap().motion().is_active());
        assert_eq!(f.sync.registry().source_of(f.me), None);
        assert_eq!(f.sync.metrics().propagations, 1);
    }

    #[test]
    fn test_source_switch_propagates() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_overlap_enter(f.me, b);
        f.sync.try_sync_to_neighbor().unwrap();

        f.sync.on_receive(start_call(b, 3, 2000, 2));
        let avatar = f.sync.avatar(f.me).unwrap();
        assert_eq!(avatar.motion().motion(), MotionId(3));
        assert_eq!(avatar.motion().started_at(), Some(Timestamp(2000)));
    }

    #[test]
    fn test_own_start_breaks_follow() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_overlap_enter(f.me, b);
        f.sync.try_sync_to_neighbor().unwrap();

        f.sync.request_start(f.me, MotionId(4)).unwrap();
        assert_eq!(f.sync.registry().source_of(f.me), None);
        f.sync.on_receive(stop_call(b, 2));
        assert_eq!(f.sync.motion_of(f.me), Some(MotionId(4)));
    }

    #[test]
    fn test_leaving_source_volume_breaks_follow() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_overlap_enter(f.me, b);
        assert_eq!(f.sync.try_sync_to_neighbor().unwrap(), Some(b));

        assert!(f.sync.on_overlap_exit(f.me, b));
        assert_eq!(f.sync.registry().source_of(f.me), None);

        f.sync.on_receive(start_call(b, 4, 900, 2));
        let mine = f.sync.avatar(f.me).unwrap().motion();
        assert_eq!(mine.motion(), MotionId(1));
        assert_eq!(mine.started_at(), Some(Timestamp(100)));
    }

    #[test]
    fn test_idle_request_while_moving_stops() {
        let mut f = fixture();
        f.sync.request_start(f.me, MotionId(2)).unwrap();
        f.sync.avatars.get_mut(&f.me).unwrap().moving = true;

        f.sync.request_start(f.me, MotionId::IDLE).unwrap();
        assert_eq!(f.sync.motion_of(f.me), Some(MotionId::IDLE));
        assert_eq!(f.sync.metrics().rejected, 0);
    }

    #[test]
    fn test_movement_stops_motion() {
        let mut f = fixture();
        f.sync.request_start(f.me, MotionId(0)).unwrap();
        f.net.clear();
        f.sync.on_movement(true).unwrap();
        assert!(!f.sync.avatar(f.me).unwrap().motion().is_active());
        assert_eq!(f.net.calls()[0].0.kind, CallKind::Stop);

        let err = f.sync.request_start(f.me, MotionId(0)).unwrap_err();
        assert!(matches!(err, SyncError::AvatarMoving(_)));
    }

    #[test]
    fn test_inconsistent_volume_beacon_ignored() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        let payload = messages::encode(&VolumeToggle { enabled: true }).unwrap();
        f.sync
            .on_receive(BufferedCall::new(b, CallKind::ColliderToggle, 5, payload));
        assert!(!f.sync.avatar(b).unwrap().volume().is_enabled());
        assert_eq!(f.sync.metrics().stale, 1);
    }

    #[test]
    fn test_despawn_orphans_follower() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 1, 100, 1));
        f.sync.on_overlap_enter(f.me, b);
        f.sync.try_sync_to_neighbor().unwrap();

        f.sync.despawn_avatar(b).unwrap();
        assert_eq!(f.sync.registry().source_of(f.me), None);
        assert_eq!(f.sync.motion_of(f.me), Some(MotionId(1)));
        assert!(matches!(f.sync.despawn_avatar(b), Err(SyncError::UnknownAvatar(_))));
    }

    #[test]
    fn test_replica_corrects_phase() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync.on_receive(start_call(b, 0, 0, 1));

        let state = ReplicatedState {
            position: nalgebra::Vector3::new(1.0, 0.0, 0.0),
            rotation: nalgebra::UnitQuaternion::identity(),
            walk_intensity: 0.3,
            motion: MotionId(0),
            offset: 0.5,
        };
        f.ctx.set_server(10_200);
        f.sync.on_replica(ReplicationFrame {
            origin: b,
            sent_at: motionsync_env::ServerTime(10_000),
            payload: messages::encode(&state).unwrap(),
        });
        let replica = f.sync.avatar(b).unwrap().replica().copied().unwrap();
        // 0.5 + 0.2s / 2s
        assert_relative_eq!(replica.offset, 0.6, epsilon = 1e-9);
        assert_eq!(f.sync.avatar(b).unwrap().walk_intensity(), 0.3);
        assert_eq!(f.sync.metrics().replicas_received, 1);
    }

    #[test]
    fn test_garbage_payload_counted() {
        let mut f = fixture();
        let b = remote(&mut f, 2);
        f.sync
            .on_receive(BufferedCall::new(b, CallKind::Start, 1, b"\x00\x01".to_vec()));
        assert_eq!(f.sync.metrics().decode_failures, 1);
        f.sync.on_receive(start_call(AvatarId::from_seed(77), 0, 0, 1));
        assert_eq!(f.sync.metrics().unroutable, 1);
    }

    #[test]
    fn test_transport_failure_not_surfaced() {
        let mut f = fixture();
        f.net.fail_sends(true);
        f.sync.request_start(f.me, MotionId(0)).unwrap();
        assert!(f.sync.avatar(f.me).unwrap().motion().is_active());
        assert_eq!(f.sync.metrics().transport_failures, 2);
    }
}
