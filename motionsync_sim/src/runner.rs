//! Scenario runner - executes simulation scenarios.
//!
//! Every scenario builds a fresh [`SimWorld`] from the runner's seed, drives
//! a script against it, and checks what every peer ended up believing.

use crate::error::{ensure, SimError, SimResult};
use crate::exporter::SimExport;
use crate::peer::{MotionView, SimulatedPeer};
use crate::router::RouterStats;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use motionsync_core::{messages, phase_distance, AvatarConfig, MotionCall, MotionId, SyncError, SyncMetrics};
use motionsync_env::{AvatarId, BufferedCall, CallKind, CallTarget, PeerId, Timestamp};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Number of connected peers at end
    pub final_peer_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Protocol counters summed over all peers
    pub sync: SyncMetrics,

    /// Router counters
    pub router: RouterStats,

    /// Worst spread of one avatar's displayed phase across peers, at the end
    pub max_phase_spread: f64,

    /// Worst displayed phase error against the owner (clock skew scenario)
    pub max_phase_error: f64,
}

/// A world plus the run's bookkeeping.
struct Stage {
    world: SimWorld,
    export: Option<SimExport>,
    frame_interval: u64,
    max_phase_error: f64,
}

impl Stage {
    fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.world.tick();
            if let Some(export) = self.export.as_mut() {
                if self.world.tick_count() % self.frame_interval == 0 {
                    export.add_frame(self.world.snapshot_frame());
                }
            }
        }
    }

    /// Ticks until every view has matched its owner for `quiet_ticks` in a
    /// row. Returns false if that never happens within `max_ticks`.
    fn settle(&mut self, quiet_ticks: u64, max_ticks: u64) -> bool {
        let mut quiet = 0;
        for _ in 0..max_ticks {
            self.advance(1);
            if self.world.is_converged() {
                quiet += 1;
                if quiet >= quiet_ticks {
                    return true;
                }
            } else {
                quiet = 0;
            }
        }
        false
    }

    fn ticks(&self, secs: f64) -> u64 {
        (secs * self.world.config.tick_rate_hz as f64).round() as u64
    }

    fn peer(&self, peer: PeerId) -> SimResult<&SimulatedPeer> {
        self.world.peer(peer)
    }

    /// The owner's view of its own avatar.
    fn own_view(&self, peer: PeerId) -> SimResult<MotionView> {
        let p = self.world.peer(peer)?;
        p.view_of(p.avatar())
            .ok_or_else(|| SimError::assertion(format!("{} lost its own avatar", peer)))
    }

    fn view(&self, viewer: PeerId, avatar: AvatarId) -> SimResult<MotionView> {
        self.world
            .peer(viewer)?
            .view_of(avatar)
            .ok_or_else(|| SimError::assertion(format!("{} does not know {}", viewer, avatar)))
    }

    fn ensure_converged(&self) -> SimResult<()> {
        let divergences = self.world.divergences();
        ensure(divergences.is_empty(), || divergences.join("; "))
    }
}

/// Runs simulation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of peers for the stochastic scenarios
    num_peers: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Duration of the stochastic phase in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_peers: usize) -> Self {
        Self {
            seed,
            num_peers,
            tick_rate_hz: 30,
            max_duration_secs: 20.0,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(0.0);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).0
    }

    /// Runs a scenario, capturing a frame every `frame_interval` ticks.
    pub fn run_recorded(&self, scenario: ScenarioId, frame_interval: u64) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, Some(frame_interval));
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        (result, export)
    }

    fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let base = SimConfig {
            seed: self.seed,
            num_peers: self.num_peers,
            tick_rate_hz: self.tick_rate_hz,
            max_duration_secs: self.max_duration_secs,
            ..SimConfig::default()
        };
        match scenario {
            ScenarioId::LateJoiner => SimConfig {
                jitter_ms: 80.0,
                ..base
            },
            ScenarioId::LossyStage => SimConfig {
                num_peers: self.num_peers.max(2),
                latency_ms: 40,
                jitter_ms: 25.0,
                loss_rate: 0.3,
                duplication_rate: 0.1,
                ..base
            },
            ScenarioId::Crowd => SimConfig {
                num_peers: self.num_peers.max(2),
                latency_ms: 30,
                jitter_ms: 10.0,
                clock_skew_std_ms: 150.0,
                ..base
            },
            _ => base,
        }
    }

    fn execute(&self, scenario: ScenarioId, frame_interval: Option<u64>) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let world = match SimWorld::new(self.config_for(scenario)) {
            Ok(world) => world,
            Err(e) => {
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    final_peer_count: 0,
                    failure_reason: Some(format!("setup failed: {}", e)),
                    metrics: ScenarioMetrics::default(),
                };
                return (result, None);
            }
        };
        let mut stage = Stage {
            world,
            export: frame_interval.map(|_| SimExport::new(scenario.name(), self.seed)),
            frame_interval: frame_interval.unwrap_or(1).max(1),
            max_phase_error: 0.0,
        };

        let outcome = match scenario {
            ScenarioId::ClockSkew => self.run_clock_skew(&mut stage),
            ScenarioId::LateJoiner => self.run_late_joiner(&mut stage),
            ScenarioId::NeighborJoin => self.run_neighbor_join(&mut stage),
            ScenarioId::IdleSentinel => self.run_idle_sentinel(&mut stage),
            ScenarioId::ChainReaction => self.run_chain_reaction(&mut stage),
            ScenarioId::MoveToStop => self.run_move_to_stop(&mut stage),
            ScenarioId::PeerDeparture => self.run_peer_departure(&mut stage),
            ScenarioId::LossyStage => self.run_lossy_stage(&mut stage),
            ScenarioId::Crowd => self.run_crowd(&mut stage),
        };

        let failure_reason = outcome.err().map(|e| e.to_string());
        let passed = failure_reason.is_none();
        if let Some(reason) = &failure_reason {
            warn!("{} (seed={}) failed: {}", scenario.name(), self.seed, reason);
        }

        let world = &stage.world;
        let metrics = ScenarioMetrics {
            sync: world.metrics(),
            router: world.router_stats().clone(),
            max_phase_spread: world.max_phase_spread(),
            max_phase_error: stage.max_phase_error,
        };
        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            final_peer_count: world.peer_count(),
            failure_reason: failure_reason.clone(),
            metrics,
        };

        let export = match stage.export.take() {
            Some(mut export) => {
                export.add_frame(stage.world.snapshot_frame());
                export.finalize(passed, failure_reason);
                Some(export)
            }
            None => None,
        };
        (result, export)
    }

    /// MS-001: ClockSkew - peers whose clocks disagree with the server.
    ///
    /// **Assertion**: every receiver adopts the owner's t0 verbatim, and the
    /// displayed phase error is at most `(1 - blend)` of the derived error.
    fn run_clock_skew(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-001: ClockSkew - +500 / -250 / 0 ms peers");

        let (a, avatar_a) = stage.world.spawn_peer_with_skew(Vector3::zeros(), 500)?;
        let (b, _) = stage.world.spawn_peer_with_skew(Vector3::new(10.0, 0.0, 0.0), -250)?;
        let (c, _) = stage.world.spawn_peer_with_skew(Vector3::new(20.0, 0.0, 0.0), 0)?;

        stage.advance(1);
        stage.world.peer_mut(a)?.request_start(MotionId(2))?;
        stage.advance(30);
        stage.ensure_converged()?;

        let owner = stage.own_view(a)?;
        let truth = stage
            .peer(a)?
            .derived_offset(avatar_a)
            .ok_or_else(|| SimError::assertion("owner shows no phase"))?;
        let keep = 1.0 - AvatarConfig::default().sync_phase_blend;

        for viewer in [b, c] {
            let view = stage.view(viewer, avatar_a)?;
            ensure(view.started_at == owner.started_at, || {
                format!("{} holds t0 {:?}, owner issued {:?}", viewer, view.started_at, owner.started_at)
            })?;

            let peer = stage.peer(viewer)?;
            let (derived, displayed) = match (peer.derived_offset(avatar_a), peer.displayed_offset(avatar_a)) {
                (Some(derived), Some(displayed)) => (derived, displayed),
                _ => return Err(SimError::assertion(format!("{} shows no phase", viewer))),
            };
            let derived_error = phase_distance(derived, truth);
            let displayed_error = phase_distance(displayed, truth);
            debug!(peer = %viewer, derived_error, displayed_error, "phase error");

            stage.max_phase_error = stage.max_phase_error.max(displayed_error);
            ensure(displayed_error <= keep * derived_error + 1e-3, || {
                format!(
                    "{} displays error {:.4}, derived error {:.4}",
                    viewer, displayed_error, derived_error
                )
            })?;
        }

        // 750 ms of skew on a 3 s clip: the correction must have had work to do
        let skewed = stage.peer(b)?.derived_offset(avatar_a).unwrap_or(truth);
        ensure(phase_distance(skewed, truth) > 0.2, || {
            format!("skew left no derived error ({:.4})", phase_distance(skewed, truth))
        })
    }

    /// MS-002: LateJoiner - start immediately followed by stop.
    ///
    /// **Assertion**: jittered receivers end idle; a late joiner replays only
    /// the latest state and applies no transition; a restart reaches the
    /// next joiner with its original t0.
    fn run_late_joiner(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-002: LateJoiner - stop-before-start under jitter");

        let (a, avatar_a) = stage.world.spawn_peer(Vector3::zeros())?;
        let (b, _) = stage.world.spawn_peer(Vector3::new(10.0, 0.0, 0.0))?;
        stage.advance(1);

        {
            let peer = stage.world.peer_mut(a)?;
            peer.request_start(MotionId(1))?;
            peer.request_stop()?;
        }
        stage.advance(15);
        let seen = stage.view(b, avatar_a)?;
        ensure(seen.motion.is_idle(), || format!("receiver ended on {}", seen.motion))?;

        let (c, _) = stage.world.spawn_peer(Vector3::new(20.0, 0.0, 0.0))?;
        stage.advance(2);
        let seen = stage.view(c, avatar_a)?;
        ensure(seen.motion.is_idle() && !seen.volume_enabled, || {
            format!("late joiner sees {} (volume {})", seen.motion, seen.volume_enabled)
        })?;
        let applied = stage.peer(c)?.metrics().transitions_applied;
        ensure(applied == 0, || format!("late joiner applied {} transitions", applied))?;

        stage.world.peer_mut(a)?.request_start(MotionId(3))?;
        stage.advance(15);
        let (d, _) = stage.world.spawn_peer(Vector3::new(30.0, 0.0, 0.0))?;
        stage.advance(2);

        let owner = stage.own_view(a)?;
        let seen = stage.view(d, avatar_a)?;
        ensure(seen == owner, || format!("late joiner sees {:?}, owner has {:?}", seen, owner))?;

        stage.advance(10);
        stage.ensure_converged()
    }

    /// MS-003: NeighborJoin - idle avatar walks up to a performer.
    ///
    /// **Assertion**: once it stands still inside the volume, the idle avatar
    /// plays the performer's motion with the performer's t0 and follows it.
    fn run_neighbor_join(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-003: NeighborJoin - walk into a performance");

        let (a, avatar_a) = stage.world.spawn_peer(Vector3::zeros())?;
        let (b, avatar_b) = stage.world.spawn_peer(Vector3::new(5.0, 0.0, 0.0))?;
        stage.advance(1);
        stage.world.peer_mut(b)?.request_start(MotionId(5))?;
        stage.advance(10);

        stage
            .world
            .oracle
            .walk_to(avatar_a, Vector3::new(3.8, 0.0, 0.0), 1.4);
        stage.advance(stage.ticks(5.0));

        let joined = stage.own_view(a)?;
        let source = stage.own_view(b)?;
        ensure(joined.motion == MotionId(5), || format!("joiner plays {}", joined.motion))?;
        ensure(joined.started_at == source.started_at, || {
            format!("joiner t0 {:?}, source t0 {:?}", joined.started_at, source.started_at)
        })?;
        let following = stage.peer(a)?.following();
        ensure(following == Some(avatar_b), || format!("joiner follows {:?}", following))?;
        ensure(stage.world.metrics().neighbor_syncs >= 1, || "no neighbor sync counted".to_string())?;
        stage.ensure_converged()
    }

    /// MS-004: IdleSentinel - a buffered start naming motion -1.
    ///
    /// **Assertion**: every view, including a late joiner's, ends idle with
    /// the volume disabled.
    fn run_idle_sentinel(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-004: IdleSentinel - start(-1) means stop");

        let (a, avatar_a) = stage.world.spawn_peer(Vector3::zeros())?;
        let (b, _) = stage.world.spawn_peer(Vector3::new(10.0, 0.0, 0.0))?;
        stage.world.spawn_peer(Vector3::new(20.0, 0.0, 0.0))?;
        stage.advance(1);
        stage.world.peer_mut(a)?.request_start(MotionId(2))?;
        stage.advance(10);
        let seen = stage.view(b, avatar_a)?;
        ensure(seen.motion == MotionId(2), || format!("start not replicated ({})", seen.motion))?;

        let payload = messages::encode(&MotionCall::start(MotionId::IDLE, 2.0, Timestamp(0)))?;
        let call = BufferedCall::new(avatar_a, CallKind::Start, 1 << 32, payload);
        stage.world.inject_call(a, call, CallTarget::All);
        stage.advance(10);

        stage.world.spawn_peer(Vector3::new(30.0, 0.0, 0.0))?;
        stage.advance(3);

        for peer in stage.world.peers() {
            let view = peer
                .view_of(avatar_a)
                .ok_or_else(|| SimError::assertion(format!("{} does not know the sender", peer.peer_id())))?;
            ensure(view.motion.is_idle() && !view.volume_enabled, || {
                format!("{} sees {} (volume {})", peer.peer_id(), view.motion, view.volume_enabled)
            })?;
        }
        stage.ensure_converged()
    }

    /// MS-005: ChainReaction - A <- B <- C standing in a row.
    ///
    /// Requests land on ticks 61 and 121 so they never share a tick with
    /// the neighbor-sync poll.
    ///
    /// **Assertion**: the chain forms, carries A's switch with A's t0 to C,
    /// and A's stop leaves everyone idle and unattached.
    fn run_chain_reaction(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-005: ChainReaction - follow chain");

        let (a, avatar_a) = stage.world.spawn_peer(Vector3::zeros())?;
        let (b, avatar_b) = stage.world.spawn_peer(Vector3::new(1.0, 0.0, 0.0))?;
        let (c, _) = stage.world.spawn_peer(Vector3::new(2.0, 0.0, 0.0))?;

        stage.advance(1);
        stage.world.peer_mut(a)?.request_start(MotionId(0))?;
        stage.advance(59);

        let follows_b = stage.peer(b)?.following();
        let follows_c = stage.peer(c)?.following();
        ensure(follows_b == Some(avatar_a) && follows_c == Some(avatar_b), || {
            format!("chain did not form: B -> {:?}, C -> {:?}", follows_b, follows_c)
        })?;

        stage.advance(1);
        stage.world.peer_mut(a)?.request_start(MotionId(2))?;
        stage.advance(29);

        let source = stage.own_view(a)?;
        for follower in [b, c] {
            let view = stage.own_view(follower)?;
            ensure(view.motion == MotionId(2) && view.started_at == source.started_at, || {
                format!("{} plays {} from {:?}, source {:?}", follower, view.motion, view.started_at, source.started_at)
            })?;
        }
        stage.ensure_converged()?;

        stage.advance(31);
        stage.world.peer_mut(a)?.request_stop()?;
        stage.advance(29);

        for peer in [a, b, c] {
            let view = stage.own_view(peer)?;
            ensure(view.motion.is_idle() && !view.volume_enabled, || {
                format!("{} still plays {}", peer, view.motion)
            })?;
            let following = stage.peer(peer)?.following();
            ensure(following.is_none(), || format!("{} still follows {:?}", peer, following))?;
        }
        stage.ensure_converged()
    }

    /// MS-006: MoveToStop - the owner walks away mid-performance.
    ///
    /// **Assertion**: movement stops the owner and, through the follow
    /// relation, its follower; starting while moving is refused.
    fn run_move_to_stop(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-006: MoveToStop - movement interrupts motion");

        let (a, avatar_a) = stage.world.spawn_peer(Vector3::zeros())?;
        let (b, _) = stage.world.spawn_peer(Vector3::new(1.0, 0.0, 0.0))?;
        stage.advance(1);
        stage.world.peer_mut(a)?.request_start(MotionId(1))?;
        stage.advance(39);

        let following = stage.peer(b)?.following();
        ensure(following == Some(avatar_a), || format!("B follows {:?}", following))?;

        stage
            .world
            .oracle
            .walk_to(avatar_a, Vector3::new(-10.0, 0.0, 0.0), 1.4);
        stage.advance(1);
        let view = stage.own_view(a)?;
        ensure(view.motion.is_idle(), || format!("walking owner still plays {}", view.motion))?;

        match stage.world.peer_mut(a)?.request_start(MotionId(3)) {
            Err(SimError::Sync(SyncError::AvatarMoving(_))) => {}
            other => {
                return Err(SimError::assertion(format!(
                    "start while moving returned {:?}",
                    other
                )))
            }
        }

        stage.advance(30);
        for peer in [a, b] {
            let view = stage.own_view(peer)?;
            ensure(view.motion.is_idle(), || format!("{} still plays {}", peer, view.motion))?;
        }
        ensure(stage.peer(b)?.following().is_none(), || "B still follows".to_string())?;
        stage.ensure_converged()
    }

    /// MS-007: PeerDeparture - the source leaves the session.
    ///
    /// **Assertion**: the follower keeps its motion and t0 with no source;
    /// a later joiner receives nothing from the departed peer.
    fn run_peer_departure(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-007: PeerDeparture - source leaves");

        let (a, avatar_a) = stage.world.spawn_peer(Vector3::zeros())?;
        let (b, avatar_b) = stage.world.spawn_peer(Vector3::new(1.0, 0.0, 0.0))?;
        let (c, _) = stage.world.spawn_peer(Vector3::new(20.0, 0.0, 0.0))?;
        stage.advance(1);
        stage.world.peer_mut(a)?.request_start(MotionId(3))?;
        stage.advance(39);

        let t0 = stage.own_view(a)?.started_at;
        let following = stage.peer(b)?.following();
        ensure(following == Some(avatar_a), || format!("B follows {:?}", following))?;

        stage.world.remove_peer(a)?;
        stage.advance(15);

        let kept = stage.own_view(b)?;
        ensure(kept.motion == MotionId(3) && kept.started_at == t0, || {
            format!("follower changed to {} from {:?}", kept.motion, kept.started_at)
        })?;
        ensure(stage.peer(b)?.following().is_none(), || "B still follows the departed source".to_string())?;
        ensure(stage.peer(c)?.view_of(avatar_a).is_none(), || "C still knows the departed avatar".to_string())?;

        let (d, _) = stage.world.spawn_peer(Vector3::new(40.0, 0.0, 0.0))?;
        stage.advance(3);
        let late = stage.peer(d)?;
        ensure(late.view_of(avatar_a).is_none(), || "late joiner knows the departed avatar".to_string())?;
        let unroutable = late.metrics().unroutable;
        ensure(unroutable == 0, || format!("late joiner got {} calls for unknown avatars", unroutable))?;
        let seen = stage.view(d, avatar_b)?;
        ensure(seen.motion == MotionId(3), || format!("late joiner sees B as {}", seen.motion))?;
        stage.ensure_converged()
    }

    /// MS-008: LossyStage - random requests over a hostile network.
    ///
    /// **Assertion**: after a healed partition and with loss still on,
    /// every view converges to its owner's state.
    fn run_lossy_stage(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-008: LossyStage - loss/jitter/duplication/partition");

        let peers: Vec<PeerId> = stage.world.spawn_line(10.0)?.into_iter().map(|(p, _)| p).collect();
        let half = peers.len() / 2;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x1055_57a6e);
        let motions = stage.world.catalog().len() as i32;

        let total = stage.ticks(stage.world.config.max_duration_secs);
        let (split_at, heal_at) = (total / 3, 2 * total / 3);

        for tick in 0..total {
            if tick == split_at && half > 0 {
                stage.world.partition(&peers[..half], &peers[half..]);
            }
            if tick == heal_at && half > 0 {
                stage.world.heal_partitions();
            }
            if tick % 20 == 10 {
                let target = peers[rng.gen_range(0..peers.len())];
                let stop = rng.gen_bool(0.3);
                let motion = MotionId(rng.gen_range(0..motions));
                let peer = stage.world.peer_mut(target)?;
                if stop {
                    peer.request_stop()?;
                } else {
                    peer.request_start(motion)?;
                }
            }
            stage.advance(1);
        }

        let settle_ticks = stage.ticks(10.0);
        let settled = stage.settle(30, settle_ticks);
        ensure(settled, || {
            format!("no convergence after heal: {}", stage.world.divergences().join("; "))
        })?;

        let stats = stage.world.router_stats();
        debug!(
            retransmissions = stats.retransmissions,
            frames_lost = stats.frames_lost,
            duplicated = stats.duplicated,
            "network faults"
        );
        Ok(())
    }

    /// MS-009: Crowd - wanderers joining whatever plays nearby.
    ///
    /// **Assertion**: once everyone stands still the views converge, and
    /// every follower shares its source's t0.
    fn run_crowd(&self, stage: &mut Stage) -> SimResult<()> {
        info!("MS-009: Crowd - {} wandering peers", stage.world.config.num_peers);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0xc20_4d);
        let mut avatars = Vec::new();
        for _ in 0..stage.world.config.num_peers {
            let position = Vector3::new(rng.gen_range(-3.0..3.0), 0.0, rng.gen_range(-3.0..3.0));
            let (peer, avatar) = stage.world.spawn_peer(position)?;
            stage.world.oracle.set_wandering(avatar, true);
            avatars.push((peer, avatar));
        }
        stage.world.oracle.set_wander(1.5, 0.15);
        let motions = stage.world.catalog().len() as i32;

        let total = stage.ticks(stage.world.config.max_duration_secs);
        for tick in 0..total {
            if tick % 30 == 0 {
                let (peer, avatar) = avatars[rng.gen_range(0..avatars.len())];
                let motion = MotionId(rng.gen_range(0..motions));
                let standing = stage.world.oracle.body(avatar).map_or(false, |b| !b.is_moving());
                if standing {
                    if let Err(e) = stage.world.peer_mut(peer)?.request_start(motion) {
                        debug!(peer = %peer, error = %e, "crowd start refused");
                    }
                }
            }
            stage.advance(1);
        }

        for &(_, avatar) in &avatars {
            stage.world.oracle.set_wandering(avatar, false);
            stage.world.oracle.halt(avatar);
        }
        let settle_ticks = stage.ticks(10.0);
        let settled = stage.settle(30, settle_ticks);
        ensure(settled, || {
            format!("crowd did not converge: {}", stage.world.divergences().join("; "))
        })?;

        for follower in stage.world.peers() {
            let Some(source) = follower.following() else {
                continue;
            };
            let Some(owner) = stage.world.peers().find(|p| p.avatar() == source) else {
                continue;
            };
            let mine = follower.view_of(follower.avatar());
            let theirs = owner.view_of(source);
            let same = match (mine, theirs) {
                (Some(m), Some(t)) => m.motion == t.motion && m.started_at == t.started_at,
                _ => false,
            };
            ensure(same, || {
                format!("{} follows {} but plays {:?} vs {:?}", follower.peer_id(), source, mine, theirs)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_scenarios_pass() {
        let runner = ScenarioRunner::new(42, 4);
        for scenario in ScenarioId::scripted() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[test]
    fn test_clock_skew_reports_phase_error() {
        let result = ScenarioRunner::new(7, 3).run(ScenarioId::ClockSkew);
        assert!(result.passed, "{:?}", result.failure_reason);
        // Derived error is 0.25 of a clip; half of it remains displayed
        assert!(result.metrics.max_phase_error > 0.05);
        assert!(result.metrics.max_phase_error < 0.2);
    }

    #[test]
    fn test_lossy_stage_converges_across_seeds() {
        for seed in [1, 2, 3] {
            let result = ScenarioRunner::new(seed, 4)
                .with_duration(10.0)
                .run(ScenarioId::LossyStage);
            assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
            assert!(result.metrics.router.retransmissions > 0);
            assert!(result.metrics.router.dropped_partition > 0);
        }
    }

    #[test]
    fn test_crowd_converges() {
        let result = ScenarioRunner::new(11, 6).with_duration(10.0).run(ScenarioId::Crowd);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_peer_count, 6);
    }

    #[test]
    fn test_same_seed_same_run() {
        let runner = ScenarioRunner::new(5, 4).with_duration(6.0);
        let first = runner.run(ScenarioId::LossyStage);
        let second = runner.run(ScenarioId::LossyStage);
        assert_eq!(first.total_ticks, second.total_ticks);
        assert_eq!(first.metrics, second.metrics);
    }

    #[test]
    fn test_recorded_run_exports_frames() {
        let (result, export) = ScenarioRunner::new(42, 3).run_recorded(ScenarioId::ChainReaction, 10);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(export.passed);
        assert!(export.frames.len() >= 15);
        assert!(export.frames.iter().any(|f| f.peers.iter().any(|p| p.following.is_some())));
    }
}
