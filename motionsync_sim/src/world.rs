//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::error::{SimError, SimResult};
use crate::exporter::{AvatarView, BodyPosition, PeerFrame, SimEvent, SimFrame};
use crate::network::{LinkProfile, Outbound, SimNetworkController};
use crate::oracle::Oracle;
use crate::peer::SimulatedPeer;
use crate::router::{RouterStats, SimRouter};

use motionsync_core::{phase_spread, AvatarConfig, MotionCatalog, PeerConfig, SyncMetrics};
use motionsync_env::{AvatarId, BufferedCall, CallTarget, NetworkController, PeerId};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of peers the scenario spawns by default
    pub num_peers: usize,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Maximum simulation duration in seconds (0 = unlimited)
    pub max_duration_secs: f64,

    /// One-way link latency in milliseconds
    pub latency_ms: u64,

    /// Jitter standard deviation in milliseconds
    pub jitter_ms: f64,

    /// Per-transmission loss probability
    pub loss_rate: f64,

    /// Per-delivery duplication probability
    pub duplication_rate: f64,

    /// Std-dev of each peer's local clock skew in milliseconds
    pub clock_skew_std_ms: f64,

    /// Clip duration in seconds for each motion id
    pub clip_durations: Vec<f64>,

    /// Radius of every avatar's detection volume in meters
    pub detection_radius: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_peers: 4,
            tick_rate_hz: 30,
            max_duration_secs: 20.0,
            latency_ms: 20,
            jitter_ms: 0.0,
            loss_rate: 0.0,
            duplication_rate: 0.0,
            clock_skew_std_ms: 0.0,
            clip_durations: vec![2.0, 1.5, 3.0, 2.5, 1.0, 4.0, 2.0, 3.5],
            detection_radius: 1.5,
        }
    }
}

impl SimConfig {
    fn link_profile(&self) -> LinkProfile {
        LinkProfile {
            latency_ms: self.latency_ms,
            jitter_ms: self.jitter_ms,
            loss: self.loss_rate,
            duplication: self.duplication_rate,
        }
    }

    fn avatar_config(&self) -> AvatarConfig {
        AvatarConfig {
            detection_radius: self.detection_radius,
            ..AvatarConfig::default()
        }
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Master virtual clock; every peer context shares it
    context: Arc<SimContext>,

    /// Ground truth oracle
    pub oracle: Oracle,

    /// Session hub with the replay buffer
    router: SimRouter,

    /// Network controller for fault injection
    network_controller: Arc<SimNetworkController>,

    catalog: MotionCatalog,

    /// Peers keyed by id; BTreeMap keeps tick order deterministic
    peers: BTreeMap<PeerId, SimulatedPeer>,

    /// RNG for per-peer clock skew
    skew_rng: ChaCha8Rng,

    next_index: u64,

    /// Current tick count
    tick_count: u64,

    /// Events since the last frame snapshot
    pending_events: Vec<SimEvent>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        // Derive separate seeds for different subsystems
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let network_seed = config.seed.wrapping_mul(0x517cc1b727220a95);
        let skew_seed = config.seed ^ 0x2545f4914f6cdd1d;

        let catalog = MotionCatalog::new(config.clip_durations.clone())?;
        let network_controller = SimNetworkController::shared(config.link_profile());
        let router = SimRouter::new(network_seed, Arc::clone(&network_controller));

        Ok(Self {
            context: SimContext::shared(config.seed),
            oracle: Oracle::new(physics_seed),
            router,
            network_controller,
            catalog,
            peers: BTreeMap::new(),
            skew_rng: ChaCha8Rng::seed_from_u64(skew_seed),
            next_index: 0,
            tick_count: 0,
            pending_events: Vec::new(),
            config,
        })
    }

    /// Spawns a peer with a sampled clock skew.
    pub fn spawn_peer(&mut self, position: Vector3<f64>) -> SimResult<(PeerId, AvatarId)> {
        let skew_ms = match Normal::new(0.0, self.config.clock_skew_std_ms) {
            Ok(normal) if self.config.clock_skew_std_ms > 0.0 => {
                normal.sample(&mut self.skew_rng).round() as i64
            }
            _ => 0,
        };
        self.spawn_peer_with_skew(position, skew_ms)
    }

    /// Spawns a peer whose local clock runs `skew_ms` ahead of server time.
    ///
    /// The new peer learns every existing avatar and the buffered calls
    /// replay into its inbox; existing peers learn the new avatar.
    pub fn spawn_peer_with_skew(
        &mut self,
        position: Vector3<f64>,
        skew_ms: i64,
    ) -> SimResult<(PeerId, AvatarId)> {
        let index = self.next_index;
        self.next_index += 1;
        let peer_id = PeerId::from_seed(index);
        let avatar = AvatarId::from_seed(index);
        let avatar_config = self.config.avatar_config();

        let context = Arc::new(self.context.with_skew_ms(skew_ms));
        let network = Arc::new(self.router.connect(peer_id));
        let peer_config = PeerConfig {
            name: format!("peer-{}", index),
            tick_rate_hz: self.config.tick_rate_hz,
            ..PeerConfig::default()
        };
        let mut peer = SimulatedPeer::new(
            context,
            network,
            self.catalog.clone(),
            index,
            avatar,
            peer_config,
            avatar_config.clone(),
        )?;

        for existing in self.peers.values_mut() {
            existing.add_remote(avatar, peer_id, avatar_config.clone())?;
            peer.add_remote(existing.avatar(), existing.peer_id(), avatar_config.clone())?;
        }

        self.oracle.spawn_body(avatar, position);
        self.peers.insert(peer_id, peer);
        info!(peer = %peer_id, avatar = %avatar, skew_ms, "peer joined");
        self.record(SimEvent::info(format!("peer {} joined", peer_id)));
        Ok((peer_id, avatar))
    }

    /// Spawns `config.num_peers` peers along the x axis, `spacing` apart.
    pub fn spawn_line(&mut self, spacing: f64) -> SimResult<Vec<(PeerId, AvatarId)>> {
        (0..self.config.num_peers)
            .map(|i| self.spawn_peer(Vector3::new(i as f64 * spacing, 0.0, 0.0)))
            .collect()
    }

    /// Removes a peer: its avatar, buffered calls and group memberships.
    pub fn remove_peer(&mut self, peer_id: PeerId) -> SimResult<()> {
        let peer = self
            .peers
            .remove(&peer_id)
            .ok_or(SimError::UnknownPeer(peer_id))?;
        let avatar = peer.avatar();

        self.router.disconnect(peer_id);
        self.oracle.remove_body(avatar);
        for other in self.peers.values_mut() {
            other.remove_remote(avatar)?;
        }
        info!(peer = %peer_id, avatar = %avatar, "peer left");
        self.record(SimEvent::info(format!("peer {} left", peer_id)));
        Ok(())
    }

    /// Advances the simulation by one tick.
    pub fn tick(&mut self) {
        let rate = self.config.tick_rate_hz.max(1) as u64;
        self.context
            .advance_time(Duration::from_nanos(1_000_000_000 / rate));
        self.oracle.step(1.0 / rate as f64);
        self.router.pump(self.context.time_ms());

        for peer in self.peers.values_mut() {
            peer.tick(&self.oracle);
        }
        self.tick_count += 1;
    }

    pub fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Runs until `secs` of virtual time have passed.
    pub fn run_for_secs(&mut self, secs: f64) {
        let ticks = (secs * self.config.tick_rate_hz as f64).round() as u64;
        self.run_ticks(ticks);
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.time_secs()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn catalog(&self) -> &MotionCatalog {
        &self.catalog
    }

    pub fn peer(&self, peer_id: PeerId) -> SimResult<&SimulatedPeer> {
        self.peers.get(&peer_id).ok_or(SimError::UnknownPeer(peer_id))
    }

    pub fn peer_mut(&mut self, peer_id: PeerId) -> SimResult<&mut SimulatedPeer> {
        self.peers
            .get_mut(&peer_id)
            .ok_or(SimError::UnknownPeer(peer_id))
    }

    pub fn peers(&self) -> impl Iterator<Item = &SimulatedPeer> {
        self.peers.values()
    }

    pub fn router_stats(&self) -> &RouterStats {
        self.router.stats()
    }

    pub fn network_controller(&self) -> &Arc<SimNetworkController> {
        &self.network_controller
    }

    /// Replaces the default link profile for every link.
    pub fn set_link_profile(&mut self, profile: LinkProfile) {
        self.network_controller.set_defaults(profile);
    }

    pub fn partition(&mut self, group_a: &[PeerId], group_b: &[PeerId]) {
        self.network_controller.partition(group_a, group_b);
        debug!(a = group_a.len(), b = group_b.len(), "partition installed");
        self.record(SimEvent::warn("network partitioned"));
    }

    /// Heals all partitions and replays the buffer so everyone catches up.
    pub fn heal_partitions(&mut self) {
        self.network_controller.heal_all();
        self.router.replay_all();
        self.record(SimEvent::info("partitions healed"));
    }

    /// Puts a buffered call on the wire on behalf of `from`.
    pub fn inject_call(&mut self, from: PeerId, call: BufferedCall, target: CallTarget) {
        debug!(from = %from, kind = ?call.kind, seq = call.seq, "injecting call");
        self.router.inject(from, Outbound::Call { call, target });
    }

    /// Pending buffered calls or frames still in flight.
    pub fn in_flight(&self) -> usize {
        self.router.in_flight()
    }

    /// Lists every place a peer's view disagrees with the owner's state.
    pub fn divergences(&self) -> Vec<String> {
        let mut found = Vec::new();
        for owner in self.peers.values() {
            let Some(truth) = owner.view_of(owner.avatar()) else {
                continue;
            };
            for viewer in self.peers.values().filter(|p| p.peer_id() != owner.peer_id()) {
                match viewer.view_of(owner.avatar()) {
                    Some(view) if view == truth => {}
                    Some(view) => found.push(format!(
                        "{} sees {} as {} (t0 {:?}, volume {}), owner has {} (t0 {:?}, volume {})",
                        viewer.peer_id(),
                        owner.avatar(),
                        view.motion,
                        view.started_at,
                        view.volume_enabled,
                        truth.motion,
                        truth.started_at,
                        truth.volume_enabled,
                    )),
                    None => found.push(format!("{} does not know {}", viewer.peer_id(), owner.avatar())),
                }
            }
        }
        found
    }

    pub fn is_converged(&self) -> bool {
        self.divergences().is_empty()
    }

    /// Worst circular spread of one avatar's displayed phase across peers.
    pub fn max_phase_spread(&self) -> f64 {
        self.peers
            .values()
            .map(|owner| {
                let phases: Vec<f64> = self
                    .peers
                    .values()
                    .filter_map(|viewer| viewer.displayed_offset(owner.avatar()))
                    .collect();
                phase_spread(&phases)
            })
            .fold(0.0, f64::max)
    }

    /// Protocol counters summed over all peers.
    pub fn metrics(&self) -> SyncMetrics {
        let mut total = SyncMetrics::default();
        for peer in self.peers.values() {
            total.merge(peer.metrics());
        }
        total
    }

    /// Adds an event to the next exported frame.
    pub fn record(&mut self, event: SimEvent) {
        self.pending_events.push(event);
    }

    /// Captures the current state for export.
    pub fn snapshot_frame(&mut self) -> SimFrame {
        let bodies = self
            .oracle
            .bodies()
            .map(|(id, body)| BodyPosition::new(id.to_string(), body.position, body.is_moving()))
            .collect();

        let peers = self
            .peers
            .values()
            .map(|peer| PeerFrame {
                peer: peer.peer_id().to_string(),
                clock_skew_ms: peer.clock_skew_ms(),
                avatars: peer
                    .synchronizer()
                    .avatars()
                    .map(|a| AvatarView {
                        avatar: a.id().to_string(),
                        motion: a.motion().motion().0,
                        offset: peer.displayed_offset(a.id()),
                        volume_enabled: peer.view_of(a.id()).map_or(false, |v| v.volume_enabled),
                    })
                    .collect(),
                following: peer.following().map(|a| a.to_string()),
            })
            .collect();

        SimFrame {
            time_sec: self.time(),
            bodies,
            peers,
            events: std::mem::take(&mut self.pending_events),
        }
    }
}
