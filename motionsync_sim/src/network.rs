//! Simulated broadcast transport with fault injection.

use motionsync_env::{
    BroadcastTransport, BufferedCall, CallTarget, EnvError, Inbound, NetworkController, PeerId,
    ReplicationFrame,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What a peer handed to the transport.
#[derive(Debug, Clone)]
pub enum Outbound {
    Call { call: BufferedCall, target: CallTarget },
    Replica(ReplicationFrame),
}

/// Internal message to the network router.
#[derive(Debug, Clone)]
pub struct NetworkMessage {
    pub from: PeerId,
    pub outbound: Outbound,
}

/// Simulated network interface for a peer.
pub struct SimNetwork {
    /// This peer's ID
    local_peer: PeerId,

    /// Sender to central router
    tx: mpsc::UnboundedSender<NetworkMessage>,

    /// Delivered messages waiting for the next drain
    inbox: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl SimNetwork {
    pub fn new(
        local_peer: PeerId,
        tx: mpsc::UnboundedSender<NetworkMessage>,
        inbox: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        Self {
            local_peer,
            tx,
            inbox: Mutex::new(inbox),
        }
    }

    /// Creates a detached network whose sends fail (router gone).
    pub fn new_stub(local_peer: PeerId) -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        let (_, rx) = mpsc::unbounded_channel();
        Self::new(local_peer, tx, rx)
    }

    fn send(&self, outbound: Outbound) -> Result<(), EnvError> {
        self.tx
            .send(NetworkMessage {
                from: self.local_peer,
                outbound,
            })
            .map_err(|_| EnvError::network("Router closed"))
    }
}

impl BroadcastTransport for SimNetwork {
    fn call(&self, call: BufferedCall, target: CallTarget) -> Result<(), EnvError> {
        self.send(Outbound::Call { call, target })
    }

    fn replicate(&self, frame: ReplicationFrame) -> Result<(), EnvError> {
        self.send(Outbound::Replica(frame))
    }

    fn drain(&self) -> Vec<Inbound> {
        let mut inbox = self.inbox.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            delivered.push(message);
        }
        delivered
    }

    fn local_peer(&self) -> PeerId {
        self.local_peer
    }
}

/// Fault profile of one directed link.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkProfile {
    /// Base one-way latency in milliseconds
    pub latency_ms: u64,

    /// Standard deviation of the added (half-normal) jitter in milliseconds
    pub jitter_ms: f64,

    /// Probability that a single transmission is lost (0.0 - 1.0)
    pub loss: f64,

    /// Probability that a delivery is duplicated (0.0 - 1.0)
    pub duplication: f64,
}

impl LinkProfile {
    /// Probabilities clamped to [0, 1] and jitter to a finite non-negative value.
    /// NaN counts as zero.
    pub fn sanitized(self) -> Self {
        let unit = |p: f64| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        Self {
            latency_ms: self.latency_ms,
            jitter_ms: if self.jitter_ms.is_finite() { self.jitter_ms.max(0.0) } else { 0.0 },
            loss: unit(self.loss),
            duplication: unit(self.duplication),
        }
    }
}

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Profile used for links without an override
    defaults: Mutex<LinkProfile>,

    /// Per-link overrides
    links: Mutex<HashMap<(PeerId, PeerId), LinkProfile>>,

    /// Active partitions (peers that cannot communicate)
    partitions: Mutex<Vec<(Vec<PeerId>, Vec<PeerId>)>>,
}

impl SimNetworkController {
    pub fn new() -> Self {
        Self::with_defaults(LinkProfile::default())
    }

    pub fn with_defaults(defaults: LinkProfile) -> Self {
        Self {
            defaults: Mutex::new(defaults),
            links: Mutex::new(HashMap::new()),
            partitions: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(defaults: LinkProfile) -> Arc<Self> {
        Arc::new(Self::with_defaults(defaults))
    }

    pub fn set_defaults(&self, profile: LinkProfile) {
        *self.defaults.lock().unwrap_or_else(|e| e.into_inner()) = profile;
    }

    /// Effective profile for a link.
    pub fn link(&self, from: PeerId, to: PeerId) -> LinkProfile {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        let profile = match links.get(&(from, to)) {
            Some(profile) => *profile,
            None => *self.defaults.lock().unwrap_or_else(|e| e.into_inner()),
        };
        profile.sanitized()
    }

    fn update_link(&self, from: PeerId, to: PeerId, update: impl FnOnce(&mut LinkProfile)) {
        let current = self.link(from, to);
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        update(links.entry((from, to)).or_insert(current));
    }

    /// Checks if two peers can communicate (not partitioned).
    pub fn can_communicate(&self, from: PeerId, to: PeerId) -> bool {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());

        for (group_a, group_b) in partitions.iter() {
            let from_in_a = group_a.contains(&from);
            let from_in_b = group_b.contains(&from);
            let to_in_a = group_a.contains(&to);
            let to_in_b = group_b.contains(&to);

            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }

        true
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

impl Default for SimNetworkController {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]) {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions.push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn set_link_latency(&self, from: PeerId, to: PeerId, latency_ms: u64) {
        self.update_link(from, to, |l| l.latency_ms = latency_ms);
    }

    fn set_link_loss(&self, from: PeerId, to: PeerId, loss_rate: f64) {
        self.update_link(from, to, |l| l.loss = loss_rate.clamp(0.0, 1.0));
    }

    fn set_link_duplication(&self, from: PeerId, to: PeerId, dup_rate: f64) {
        self.update_link(from, to, |l| l.duplication = dup_rate.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motionsync_env::{AvatarId, CallKind};

    #[test]
    fn test_network_controller_partition() {
        let controller = SimNetworkController::new();

        let a = PeerId::from_seed(1);
        let b = PeerId::from_seed(2);
        let c = PeerId::from_seed(3);

        assert!(controller.can_communicate(a, b));

        // Partition: {a} vs {b, c}
        controller.partition(&[a], &[b, c]);
        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));
        assert!(controller.can_communicate(b, c));
        assert!(controller.is_partitioned());

        controller.heal_all();
        assert!(controller.can_communicate(a, b));
    }

    #[test]
    fn test_link_overrides_defaults() {
        let controller = SimNetworkController::with_defaults(LinkProfile {
            latency_ms: 40,
            ..Default::default()
        });
        let a = PeerId::from_seed(1);
        let b = PeerId::from_seed(2);

        controller.set_link_loss(a, b, 1.5);
        let link = controller.link(a, b);
        assert_eq!(link.loss, 1.0);
        assert_eq!(link.latency_ms, 40, "override starts from defaults");

        // Reverse direction is separate
        assert_eq!(controller.link(b, a).loss, 0.0);
    }

    #[test]
    fn test_out_of_range_profile_is_clamped() {
        let controller = SimNetworkController::with_defaults(LinkProfile {
            latency_ms: 10,
            jitter_ms: f64::NAN,
            loss: 3.0,
            duplication: f64::NAN,
        });
        let link = controller.link(PeerId::from_seed(1), PeerId::from_seed(2));
        assert_eq!(link.loss, 1.0);
        assert_eq!(link.duplication, 0.0);
        assert_eq!(link.jitter_ms, 0.0);
        assert_eq!(link.latency_ms, 10);
    }

    #[test]
    fn test_stub_send_fails() {
        let net = SimNetwork::new_stub(PeerId::from_seed(1));
        let call = BufferedCall::new(AvatarId::from_seed(1), CallKind::Stop, 1, vec![]);
        assert!(net.call(call, CallTarget::All).is_err());
        assert!(net.drain().is_empty());
    }
}
