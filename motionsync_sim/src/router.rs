//! Central message router: the simulated session hub.
//!
//! Every peer's [`SimNetwork`] feeds one channel. On each pump the router
//!
//! 1. records buffered calls in the [`CallBuffer`] (replace-latest),
//! 2. fans messages out to recipients, applying per-link faults,
//! 3. delivers everything whose virtual delivery time has passed.
//!
//! Buffered calls are at-least-once: a lost transmission is retried after a
//! retransmission timeout instead of vanishing. Replication frames are
//! best-effort and simply dropped.

use crate::buffer::CallBuffer;
use crate::network::{LinkProfile, NetworkMessage, Outbound, SimNetwork, SimNetworkController};
use motionsync_env::{CallTarget, Inbound, PeerId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Give up on a buffered call after this many lost transmissions.
const MAX_TRANSMISSIONS: u32 = 16;

/// Router counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub calls_routed: u64,
    pub frames_routed: u64,
    pub delivered: u64,
    pub frames_lost: u64,
    pub retransmissions: u64,
    pub calls_abandoned: u64,
    pub dropped_partition: u64,
    pub duplicated: u64,
    pub replayed: u64,
}

struct Scheduled {
    deliver_at_ms: u64,
    order: u64,
    to: PeerId,
    inbound: Inbound,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deliver_at_ms, self.order).cmp(&(other.deliver_at_ms, other.order))
    }
}

/// The simulated session hub.
pub struct SimRouter {
    controller: Arc<SimNetworkController>,
    rng: ChaCha8Rng,
    router_tx: mpsc::UnboundedSender<NetworkMessage>,
    router_rx: mpsc::UnboundedReceiver<NetworkMessage>,
    inboxes: BTreeMap<PeerId, mpsc::UnboundedSender<Inbound>>,
    buffer: CallBuffer,
    in_flight: BinaryHeap<Reverse<Scheduled>>,
    next_order: u64,
    stats: RouterStats,
}

impl SimRouter {
    /// Creates a router. `network_seed` drives every fault decision.
    pub fn new(network_seed: u64, controller: Arc<SimNetworkController>) -> Self {
        let (router_tx, router_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            rng: ChaCha8Rng::seed_from_u64(network_seed),
            router_tx,
            router_rx,
            inboxes: BTreeMap::new(),
            buffer: CallBuffer::new(),
            in_flight: BinaryHeap::new(),
            next_order: 0,
            stats: RouterStats::default(),
        }
    }

    pub fn controller(&self) -> &Arc<SimNetworkController> {
        &self.controller
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn buffer(&self) -> &CallBuffer {
        &self.buffer
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn connected(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.inboxes.keys().copied()
    }

    /// Connects a peer and replays the buffer into its inbox.
    pub fn connect(&mut self, peer: PeerId) -> SimNetwork {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        for call in self.buffer.snapshot() {
            if inbox_tx.send(Inbound::Call(call)).is_ok() {
                self.stats.replayed += 1;
            }
        }
        self.inboxes.insert(peer, inbox_tx);
        debug!(peer = %peer, buffered = self.buffer.len(), "peer connected");
        SimNetwork::new(peer, self.router_tx.clone(), inbox_rx)
    }

    /// Disconnects a peer and forgets its buffered calls.
    pub fn disconnect(&mut self, peer: PeerId) {
        self.inboxes.remove(&peer);
        let forgotten = self.buffer.forget_peer(peer);
        debug!(peer = %peer, forgotten, "peer disconnected");
    }

    /// Queues a message as if `from` had sent it.
    pub fn inject(&self, from: PeerId, outbound: Outbound) -> bool {
        self.router_tx.send(NetworkMessage { from, outbound }).is_ok()
    }

    /// Replays the buffer to every connected peer (after a partition heals).
    pub fn replay_all(&mut self) {
        let snapshot = self.buffer.snapshot();
        for inbox in self.inboxes.values() {
            for call in &snapshot {
                if inbox.send(Inbound::Call(call.clone())).is_ok() {
                    self.stats.replayed += 1;
                }
            }
        }
    }

    /// Routes pending messages and delivers everything due at `now_ms`.
    pub fn pump(&mut self, now_ms: u64) {
        while let Ok(message) = self.router_rx.try_recv() {
            self.route(message, now_ms);
        }

        while let Some(Reverse(next)) = self.in_flight.peek() {
            if next.deliver_at_ms > now_ms {
                break;
            }
            let Some(Reverse(due)) = self.in_flight.pop() else {
                break;
            };
            if let Some(inbox) = self.inboxes.get(&due.to) {
                if inbox.send(due.inbound).is_ok() {
                    self.stats.delivered += 1;
                }
            }
        }
    }

    fn schedule(&mut self, to: PeerId, inbound: Inbound, deliver_at_ms: u64) {
        self.next_order += 1;
        self.in_flight.push(Reverse(Scheduled {
            deliver_at_ms,
            order: self.next_order,
            to,
            inbound,
        }));
    }

    fn jitter(&mut self, link: &LinkProfile) -> u64 {
        if link.jitter_ms <= 0.0 {
            return 0;
        }
        Normal::new(0.0, link.jitter_ms)
            .map(|n| n.sample(&mut self.rng).abs().round() as u64)
            .unwrap_or(0)
    }

    fn route(&mut self, message: NetworkMessage, now_ms: u64) {
        let from = message.from;
        match message.outbound {
            Outbound::Call { call, target } => {
                self.stats.calls_routed += 1;
                self.buffer.record(from, call.clone());

                let recipients: Vec<PeerId> = self
                    .inboxes
                    .keys()
                    .copied()
                    .filter(|&p| target == CallTarget::All || p != from)
                    .collect();
                for to in recipients {
                    if to == from {
                        self.schedule(to, Inbound::Call(call.clone()), now_ms);
                        continue;
                    }
                    self.send_reliable(from, to, Inbound::Call(call.clone()), now_ms);
                }
            }
            Outbound::Replica(frame) => {
                self.stats.frames_routed += 1;
                let recipients: Vec<PeerId> =
                    self.inboxes.keys().copied().filter(|&p| p != from).collect();
                for to in recipients {
                    self.send_best_effort(from, to, Inbound::Replica(frame.clone()), now_ms);
                }
            }
        }
    }

    fn send_reliable(&mut self, from: PeerId, to: PeerId, inbound: Inbound, now_ms: u64) {
        if !self.controller.can_communicate(from, to) {
            self.stats.dropped_partition += 1;
            return;
        }
        let link = self.controller.link(from, to);
        let rto_ms = 2 * link.latency_ms + 50;

        let mut delay_ms = 0;
        let mut transmissions = 1;
        while link.loss > 0.0 && self.rng.gen_bool(link.loss) {
            if transmissions >= MAX_TRANSMISSIONS {
                self.stats.calls_abandoned += 1;
                trace!(from = %from, to = %to, "buffered call abandoned");
                return;
            }
            transmissions += 1;
            delay_ms += rto_ms;
            self.stats.retransmissions += 1;
        }

        let deliver_at = now_ms + delay_ms + link.latency_ms + self.jitter(&link);
        self.deliver_with_duplicates(&link, to, inbound, deliver_at);
    }

    fn send_best_effort(&mut self, from: PeerId, to: PeerId, inbound: Inbound, now_ms: u64) {
        if !self.controller.can_communicate(from, to) {
            self.stats.dropped_partition += 1;
            return;
        }
        let link = self.controller.link(from, to);
        if link.loss > 0.0 && self.rng.gen_bool(link.loss) {
            self.stats.frames_lost += 1;
            return;
        }
        let deliver_at = now_ms + link.latency_ms + self.jitter(&link);
        self.deliver_with_duplicates(&link, to, inbound, deliver_at);
    }

    fn deliver_with_duplicates(&mut self, link: &LinkProfile, to: PeerId, inbound: Inbound, deliver_at: u64) {
        if link.duplication > 0.0 && self.rng.gen_bool(link.duplication) {
            let extra = self.jitter(link) + 1;
            self.stats.duplicated += 1;
            self.schedule(to, inbound.clone(), deliver_at + extra);
        }
        self.schedule(to, inbound, deliver_at);
    }
}
