//! Buffered broadcast transport abstraction for MotionSync peers.

use crate::error::EnvError;
use crate::types::{BufferedCall, CallTarget, Inbound, PeerId, ReplicationFrame};

/// Abstraction over the session's broadcast bus.
///
/// Two delivery paths exist:
///
/// ```text
///  call(kind)  --> [buffer: replace same (origin, slot)] --> connected peers
///                           |                            --> later joiners (replay)
///  replicate() --> [best effort, unbuffered]            --> other peers
/// ```
///
/// Delivery is at-least-once for calls, best-effort for frames, and never
/// ordered across kinds. Every method is non-suspending: the engine runs
/// on a single cooperative tick and must not block inside a transport call.
pub trait BroadcastTransport: Send + Sync + 'static {
    /// Sends a buffered call.
    ///
    /// The transport must replace any previously buffered call from the same
    /// origin in the same [`BufferSlot`](crate::BufferSlot) so that late
    /// joiners only replay the latest intent.
    ///
    /// # Returns
    /// * `Ok(())` - Call accepted (NOT a delivery guarantee)
    /// * `Err(EnvError::NetworkError)` - Immediate failure (hub gone)
    fn call(&self, call: BufferedCall, target: CallTarget) -> Result<(), EnvError>;

    /// Sends a per-tick replication frame to all other peers.
    fn replicate(&self, frame: ReplicationFrame) -> Result<(), EnvError>;

    /// Returns everything delivered to this peer since the last drain.
    fn drain(&self) -> Vec<Inbound>;

    /// Returns this peer's ID.
    fn local_peer(&self) -> PeerId;
}

/// Fault-injection controller used by the simulator.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two peer sets.
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets one-way latency for a specific link.
    fn set_link_latency(&self, from: PeerId, to: PeerId, latency_ms: u64);

    /// Sets message loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&self, from: PeerId, to: PeerId, loss_rate: f64);

    /// Sets duplicate-delivery probability for a link (0.0 - 1.0).
    fn set_link_duplication(&self, from: PeerId, to: PeerId, dup_rate: f64);
}
