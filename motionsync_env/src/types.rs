//! Common types for the MotionSync environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolution of local wall-clock timestamps.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

fn uuid_from_seed(seed: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
    Uuid::from_bytes(bytes)
}

/// Unique identifier for a connected peer (a session participant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Creates a new random PeerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic PeerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Stable network identity of an avatar.
///
/// Every peer refers to the same avatar by the same id; the owning peer
/// is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AvatarId(pub Uuid);

impl AvatarId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic AvatarId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed ^ 0xa5a5_a5a5_a5a5_a5a5))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AvatarId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AvatarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Local wall-clock time in ticks ([`TICKS_PER_SECOND`] per second).
///
/// NOT globally synchronized: two peers reading their clock at the same
/// instant may get very different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn ticks(&self) -> i64 {
        self.0
    }

    /// Signed tick difference `self - earlier`.
    pub fn since(&self, earlier: Timestamp) -> i64 {
        self.0.wrapping_sub(earlier.0)
    }
}

/// Session server time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ServerTime(pub i64);

impl ServerTime {
    pub fn millis(&self) -> i64 {
        self.0
    }
}

/// Kind of a buffered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Begin (or switch to) a motion. An idle motion id means stop.
    Start,
    /// Return to idle.
    Stop,
    /// Enable or disable the avatar's detection volume.
    ColliderToggle,
}

/// Replacement slot in the transport buffer.
///
/// Start and Stop share a slot: a stop must evict a pending start so that
/// a late joiner never replays a motion that has already ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BufferSlot {
    Motion,
    Volume,
}

impl CallKind {
    pub fn slot(&self) -> BufferSlot {
        match self {
            CallKind::Start | CallKind::Stop => BufferSlot::Motion,
            CallKind::ColliderToggle => BufferSlot::Volume,
        }
    }
}

/// Recipients of a buffered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Every peer, the sender included (loopback).
    All,
    /// Every peer except the sender.
    Others,
}

/// A durable, replace-latest broadcast call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedCall {
    /// Avatar the call is about.
    pub origin: AvatarId,
    pub kind: CallKind,
    /// Per-origin issue counter. Higher wins.
    pub seq: u64,
    /// Opaque encoded payload (decoded by the engine).
    pub payload: Vec<u8>,
}

impl BufferedCall {
    pub fn new(origin: AvatarId, kind: CallKind, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            origin,
            kind,
            seq,
            payload,
        }
    }

    pub fn slot(&self) -> BufferSlot {
        self.kind.slot()
    }
}

/// Best-effort per-tick state mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationFrame {
    pub origin: AvatarId,
    /// Server time at which the owner produced the frame.
    pub sent_at: ServerTime,
    pub payload: Vec<u8>,
}

/// Anything the transport delivers to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inbound {
    Call(BufferedCall),
    Replica(ReplicationFrame),
}
