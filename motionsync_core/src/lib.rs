//! MotionSync Core - Peer-to-Peer Avatar Motion Synchronization
//!
//! Keeps many independently clocked peers in visual agreement about which
//! motion every avatar performs and where in its timeline it is:
//! 1. **Replication**: buffered, replace-latest start/stop calls with
//!    idempotent, last-issued-wins application
//! 2. **Clock offsets**: playback offset derived from the sender's start
//!    timestamp on the receiver's own clock, refined by server-time delay
//! 3. **Proximity groups**: idle avatars join the oldest nearby performer
//!    and follow its timeline until they act on their own

pub mod avatar;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod locomotion;
pub mod messages;
pub mod metrics;
pub mod motion_state;
pub mod peer_runtime;
pub mod proximity;
pub mod synchronizer;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenience
pub use avatar::{Authority, Avatar, AvatarConfig, ReplicaPhase};
pub use catalog::{MotionCatalog, MotionId};
pub use clock::{blend_phase, normalize_phase, phase_distance, ClockOffsetEstimator};
pub use error::{SyncError, SyncResult};
pub use locomotion::{Locomotion, LocomotionSample, MirrorTransform};
pub use messages::{MotionCall, ReplicatedState, VolumeToggle};
pub use metrics::{phase_spread, SyncMetrics};
pub use motion_state::{MotionPhase, MotionState, Transition};
pub use peer_runtime::{PeerConfig, PeerRuntime};
pub use proximity::DiscoveryRegistry;
pub use synchronizer::MotionSynchronizer;
pub use volume::{DetectionVolume, SphereVolume, VolumeEvent};
