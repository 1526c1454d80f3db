//! Avatars: one per connected peer, mirrored on every other peer.

use crate::catalog::MotionId;
use crate::clock::{blend_phase, wrap_unit, ClockOffsetEstimator};
use crate::locomotion::MirrorTransform;
use crate::motion_state::MotionState;
use crate::volume::SphereVolume;
use motionsync_env::{AvatarId, PeerId, Timestamp};
use serde::{Deserialize, Serialize};

/// Whether this peer may mutate the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    /// Owned here. Exactly one peer holds this for a given avatar.
    Local,
    /// Mirror of an avatar owned elsewhere.
    Remote,
}

/// Per-avatar tunables, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Position smoothing rate for mirrors (1/s).
    pub damping_rate: f64,
    /// Rotation smoothing rate for mirrors (1/s).
    pub rotation_speed: f64,
    /// How far the displayed phase of a mirror is pulled toward the
    /// replicated phase (0 = local derivation only, 1 = replica only).
    pub sync_phase_blend: f64,
    /// Radius of the detection volume (m).
    pub detection_radius: f64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            damping_rate: 10.0,
            rotation_speed: 8.0,
            sync_phase_blend: 0.5,
            detection_radius: 1.5,
        }
    }
}

/// Phase reported by the owner, corrected for transmission delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicaPhase {
    pub motion: MotionId,
    pub offset: f64,
    /// Local time at which the frame was received.
    pub received_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Avatar {
    id: AvatarId,
    owner: PeerId,
    authority: Authority,
    config: AvatarConfig,
    pub(crate) motion: MotionState,
    pub(crate) volume: SphereVolume,
    pub(crate) transform: MirrorTransform,
    pub(crate) walk_intensity: f32,
    pub(crate) moving: bool,
    pub(crate) replica: Option<ReplicaPhase>,
    pub(crate) last_volume_seq: Option<u64>,
}

impl Avatar {
    pub fn new(id: AvatarId, owner: PeerId, authority: Authority, config: AvatarConfig) -> Self {
        let volume = SphereVolume::new(config.detection_radius);
        Self {
            id,
            owner,
            authority,
            config,
            motion: MotionState::idle(),
            volume,
            transform: MirrorTransform::new(),
            walk_intensity: 0.0,
            moving: false,
            replica: None,
            last_volume_seq: None,
        }
    }

    pub fn id(&self) -> AvatarId {
        self.id
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn is_local(&self) -> bool {
        self.authority == Authority::Local
    }

    pub fn config(&self) -> &AvatarConfig {
        &self.config
    }

    pub fn motion(&self) -> &MotionState {
        &self.motion
    }

    pub fn volume(&self) -> &SphereVolume {
        &self.volume
    }

    pub fn transform(&self) -> &MirrorTransform {
        &self.transform
    }

    pub fn walk_intensity(&self) -> f32 {
        self.walk_intensity
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn replica(&self) -> Option<&ReplicaPhase> {
        self.replica.as_ref()
    }

    /// Phase handed to the animation layer.
    ///
    /// Owners show their own derivation. Mirrors blend the locally derived
    /// offset toward the owner's replicated offset, advanced by the local
    /// time elapsed since the frame arrived.
    pub fn displayed_offset(&self, estimator: &ClockOffsetEstimator, now: Timestamp) -> Option<f64> {
        let derived = self.motion.offset_at(estimator, now)?;
        if self.is_local() {
            return Some(derived);
        }
        match (self.replica, self.motion.clip_duration()) {
            (Some(replica), Some(clip)) if replica.motion == self.motion.motion() => {
                let advanced = wrap_unit(
                    replica.offset + estimator.elapsed_secs(replica.received_at, now) / clip,
                );
                Some(blend_phase(derived, advanced, self.config.sync_phase_blend))
            }
            _ => Some(derived),
        }
    }
}
