//! Payloads carried inside transport calls and replication frames.

use crate::catalog::MotionId;
use crate::error::SyncResult;
use motionsync_env::Timestamp;
use nalgebra::{UnitQuaternion, Vector3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Motion intent: which clip, how long it lasts, and when the owner started it.
///
/// `started_at` is in the OWNER's local clock. A call whose motion is the
/// idle sentinel is a stop regardless of the other fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCall {
    pub motion: MotionId,
    pub clip_duration: f64,
    pub started_at: Timestamp,
}

impl MotionCall {
    pub fn start(motion: MotionId, clip_duration: f64, started_at: Timestamp) -> Self {
        Self {
            motion,
            clip_duration,
            started_at,
        }
    }

    pub fn stop() -> Self {
        Self {
            motion: MotionId::IDLE,
            clip_duration: 0.0,
            started_at: Timestamp::default(),
        }
    }

    pub fn is_stop(&self) -> bool {
        self.motion.is_idle()
    }
}

/// Detection volume state beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeToggle {
    pub enabled: bool,
}

/// Per-tick mirrored fields of an owned avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedState {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub walk_intensity: f32,
    pub motion: MotionId,
    /// Owner's normalized offset at send time.
    pub offset: f64,
}

pub fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SyncResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn test_stop_is_idle() {
        assert!(MotionCall::stop().is_stop());
        assert!(!MotionCall::start(MotionId(0), 1.0, Timestamp(5)).is_stop());
    }

    #[test]
    fn test_replicated_state_survives_codec() {
        let state = ReplicatedState {
            position: Vector3::new(1.0, 0.0, -2.5),
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, 1.2),
            walk_intensity: 0.75,
            motion: MotionId(3),
            offset: 0.4,
        };
        let bytes = encode(&state).unwrap();
        let back: ReplicatedState = decode(&bytes).unwrap();
        assert_eq!(back.motion, MotionId(3));
        assert!((back.position - state.position).norm() < 1e-12);
        assert!(back.rotation.angle_to(&state.rotation) < 1e-9);
    }

    #[test]
    fn test_garbage_fails_decode() {
        let result: SyncResult<MotionCall> = decode(b"not json");
        assert!(matches!(result, Err(SyncError::Codec(_))));
    }
}
