//! Locomotion collaborator interface and mirror smoothing.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// One frame of local movement intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocomotionSample {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// Blend scalar for the walk animation, 0 (standing) to 1 (full stride).
    pub walk_intensity: f32,
    /// True while the user is steering the avatar.
    pub is_moving: bool,
}

impl Default for LocomotionSample {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            walk_intensity: 0.0,
            is_moving: false,
        }
    }
}

/// Source of movement for the locally owned avatar.
pub trait Locomotion {
    fn sample(&self) -> LocomotionSample;
}

impl Locomotion for LocomotionSample {
    fn sample(&self) -> LocomotionSample {
        self.clone()
    }
}

/// Displayed transform of an avatar, chasing the last received target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTransform {
    position: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
    target_position: Vector3<f64>,
    target_rotation: UnitQuaternion<f64>,
    initialized: bool,
}

impl Default for MirrorTransform {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            target_position: Vector3::zeros(),
            target_rotation: UnitQuaternion::identity(),
            initialized: false,
        }
    }
}

impl MirrorTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the transform immediately (owned avatars).
    pub fn snap(&mut self, position: Vector3<f64>, rotation: UnitQuaternion<f64>) {
        self.position = position;
        self.rotation = rotation;
        self.target_position = position;
        self.target_rotation = rotation;
        self.initialized = true;
    }

    /// Records a replicated target. The first target snaps.
    pub fn set_target(&mut self, position: Vector3<f64>, rotation: UnitQuaternion<f64>) {
        if !self.initialized {
            self.snap(position, rotation);
            return;
        }
        self.target_position = position;
        self.target_rotation = rotation;
    }

    /// Exponential approach: `lerp(current, target, rate * dt)`.
    pub fn smooth(&mut self, damping_rate: f64, rotation_speed: f64, dt: f64) {
        let t = (damping_rate * dt).clamp(0.0, 1.0);
        self.position = self.position.lerp(&self.target_position, t);

        let r = (rotation_speed * dt).clamp(0.0, 1.0);
        self.rotation = self.rotation.nlerp(&self.target_rotation, r);
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.rotation
    }

    pub fn target_position(&self) -> Vector3<f64> {
        self.target_position
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
