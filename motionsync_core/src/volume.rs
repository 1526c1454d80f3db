//! Detection volumes and overlap events.
//!
//! A performing avatar enables a volume around itself. Another avatar
//! standing inside an ENABLED volume overlaps it and may join its group.

use motionsync_env::AvatarId;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Membership edge reported by the physics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeEvent {
    /// `observer` entered `other`'s enabled volume.
    Enter { observer: AvatarId, other: AvatarId },
    /// `observer` left `other`'s volume (or the volume was disabled).
    Exit { observer: AvatarId, other: AvatarId },
}

impl VolumeEvent {
    pub fn observer(&self) -> AvatarId {
        match self {
            VolumeEvent::Enter { observer, .. } | VolumeEvent::Exit { observer, .. } => *observer,
        }
    }
}

/// A switchable trigger volume.
pub trait DetectionVolume: Send + Sync {
    fn enable(&mut self);
    fn disable(&mut self);
    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }
}

/// Spherical trigger centered on the avatar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SphereVolume {
    pub radius: f64,
    enabled: bool,
}

impl SphereVolume {
    /// Creates a disabled volume.
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            enabled: false,
        }
    }

    /// Whether `point` lies inside this volume placed at `center`.
    /// A disabled volume contains nothing.
    pub fn contains(&self, center: &Vector3<f64>, point: &Vector3<f64>) -> bool {
        self.enabled && (point - center).norm() <= self.radius
    }
}

impl DetectionVolume for SphereVolume {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
