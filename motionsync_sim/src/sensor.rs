//! Trigger overlap detection for one peer.
//!
//! Stands in for the physics engine: each tick it checks which enabled
//! remote volumes contain the local avatar and reports only the edges.

use motionsync_core::{Avatar, SphereVolume, VolumeEvent};
use motionsync_env::AvatarId;
use nalgebra::Vector3;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct ProximitySensor {
    observer: AvatarId,
    overlapping: BTreeSet<AvatarId>,
}

impl ProximitySensor {
    pub fn new(observer: AvatarId) -> Self {
        Self {
            observer,
            overlapping: BTreeSet::new(),
        }
    }

    pub fn observer(&self) -> AvatarId {
        self.observer
    }

    pub fn overlapping(&self) -> impl Iterator<Item = &AvatarId> {
        self.overlapping.iter()
    }

    /// Scans this peer's view of the session.
    ///
    /// Mirrors sit at their smoothed transform; a mirror that never
    /// received a frame is skipped.
    pub fn scan_view<'a>(
        &mut self,
        position: Vector3<f64>,
        avatars: impl IntoIterator<Item = &'a Avatar>,
    ) -> Vec<VolumeEvent> {
        let volumes = avatars
            .into_iter()
            .filter(|a| a.transform().is_initialized())
            .map(|a| (a.id(), a.transform().position(), a.volume()));
        self.scan(position, volumes)
    }

    /// Compares the volumes containing `position` against the last scan.
    pub fn scan<'a>(
        &mut self,
        position: Vector3<f64>,
        volumes: impl IntoIterator<Item = (AvatarId, Vector3<f64>, &'a SphereVolume)>,
    ) -> Vec<VolumeEvent> {
        let now: BTreeSet<AvatarId> = volumes
            .into_iter()
            .filter(|(id, _, _)| *id != self.observer)
            .filter(|(_, center, volume)| volume.contains(center, &position))
            .map(|(id, _, _)| id)
            .collect();

        let observer = self.observer;
        let mut events: Vec<VolumeEvent> = self
            .overlapping
            .difference(&now)
            .map(|&other| VolumeEvent::Exit { observer, other })
            .collect();
        events.extend(
            now.difference(&self.overlapping)
                .map(|&other| VolumeEvent::Enter { observer, other }),
        );

        self.overlapping = now;
        events
    }

    /// Forgets an avatar that left the session.
    pub fn forget(&mut self, avatar: AvatarId) {
        self.overlapping.remove(&avatar);
    }
}
