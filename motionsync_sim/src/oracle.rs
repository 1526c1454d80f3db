//! Ground truth oracle for simulation.
//!
//! The Oracle owns the "God's eye view" of where every avatar body actually
//! is and whether it is walking. Peers only ever see their own body through
//! a [`LocomotionSample`]; everything else arrives through replication.

use motionsync_core::LocomotionSample;
use motionsync_env::AvatarId;
use nalgebra::{UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Distance at which a body counts as having reached its waypoint.
const ARRIVAL_EPSILON: f64 = 0.01;

/// A ground truth avatar body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    /// Position [x, y, z] in meters, y up
    pub position: Vector3<f64>,

    /// Heading around the y axis in radians
    pub heading: f64,

    /// Current waypoint, if walking
    pub waypoint: Option<Vector3<f64>>,

    /// Walking speed in m/s
    pub speed: f64,

    /// Pick new waypoints on its own
    pub wandering: bool,
}

impl Body {
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            heading: 0.0,
            waypoint: None,
            speed: 1.4,
            wandering: false,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.waypoint.is_some()
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.heading)
    }
}

/// The Oracle - maintains ground truth bodies and their kinematics.
pub struct Oracle {
    /// Physics seed (separate from network to avoid interference)
    physics_seed: u64,

    /// RNG for wandering decisions
    physics_rng: ChaCha8Rng,

    bodies: BTreeMap<AvatarId, Body>,

    /// Current simulation time (seconds)
    current_time: f64,

    /// Top walking speed; walk intensity is speed relative to this
    max_speed: f64,

    /// Std-dev of a wander waypoint around the current position (meters)
    wander_radius: f64,

    /// Probability per second that an idle wanderer sets off
    wander_rate: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    ///
    /// The physics seed should be derived separately from the network seed
    /// so that changing network faults doesn't change where bodies walk.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_seed,
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            bodies: BTreeMap::new(),
            current_time: 0.0,
            max_speed: 2.0,
            wander_radius: 2.0,
            wander_rate: 0.2,
        }
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    pub fn set_wander(&mut self, radius: f64, rate_per_sec: f64) {
        self.wander_radius = radius.max(0.0);
        self.wander_rate = rate_per_sec.clamp(0.0, 1.0);
    }

    pub fn spawn_body(&mut self, avatar: AvatarId, position: Vector3<f64>) {
        self.bodies.insert(avatar, Body::new(position));
    }

    pub fn remove_body(&mut self, avatar: AvatarId) -> Option<Body> {
        self.bodies.remove(&avatar)
    }

    pub fn body(&self, avatar: AvatarId) -> Option<&Body> {
        self.bodies.get(&avatar)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (&AvatarId, &Body)> {
        self.bodies.iter()
    }

    /// Sends a body walking toward `target` at `speed` m/s.
    pub fn walk_to(&mut self, avatar: AvatarId, target: Vector3<f64>, speed: f64) {
        if let Some(body) = self.bodies.get_mut(&avatar) {
            body.waypoint = Some(target);
            body.speed = speed.clamp(0.0, self.max_speed);
        }
    }

    /// Halts a body where it stands.
    pub fn halt(&mut self, avatar: AvatarId) {
        if let Some(body) = self.bodies.get_mut(&avatar) {
            body.waypoint = None;
        }
    }

    pub fn set_wandering(&mut self, avatar: AvatarId, wandering: bool) {
        if let Some(body) = self.bodies.get_mut(&avatar) {
            body.wandering = wandering;
        }
    }

    /// Advances physics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        let normal = Normal::new(0.0, self.wander_radius).ok();
        let wander_chance = (self.wander_rate * dt).clamp(0.0, 1.0);

        for body in self.bodies.values_mut() {
            if body.waypoint.is_none() && body.wandering {
                if let Some(normal) = normal {
                    if self.physics_rng.gen_bool(wander_chance) {
                        let offset = Vector3::new(
                            normal.sample(&mut self.physics_rng),
                            0.0,
                            normal.sample(&mut self.physics_rng),
                        );
                        body.waypoint = Some(body.position + offset);
                        body.speed = self.physics_rng.gen_range(0.5..=self.max_speed);
                    }
                }
            }

            let Some(target) = body.waypoint else {
                continue;
            };
            let to_target = target - body.position;
            let distance = to_target.norm();
            let stride = body.speed * dt;

            if distance <= stride.max(ARRIVAL_EPSILON) {
                body.position = target;
                body.waypoint = None;
            } else {
                body.position += to_target / distance * stride;
            }
            if distance > ARRIVAL_EPSILON {
                body.heading = to_target.x.atan2(to_target.z);
            }
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// What a peer's movement system reports about its own body.
    pub fn locomotion(&self, avatar: AvatarId) -> LocomotionSample {
        match self.bodies.get(&avatar) {
            Some(body) => LocomotionSample {
                position: body.position,
                rotation: body.rotation(),
                walk_intensity: if body.is_moving() {
                    (body.speed / self.max_speed).clamp(0.0, 1.0) as f32
                } else {
                    0.0
                },
                is_moving: body.is_moving(),
            },
            None => LocomotionSample::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_walk_arrives_and_stops() {
        let mut oracle = Oracle::new(42);
        let a = AvatarId::from_seed(1);
        oracle.spawn_body(a, Vector3::zeros());

        oracle.walk_to(a, Vector3::new(1.0, 0.0, 0.0), 1.0);
        assert!(oracle.locomotion(a).is_moving);
        assert!(oracle.locomotion(a).walk_intensity > 0.0);

        for _ in 0..5 {
            oracle.step(0.1);
        }
        assert_relative_eq!(oracle.body(a).unwrap().position.x, 0.5, epsilon = 1e-9);

        for _ in 0..10 {
            oracle.step(0.1);
        }
        let sample = oracle.locomotion(a);
        assert!(!sample.is_moving);
        assert_eq!(sample.walk_intensity, 0.0);
        assert_relative_eq!(sample.position.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wandering_is_deterministic() {
        let run = |seed| {
            let mut oracle = Oracle::new(seed);
            let a = AvatarId::from_seed(1);
            oracle.spawn_body(a, Vector3::zeros());
            oracle.set_wander(3.0, 1.0);
            oracle.set_wandering(a, true);
            for _ in 0..200 {
                oracle.step(0.05);
            }
            oracle.body(a).unwrap().position
        };

        assert_eq!(run(7), run(7));
        assert_ne!(run(7), Vector3::zeros());
    }

    #[test]
    fn test_unknown_body_is_idle() {
        let oracle = Oracle::new(1);
        let sample = oracle.locomotion(AvatarId::from_seed(9));
        assert!(!sample.is_moving);
    }
}
