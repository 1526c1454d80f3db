//! Clock offset arithmetic.
//!
//! Peers never share a clock. A motion is described by the sender's local
//! start timestamp, and every receiver derives the playback position from
//! its OWN clock:
//!
//! ```text
//! elapsed = (now - t0) / ticks_per_second
//! offset  = (elapsed mod clip) / clip          in [0, 1)
//! ```
//!
//! Skew between sender and receiver therefore shows up as a constant phase
//! error, never as a crash or a negative offset. The periodic replication
//! path refines this with the session's server clock:
//!
//! ```text
//! corrected = (offset + (server_recv - server_sent) / unit / clip) mod 1
//! ```

use motionsync_env::{ServerTime, Timestamp, TICKS_PER_SECOND};
use serde::{Deserialize, Serialize};

/// Server time is reported in milliseconds.
pub const DEFAULT_TRANSMISSION_TIME_UNIT: f64 = 1000.0;

/// Pure conversion from timestamps to normalized playback offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockOffsetEstimator {
    ticks_per_second: f64,
    transmission_time_unit: f64,
}

impl Default for ClockOffsetEstimator {
    fn default() -> Self {
        Self {
            ticks_per_second: TICKS_PER_SECOND as f64,
            transmission_time_unit: DEFAULT_TRANSMISSION_TIME_UNIT,
        }
    }
}

impl ClockOffsetEstimator {
    /// Estimator for a clock with the given resolution.
    pub fn new(ticks_per_second: i64) -> Self {
        Self {
            ticks_per_second: ticks_per_second.max(1) as f64,
            ..Self::default()
        }
    }

    /// Overrides the server-time unit (server ticks per second).
    pub fn with_transmission_unit(mut self, unit: f64) -> Self {
        if unit.is_finite() && unit > 0.0 {
            self.transmission_time_unit = unit;
        }
        self
    }

    pub fn ticks_per_second(&self) -> f64 {
        self.ticks_per_second
    }

    /// Seconds between `started_at` and `now`. Negative when the start lies
    /// in the local future (sender clock ahead of ours).
    pub fn elapsed_secs(&self, started_at: Timestamp, now: Timestamp) -> f64 {
        now.since(started_at) as f64 / self.ticks_per_second
    }

    /// Normalized playback offset of a clip started at `started_at`.
    pub fn offset_at(&self, started_at: Timestamp, now: Timestamp, clip_duration: f64) -> f64 {
        normalize_phase(self.elapsed_secs(started_at, now), clip_duration)
    }

    /// Advances a replicated offset by the measured transmission delay.
    pub fn corrected_offset(
        &self,
        received_offset: f64,
        sent_at: ServerTime,
        received_at: ServerTime,
        clip_duration: f64,
    ) -> f64 {
        if !valid_duration(clip_duration) {
            return 0.0;
        }
        let delay = received_at.millis().wrapping_sub(sent_at.millis()) as f64 / self.transmission_time_unit;
        wrap_unit(received_offset + delay / clip_duration)
    }

    /// Converts a duration in seconds to ticks of this clock.
    pub fn secs_to_ticks(&self, secs: f64) -> i64 {
        (secs * self.ticks_per_second).round() as i64
    }
}

// ============================================================================
// PHASE HELPERS
// ============================================================================

fn valid_duration(d: f64) -> bool {
    d.is_finite() && d > 0.0
}

/// Wraps any real into `[0, 1)`. Non-finite input maps to 0.
pub fn wrap_unit(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let r = x.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if r >= 1.0 {
        0.0
    } else {
        r
    }
}

/// `(elapsed mod duration) / duration`, always in `[0, 1)`.
pub fn normalize_phase(elapsed_secs: f64, clip_duration: f64) -> f64 {
    if !valid_duration(clip_duration) || !elapsed_secs.is_finite() {
        return 0.0;
    }
    wrap_unit(elapsed_secs.rem_euclid(clip_duration) / clip_duration)
}

/// Shortest circular distance between two phases, in `[0, 0.5]`.
pub fn phase_distance(a: f64, b: f64) -> f64 {
    let d = wrap_unit(a - b);
    d.min(1.0 - d)
}

/// Moves `from` toward `to` by `weight` along the shortest arc.
pub fn blend_phase(from: f64, to: f64, weight: f64) -> f64 {
    let mut delta = wrap_unit(to - from);
    if delta > 0.5 {
        delta -= 1.0;
    }
    wrap_unit(from + delta * weight.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_offset_example() {
        // t0 = 1000, now = 3500 at 1000 ticks/s, 2s clip
        let est = ClockOffsetEstimator::new(1000);
        let offset = est.offset_at(Timestamp(1000), Timestamp(3500), 2.0);
        assert_relative_eq!(offset, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_elapsed_is_non_negative() {
        let est = ClockOffsetEstimator::new(1000);
        // Sender clock 500ms ahead of ours
        let offset = est.offset_at(Timestamp(2000), Timestamp(1500), 2.0);
        assert_relative_eq!(offset, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_corrected_offset_adds_delay() {
        let est = ClockOffsetEstimator::default();
        let corrected = est.corrected_offset(0.9, ServerTime(10_000), ServerTime(10_400), 2.0);
        // 0.9 + 0.4s / 2s = 1.1 -> 0.1
        assert_relative_eq!(corrected, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_duration_is_safe() {
        assert_eq!(normalize_phase(3.0, 0.0), 0.0);
        assert_eq!(normalize_phase(f64::INFINITY, 2.0), 0.0);
        let est = ClockOffsetEstimator::default();
        assert_eq!(est.corrected_offset(0.5, ServerTime(0), ServerTime(10), 0.0), 0.0);
    }

    #[test]
    fn test_extreme_send_time_stays_in_range() {
        let est = ClockOffsetEstimator::default();
        let corrected = est.corrected_offset(0.5, ServerTime(i64::MIN), ServerTime(10), 2.0);
        assert!((0.0..1.0).contains(&corrected));
        let corrected = est.corrected_offset(0.5, ServerTime(i64::MAX), ServerTime(i64::MIN), 2.0);
        assert!((0.0..1.0).contains(&corrected));
    }

    #[test]
    fn test_phase_distance_wraps() {
        assert_relative_eq!(phase_distance(0.95, 0.05), 0.1, epsilon = 1e-12);
        assert_relative_eq!(phase_distance(0.25, 0.75), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_blend_takes_short_arc() {
        // 0.9 -> 0.1 goes forward through 1.0
        assert!(phase_distance(blend_phase(0.9, 0.1, 0.5), 0.0) < 1e-9);
        assert_relative_eq!(blend_phase(0.2, 0.4, 0.5), 0.3, epsilon = 1e-12);
        assert_relative_eq!(blend_phase(0.2, 0.4, 0.0), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_secs_to_ticks() {
        let est = ClockOffsetEstimator::default();
        assert_eq!(est.secs_to_ticks(1.5), 15_000_000);
    }

    proptest! {
        #[test]
        fn prop_offset_in_unit_range(
            started in -1_000_000_000_000i64..1_000_000_000_000i64,
            now in -1_000_000_000_000i64..1_000_000_000_000i64,
            duration in 0.001f64..600.0,
        ) {
            let est = ClockOffsetEstimator::default();
            let offset = est.offset_at(Timestamp(started), Timestamp(now), duration);
            prop_assert!((0.0..1.0).contains(&offset));
        }

        #[test]
        fn prop_corrected_in_unit_range(
            offset in -5.0f64..5.0,
            sent in 0i64..10_000_000,
            delay in -5_000i64..5_000,
            duration in 0.001f64..600.0,
        ) {
            let est = ClockOffsetEstimator::default();
            let c = est.corrected_offset(offset, ServerTime(sent), ServerTime(sent + delay), duration);
            prop_assert!((0.0..1.0).contains(&c));
        }

        #[test]
        fn prop_blend_in_unit_range(a in 0.0f64..1.0, b in 0.0f64..1.0, w in -1.0f64..2.0) {
            prop_assert!((0.0..1.0).contains(&blend_phase(a, b, w)));
        }
    }
}
