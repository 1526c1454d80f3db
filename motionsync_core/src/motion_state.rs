//! Per-avatar motion state machine.
//!
//! ```text
//!            start(m, t0)                 start(m2, t1)
//!   Idle  ---------------->  Performing  -------------->  Performing
//!     ^                          |
//!     +------- stop / -1 --------+
//! ```
//!
//! Calls are ordered by the owner's issue counter. A call older than the last
//! applied one is stale and dropped, so a stop that overtook its start on
//! the wire still wins.

use crate::catalog::MotionId;
use crate::clock::ClockOffsetEstimator;
use crate::messages::MotionCall;
use motionsync_env::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MotionPhase {
    Idle,
    Performing {
        motion: MotionId,
        clip_duration: f64,
        started_at: Timestamp,
    },
}

/// Outcome of applying a motion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Started,
    /// Same motion, new start time.
    Restarted,
    /// Different motion, no idle in between.
    Switched,
    Stopped,
    /// Duplicate delivery or a call that matches the current state.
    Unchanged,
    /// Older than the last applied call.
    Stale,
}

impl Transition {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Transition::Started | Transition::Restarted | Transition::Switched | Transition::Stopped
        )
    }
}

/// Current motion of one avatar. `active` is derived from the phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionState {
    phase: MotionPhase,
    last_seq: Option<u64>,
}

impl Default for MotionState {
    fn default() -> Self {
        Self::idle()
    }
}

impl MotionState {
    pub fn idle() -> Self {
        Self {
            phase: MotionPhase::Idle,
            last_seq: None,
        }
    }

    pub fn phase(&self) -> &MotionPhase {
        &self.phase
    }

    pub fn motion(&self) -> MotionId {
        match self.phase {
            MotionPhase::Idle => MotionId::IDLE,
            MotionPhase::Performing { motion, .. } => motion,
        }
    }

    /// Whether the detection volume should be enabled.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, MotionPhase::Performing { .. })
    }

    pub fn clip_duration(&self) -> Option<f64> {
        match self.phase {
            MotionPhase::Performing { clip_duration, .. } => Some(clip_duration),
            MotionPhase::Idle => None,
        }
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        match self.phase {
            MotionPhase::Performing { started_at, .. } => Some(started_at),
            MotionPhase::Idle => None,
        }
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// The call that would reproduce this state on another avatar.
    pub fn timeline(&self) -> MotionCall {
        match self.phase {
            MotionPhase::Idle => MotionCall::stop(),
            MotionPhase::Performing {
                motion,
                clip_duration,
                started_at,
            } => MotionCall::start(motion, clip_duration, started_at),
        }
    }

    /// Applies a call issued with sequence number `seq`.
    pub fn apply(&mut self, call: &MotionCall, seq: u64) -> Transition {
        match self.last_seq {
            Some(last) if seq < last => return Transition::Stale,
            Some(last) if seq == last => return Transition::Unchanged,
            _ => {}
        }
        self.last_seq = Some(seq);

        let next = if call.is_stop() {
            MotionPhase::Idle
        } else {
            MotionPhase::Performing {
                motion: call.motion,
                clip_duration: call.clip_duration,
                started_at: call.started_at,
            }
        };

        let transition = match (&self.phase, &next) {
            (MotionPhase::Idle, MotionPhase::Idle) => Transition::Unchanged,
            (MotionPhase::Performing { .. }, MotionPhase::Idle) => Transition::Stopped,
            (MotionPhase::Idle, MotionPhase::Performing { .. }) => Transition::Started,
            (current, _) if *current == next => Transition::Unchanged,
            (
                MotionPhase::Performing { motion: old, .. },
                MotionPhase::Performing { motion: new, .. },
            ) => {
                if old == new {
                    Transition::Restarted
                } else {
                    Transition::Switched
                }
            }
        };
        self.phase = next;
        transition
    }

    /// Normalized playback offset on this peer's clock. `None` while idle.
    pub fn offset_at(&self, estimator: &ClockOffsetEstimator, now: Timestamp) -> Option<f64> {
        match self.phase {
            MotionPhase::Idle => None,
            MotionPhase::Performing {
                clip_duration,
                started_at,
                ..
            } => Some(estimator.offset_at(started_at, now, clip_duration)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn start(m: i32, t0: i64) -> MotionCall {
        MotionCall::start(MotionId(m), 2.0, Timestamp(t0))
    }

    #[test]
    fn test_start_then_stop() {
        let mut state = MotionState::idle();
        assert_eq!(state.apply(&start(0, 100), 1), Transition::Started);
        assert!(state.is_active());
        assert_eq!(state.apply(&MotionCall::stop(), 2), Transition::Stopped);
        assert!(!state.is_active());
        assert_eq!(state.motion(), MotionId::IDLE);
    }

    #[test]
    fn test_duplicate_is_unchanged() {
        let mut state = MotionState::idle();
        state.apply(&start(2, 100), 1);
        let before = state.clone();
        assert_eq!(state.apply(&start(2, 100), 1), Transition::Unchanged);
        assert_eq!(state.phase(), before.phase());
    }

    #[test]
    fn test_out_of_order_stop_wins() {
        let mut state = MotionState::idle();
        assert_eq!(state.apply(&MotionCall::stop(), 2), Transition::Unchanged);
        assert_eq!(state.apply(&start(0, 100), 1), Transition::Stale);
        assert!(!state.is_active());
    }

    #[test]
    fn test_idle_sentinel_in_start_payload() {
        let mut state = MotionState::idle();
        state.apply(&start(1, 10), 1);
        let sentinel = MotionCall::start(MotionId::IDLE, 5.0, Timestamp(999));
        assert_eq!(state.apply(&sentinel, 2), Transition::Stopped);
        assert!(!state.is_active());
    }

    #[test]
    fn test_restart_and_switch() {
        let mut state = MotionState::idle();
        state.apply(&start(1, 10), 1);
        assert_eq!(state.apply(&start(1, 20), 2), Transition::Restarted);
        assert_eq!(state.apply(&start(2, 20), 3), Transition::Switched);
        assert_eq!(state.started_at(), Some(Timestamp(20)));
    }

    #[test]
    fn test_offset_only_while_performing() {
        let est = ClockOffsetEstimator::new(1000);
        let mut state = MotionState::idle();
        assert!(state.offset_at(&est, Timestamp(0)).is_none());
        state.apply(&start(0, 1000), 1);
        assert_relative_eq!(state.offset_at(&est, Timestamp(3500)).unwrap(), 0.25, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn prop_active_matches_motion(calls in proptest::collection::vec((-1i32..4, 0i64..10_000, 0u64..20), 0..30)) {
            let mut state = MotionState::idle();
            for (m, t0, seq) in calls {
                state.apply(&MotionCall::start(MotionId(m), 1.5, Timestamp(t0)), seq);
                prop_assert_eq!(state.is_active(), !state.motion().is_idle());
            }
        }

        #[test]
        fn prop_apply_twice_equals_once(m in -1i32..4, t0 in 0i64..10_000, seq in 0u64..100) {
            let call = MotionCall::start(MotionId(m), 1.5, Timestamp(t0));
            let mut once = MotionState::idle();
            once.apply(&call, seq);
            let mut twice = once.clone();
            prop_assert_eq!(twice.apply(&call, seq), Transition::Unchanged);
            prop_assert_eq!(twice.phase(), once.phase());
        }
    }
}
