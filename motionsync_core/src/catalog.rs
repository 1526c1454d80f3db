//! Static motion catalog: motion id to clip duration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Small integer naming a motion clip. `-1` is the idle sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MotionId(pub i32);

impl MotionId {
    pub const IDLE: MotionId = MotionId(-1);

    pub fn is_idle(&self) -> bool {
        *self == Self::IDLE
    }
}

impl std::fmt::Display for MotionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_idle() {
            write!(f, "idle")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Immutable table of clip durations (seconds), indexed by motion id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionCatalog {
    durations: Vec<f64>,
}

impl MotionCatalog {
    /// Builds a catalog. Every duration must be finite and strictly positive.
    pub fn new(durations: Vec<f64>) -> SyncResult<Self> {
        if durations.is_empty() {
            return Err(SyncError::InvalidCatalog("catalog is empty".to_string()));
        }
        if let Some((idx, d)) = durations
            .iter()
            .enumerate()
            .find(|(_, d)| !d.is_finite() || **d <= 0.0)
        {
            return Err(SyncError::InvalidCatalog(format!(
                "motion #{} has invalid clip duration {}",
                idx, d
            )));
        }
        Ok(Self { durations })
    }

    /// Catalog of `count` clips that all last `duration` seconds.
    pub fn uniform(count: usize, duration: f64) -> SyncResult<Self> {
        Self::new(vec![duration; count])
    }

    /// Looks up a clip duration. The idle sentinel and out-of-range ids fail.
    pub fn clip_duration(&self, motion: MotionId) -> SyncResult<f64> {
        usize::try_from(motion.0)
            .ok()
            .and_then(|idx| self.durations.get(idx).copied())
            .ok_or(SyncError::UnknownMotion(motion.0))
    }

    pub fn contains(&self, motion: MotionId) -> bool {
        self.clip_duration(motion).is_ok()
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// All valid motion ids, in catalog order.
    pub fn motions(&self) -> impl Iterator<Item = MotionId> + '_ {
        (0..self.durations.len()).map(|i| MotionId(i as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let catalog = MotionCatalog::new(vec![2.0, 3.5]).unwrap();
        assert_eq!(catalog.clip_duration(MotionId(1)).unwrap(), 3.5);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.motions().collect::<Vec<_>>(), vec![MotionId(0), MotionId(1)]);
    }

    #[test]
    fn test_unknown_motion() {
        let catalog = MotionCatalog::uniform(3, 1.0).unwrap();
        assert!(matches!(
            catalog.clip_duration(MotionId(3)),
            Err(SyncError::UnknownMotion(3))
        ));
        assert!(matches!(
            catalog.clip_duration(MotionId::IDLE),
            Err(SyncError::UnknownMotion(-1))
        ));
        assert!(!catalog.contains(MotionId(-7)));
    }

    #[test]
    fn test_rejects_bad_durations() {
        assert!(MotionCatalog::new(vec![]).is_err());
        assert!(MotionCatalog::new(vec![1.0, 0.0]).is_err());
        assert!(MotionCatalog::new(vec![f64::NAN]).is_err());
        assert!(MotionCatalog::new(vec![-2.0]).is_err());
    }

    #[test]
    fn test_idle_sentinel() {
        assert!(MotionId::IDLE.is_idle());
        assert!(!MotionId(0).is_idle());
        assert_eq!(MotionId::IDLE.to_string(), "idle");
    }
}
