//! Synchronization counters and phase agreement measures.

use crate::clock::wrap_unit;
use serde::{Deserialize, Serialize};

/// Per-peer protocol counters.
///
/// Transport and codec faults land here rather than in a `Result`: they are
/// tolerated and never shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Buffered calls handed to the transport.
    pub calls_issued: u64,
    /// Motion calls that changed an avatar's state.
    pub transitions_applied: u64,
    /// Re-deliveries and no-op calls.
    pub duplicates: u64,
    /// Calls older than the last applied one, or inconsistent volume beacons.
    pub stale: u64,
    /// Requests refused (not owner, moving).
    pub rejected: u64,
    /// Successful joins of a neighbor's performance.
    pub neighbor_syncs: u64,
    /// Follower updates triggered by a source changing motion.
    pub propagations: u64,
    pub replicas_sent: u64,
    pub replicas_received: u64,
    pub decode_failures: u64,
    pub transport_failures: u64,
    /// Messages about avatars this peer does not know.
    pub unroutable: u64,
}

impl SyncMetrics {
    pub fn merge(&mut self, other: &SyncMetrics) {
        self.calls_issued += other.calls_issued;
        self.transitions_applied += other.transitions_applied;
        self.duplicates += other.duplicates;
        self.stale += other.stale;
        self.rejected += other.rejected;
        self.neighbor_syncs += other.neighbor_syncs;
        self.propagations += other.propagations;
        self.replicas_sent += other.replicas_sent;
        self.replicas_received += other.replicas_received;
        self.decode_failures += other.decode_failures;
        self.transport_failures += other.transport_failures;
        self.unroutable += other.unroutable;
    }
}

/// Length of the shortest arc on the unit circle that covers every phase.
///
/// 0 means all phases agree; values approach 1 as phases spread evenly.
pub fn phase_spread(phases: &[f64]) -> f64 {
    if phases.len() < 2 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = phases.iter().map(|&p| wrap_unit(p)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut max_gap = sorted[0] + 1.0 - sorted[sorted.len() - 1];
    for pair in sorted.windows(2) {
        max_gap = max_gap.max(pair[1] - pair[0]);
    }
    (1.0 - max_gap).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spread_trivial() {
        assert_eq!(phase_spread(&[]), 0.0);
        assert_eq!(phase_spread(&[0.4]), 0.0);
        assert_relative_eq!(phase_spread(&[0.3, 0.3, 0.3]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spread_across_wrap() {
        // 0.95 and 0.05 are 0.1 apart through zero
        assert_relative_eq!(phase_spread(&[0.95, 0.05]), 0.1, epsilon = 1e-12);
        assert_relative_eq!(phase_spread(&[0.1, 0.2, 0.4]), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_merge() {
        let mut a = SyncMetrics {
            stale: 2,
            ..Default::default()
        };
        let b = SyncMetrics {
            stale: 3,
            neighbor_syncs: 1,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.stale, 5);
        assert_eq!(a.neighbor_syncs, 1);
    }
}
