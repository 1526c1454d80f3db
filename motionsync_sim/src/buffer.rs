//! Replace-latest call buffer used to replay state to late joiners.

use motionsync_env::{AvatarId, BufferSlot, BufferedCall, PeerId};
use std::collections::BTreeMap;

/// Last buffered call per (origin avatar, slot).
///
/// Recording a call evicts the previous one in the same slot, so a stop
/// removes a pending start and a late joiner never replays stale intent.
#[derive(Debug, Default)]
pub struct CallBuffer {
    entries: BTreeMap<(AvatarId, BufferSlot), (PeerId, BufferedCall)>,
}

impl CallBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `call`, returning the call it replaced.
    pub fn record(&mut self, sender: PeerId, call: BufferedCall) -> Option<BufferedCall> {
        self.entries
            .insert((call.origin, call.slot()), (sender, call))
            .map(|(_, old)| old)
    }

    /// Buffered calls in replay order (per avatar: motion, then volume).
    pub fn snapshot(&self) -> Vec<BufferedCall> {
        self.entries.values().map(|(_, call)| call.clone()).collect()
    }

    /// Drops everything a departing peer buffered.
    pub fn forget_peer(&mut self, peer: PeerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (sender, _)| *sender != peer);
        before - self.entries.len()
    }

    pub fn get(&self, origin: AvatarId, slot: BufferSlot) -> Option<&BufferedCall> {
        self.entries.get(&(origin, slot)).map(|(_, call)| call)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motionsync_env::CallKind;
    use proptest::prelude::*;

    #[test]
    fn test_stop_evicts_start() {
        let mut buffer = CallBuffer::new();
        let peer = PeerId::from_seed(1);
        let avatar = AvatarId::from_seed(1);

        buffer.record(peer, BufferedCall::new(avatar, CallKind::Start, 1, vec![1]));
        buffer.record(peer, BufferedCall::new(avatar, CallKind::ColliderToggle, 2, vec![2]));
        let replaced = buffer.record(peer, BufferedCall::new(avatar, CallKind::Stop, 3, vec![]));

        assert_eq!(replaced.map(|c| c.kind), Some(CallKind::Start));
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].kind, CallKind::Stop);
        assert_eq!(snapshot[1].kind, CallKind::ColliderToggle);
    }

    #[test]
    fn test_forget_peer() {
        let mut buffer = CallBuffer::new();
        let (p1, p2) = (PeerId::from_seed(1), PeerId::from_seed(2));
        buffer.record(p1, BufferedCall::new(AvatarId::from_seed(1), CallKind::Start, 1, vec![]));
        buffer.record(p2, BufferedCall::new(AvatarId::from_seed(2), CallKind::Start, 1, vec![]));

        assert_eq!(buffer.forget_peer(p1), 1);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.get(AvatarId::from_seed(1), BufferSlot::Motion).is_none());
    }

    proptest! {
        #[test]
        fn prop_snapshot_holds_last_call_per_slot(calls in proptest::collection::vec((0u64..3, 0u8..3), 1..40)) {
            let mut buffer = CallBuffer::new();
            let peer = PeerId::from_seed(1);
            let mut last = BTreeMap::new();

            for (seq, (origin, kind)) in calls.into_iter().enumerate() {
                let kind = match kind {
                    0 => CallKind::Start,
                    1 => CallKind::Stop,
                    _ => CallKind::ColliderToggle,
                };
                let call = BufferedCall::new(AvatarId::from_seed(origin), kind, seq as u64, vec![]);
                last.insert((call.origin, call.slot()), call.seq);
                buffer.record(peer, call);
            }

            prop_assert_eq!(buffer.len(), last.len());
            for call in buffer.snapshot() {
                prop_assert_eq!(last.get(&(call.origin, call.slot())), Some(&call.seq));
            }
        }
    }
}
