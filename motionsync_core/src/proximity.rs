//! The "PROXIMITY" Engine - who may copy whose motion.
//!
//! Each avatar (the observer) keeps an ordered group of avatars whose enabled
//! detection volume it currently overlaps. The oldest member is the default
//! sync source, which makes the choice deterministic when several
//! performers are in range.
//!
//! Two relations live in one arena so that teardown never needs object
//! back-references:
//!
//! ```text
//!   group:       observer  --member-->     performer   (discoverers = reverse)
//!   follow:      follower  --copies-->     source      (followers   = reverse)
//! ```
//!
//! Slots are addressed by index; a freed slot is scrubbed from every list
//! before it is reused.

use motionsync_env::AvatarId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Slot {
    id: AvatarId,
    /// Performers this avatar overlaps, in discovery order.
    group: Vec<usize>,
    /// Observers that have this avatar in their group.
    discoverers: Vec<usize>,
    follows: Option<usize>,
    followers: Vec<usize>,
}

impl Slot {
    fn new(id: AvatarId) -> Self {
        Self {
            id,
            group: Vec::new(),
            discoverers: Vec::new(),
            follows: None,
            followers: Vec::new(),
        }
    }
}

fn remove_index(list: &mut Vec<usize>, idx: usize) -> bool {
    match list.iter().position(|&i| i == idx) {
        Some(pos) => {
            // Vec::remove keeps discovery order intact
            list.remove(pos);
            true
        }
        None => false,
    }
}

/// Central registry of proximity groups and follow subscriptions.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRegistry {
    slots: Vec<Option<Slot>>,
    index: HashMap<AvatarId, usize>,
    free: Vec<usize>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an avatar. Idempotent.
    pub fn register(&mut self, id: AvatarId) {
        if self.index.contains_key(&id) {
            return;
        }
        let slot = Some(Slot::new(id));
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.index.insert(id, idx);
    }

    /// Removes an avatar and every reference to it.
    ///
    /// Returns the avatars that were following it and lost their source.
    pub fn unregister(&mut self, id: AvatarId) -> Vec<AvatarId> {
        let Some(idx) = self.index.remove(&id) else {
            return Vec::new();
        };
        let Some(slot) = self.slots[idx].take() else {
            return Vec::new();
        };

        for &d in &slot.discoverers {
            if let Some(s) = self.slots[d].as_mut() {
                remove_index(&mut s.group, idx);
            }
        }
        for &m in &slot.group {
            if let Some(s) = self.slots[m].as_mut() {
                remove_index(&mut s.discoverers, idx);
            }
        }
        if let Some(src) = slot.follows {
            if let Some(s) = self.slots[src].as_mut() {
                remove_index(&mut s.followers, idx);
            }
        }
        let mut orphaned = Vec::with_capacity(slot.followers.len());
        for &f in &slot.followers {
            if let Some(s) = self.slots[f].as_mut() {
                s.follows = None;
                orphaned.push(s.id);
            }
        }

        self.free.push(idx);
        orphaned
    }

    pub fn contains(&self, id: AvatarId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    fn id_of(&self, idx: usize) -> Option<AvatarId> {
        self.slot(idx).map(|s| s.id)
    }

    fn pair(&self, a: AvatarId, b: AvatarId) -> Option<(usize, usize)> {
        Some((*self.index.get(&a)?, *self.index.get(&b)?))
    }

    // ========================================================================
    // GROUP MEMBERSHIP
    // ========================================================================

    /// Adds `other` to `observer`'s group on overlap-enter.
    ///
    /// Only an idle observer joins, only an active performer is joined, and an
    /// avatar never joins itself. Returns true if membership changed.
    pub fn try_join_group(
        &mut self,
        observer: AvatarId,
        other: AvatarId,
        other_active: bool,
        observer_idle: bool,
    ) -> bool {
        if observer == other || !other_active || !observer_idle {
            return false;
        }
        let Some((o, p)) = self.pair(observer, other) else {
            return false;
        };
        if self.slot(o).map_or(true, |s| s.group.contains(&p)) {
            return false;
        }
        if let Some(s) = self.slots[o].as_mut() {
            s.group.push(p);
        }
        if let Some(s) = self.slots[p].as_mut() {
            s.discoverers.push(o);
        }
        true
    }

    /// Removes `other` from `observer`'s group on overlap-exit.
    pub fn leave_group(&mut self, observer: AvatarId, other: AvatarId) -> bool {
        let Some((o, p)) = self.pair(observer, other) else {
            return false;
        };
        let removed = self.slots[o]
            .as_mut()
            .map_or(false, |s| remove_index(&mut s.group, p));
        if let Some(s) = self.slots[p].as_mut() {
            remove_index(&mut s.discoverers, o);
        }
        removed
    }

    /// Tears down every membership in `other`'s name (its volume went off).
    ///
    /// Idempotent. Returns the observers that lost it.
    pub fn deactivate(&mut self, other: AvatarId) -> Vec<AvatarId> {
        let Some(&p) = self.index.get(&other) else {
            return Vec::new();
        };
        let discoverers = match self.slots[p].as_mut() {
            Some(s) => std::mem::take(&mut s.discoverers),
            None => return Vec::new(),
        };
        let mut observers = Vec::with_capacity(discoverers.len());
        for d in discoverers {
            if let Some(s) = self.slots[d].as_mut() {
                remove_index(&mut s.group, p);
                observers.push(s.id);
            }
        }
        observers
    }

    /// Members of `observer`'s group in discovery order.
    pub fn group(&self, observer: AvatarId) -> Vec<AvatarId> {
        self.index
            .get(&observer)
            .and_then(|&o| self.slot(o))
            .map(|s| s.group.iter().filter_map(|&i| self.id_of(i)).collect())
            .unwrap_or_default()
    }

    /// The oldest member of `observer`'s group.
    pub fn default_source(&self, observer: AvatarId) -> Option<AvatarId> {
        let o = *self.index.get(&observer)?;
        let first = *self.slot(o)?.group.first()?;
        self.id_of(first)
    }

    pub fn is_member(&self, observer: AvatarId, other: AvatarId) -> bool {
        self.pair(observer, other)
            .and_then(|(o, p)| self.slot(o).map(|s| s.group.contains(&p)))
            .unwrap_or(false)
    }

    // ========================================================================
    // FOLLOW SUBSCRIPTIONS
    // ========================================================================

    /// Subscribes `follower` to `source`'s motion changes, replacing any
    /// previous subscription.
    pub fn follow(&mut self, follower: AvatarId, source: AvatarId) -> bool {
        if follower == source {
            return false;
        }
        let Some((f, s)) = self.pair(follower, source) else {
            return false;
        };
        self.unfollow(follower);
        if let Some(slot) = self.slots[f].as_mut() {
            slot.follows = Some(s);
        }
        if let Some(slot) = self.slots[s].as_mut() {
            slot.followers.push(f);
        }
        true
    }

    /// Drops `follower`'s subscription. Returns the former source.
    pub fn unfollow(&mut self, follower: AvatarId) -> Option<AvatarId> {
        let f = *self.index.get(&follower)?;
        let s = self.slots[f].as_mut()?.follows.take()?;
        if let Some(slot) = self.slots[s].as_mut() {
            remove_index(&mut slot.followers, f);
        }
        self.id_of(s)
    }

    pub fn source_of(&self, follower: AvatarId) -> Option<AvatarId> {
        let f = *self.index.get(&follower)?;
        self.slot(f)?.follows.and_then(|s| self.id_of(s))
    }

    pub fn followers_of(&self, source: AvatarId) -> Vec<AvatarId> {
        self.index
            .get(&source)
            .and_then(|&s| self.slot(s))
            .map(|slot| slot.followers.iter().filter_map(|&i| self.id_of(i)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u64) -> Vec<AvatarId> {
        (0..n).map(AvatarId::from_seed).collect()
    }

    fn registry(avatars: &[AvatarId]) -> DiscoveryRegistry {
        let mut reg = DiscoveryRegistry::new();
        for &a in avatars {
            reg.register(a);
        }
        reg
    }

    #[test]
    fn test_join_rules() {
        let a = ids(3);
        let mut reg = registry(&a);

        assert!(!reg.try_join_group(a[0], a[0], true, true), "never joins self");
        assert!(!reg.try_join_group(a[0], a[1], false, true), "inactive other");
        assert!(!reg.try_join_group(a[0], a[1], true, false), "performing observer");
        assert!(reg.try_join_group(a[0], a[1], true, true));
        assert!(!reg.try_join_group(a[0], a[1], true, true), "already member");
        assert!(reg.is_member(a[0], a[1]));
    }

    #[test]
    fn test_default_source_is_first_discovered() {
        let a = ids(3);
        let mut reg = registry(&a);
        reg.try_join_group(a[0], a[1], true, true);
        reg.try_join_group(a[0], a[2], true, true);
        assert_eq!(reg.group(a[0]), vec![a[1], a[2]]);
        assert_eq!(reg.default_source(a[0]), Some(a[1]));

        reg.leave_group(a[0], a[1]);
        assert_eq!(reg.default_source(a[0]), Some(a[2]));
    }

    #[test]
    fn test_deactivate_removes_without_exit() {
        let a = ids(3);
        let mut reg = registry(&a);
        reg.try_join_group(a[0], a[1], true, true);
        reg.try_join_group(a[2], a[1], true, true);

        let mut torn = reg.deactivate(a[1]);
        torn.sort();
        let mut expected = vec![a[0], a[2]];
        expected.sort();
        assert_eq!(torn, expected);
        assert!(!reg.is_member(a[0], a[1]));
        assert!(reg.group(a[2]).is_empty());

        // Second teardown is a no-op
        assert!(reg.deactivate(a[1]).is_empty());
    }

    #[test]
    fn test_unregister_scrubs_everything() {
        let a = ids(3);
        let mut reg = registry(&a);
        reg.try_join_group(a[0], a[1], true, true);
        reg.try_join_group(a[1], a[2], true, true);
        reg.follow(a[0], a[1]);
        reg.follow(a[1], a[2]);

        let orphaned = reg.unregister(a[1]);
        assert_eq!(orphaned, vec![a[0]]);
        assert!(reg.group(a[0]).is_empty());
        assert_eq!(reg.source_of(a[0]), None);
        assert!(reg.followers_of(a[2]).is_empty());
        assert!(!reg.contains(a[1]));

        // Reused slot starts clean
        let fresh = AvatarId::from_seed(99);
        reg.register(fresh);
        assert!(reg.group(fresh).is_empty());
        assert!(reg.followers_of(fresh).is_empty());
        assert_eq!(reg.default_source(a[0]), None);
    }

    #[test]
    fn test_follow_replaces_previous() {
        let a = ids(3);
        let mut reg = registry(&a);
        assert!(!reg.follow(a[0], a[0]));
        reg.follow(a[0], a[1]);
        reg.follow(a[0], a[2]);
        assert_eq!(reg.source_of(a[0]), Some(a[2]));
        assert!(reg.followers_of(a[1]).is_empty());
        assert_eq!(reg.followers_of(a[2]), vec![a[0]]);
        assert_eq!(reg.unfollow(a[0]), Some(a[2]));
        assert_eq!(reg.unfollow(a[0]), None);
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let a = ids(2);
        let mut reg = registry(&a[..1]);
        assert!(!reg.try_join_group(a[0], a[1], true, true));
        assert!(!reg.leave_group(a[0], a[1]));
        assert!(reg.deactivate(a[1]).is_empty());
        assert!(reg.unregister(a[1]).is_empty());
    }
}
