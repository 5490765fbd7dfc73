// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Bounded event-id dedup set
//!
//! Remembers which event IDs were already seen. When the capacity is exceeded, the least
//! recently seen 40% is evicted in one pass, so the cost of pruning is amortized.

use std::num::NonZeroUsize;

use lru::LruCache;
use nostr::EventId;

/// Default capacity
pub const DEFAULT_DEDUP_CAPACITY: usize = 20_000;

/// Percentage of the entries evicted when the capacity is exceeded
const PRUNE_PERCENT: usize = 40;

/// Bounded dedup set, ordered by last sighting
#[derive(Debug)]
pub struct DedupSet {
    seen: LruCache<EventId, ()>,
    capacity: NonZeroUsize,
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DedupSet {
    /// New dedup set
    ///
    /// A capacity of `0` is treated as `1`.
    pub fn new(capacity: usize) -> Self {
        Self {
            // `LruCache::new` pre-allocates: keep it unbounded and prune manually
            seen: LruCache::unbounded(),
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Record a sighting
    ///
    /// Returns `true` if the ID was never seen (or was already evicted).
    pub fn insert(&mut self, id: EventId) -> bool {
        if self.seen.contains(&id) {
            self.seen.promote(&id);
            return false;
        }

        self.seen.put(id, ());

        if self.seen.len() > self.capacity.get() {
            self.prune();
        }

        true
    }

    /// Check if the ID is currently remembered
    #[inline]
    pub fn contains(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    /// Number of remembered IDs
    #[inline]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything
    #[inline]
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    fn prune(&mut self) {
        let to_remove: usize = self.seen.len() * PRUNE_PERCENT / 100;

        for _ in 0..to_remove {
            if self.seen.pop_lru().is_none() {
                break;
            }
        }

        tracing::trace!(removed = to_remove, kept = self.seen.len(), "Pruned dedup set.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> EventId {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_be_bytes());
        EventId::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_duplicate_suppressed() {
        let mut set = DedupSet::default();
        assert!(set.insert(id(1)));
        assert!(!set.insert(id(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_prune_keeps_sixty_percent() {
        let mut set = DedupSet::default();

        for n in 0..20_001 {
            assert!(set.insert(id(n)));
        }

        // 40% of 20001 entries evicted
        assert_eq!(set.len(), 12_001);

        // The oldest entries are gone
        assert!(!set.contains(&id(0)));
        assert!(!set.contains(&id(7_999)));

        // A retained ID is still suppressed
        assert!(set.contains(&id(20_000)));
        assert!(!set.insert(id(20_000)));
        assert!(set.contains(&id(8_000)));
        assert!(!set.insert(id(8_000)));
    }

    #[test]
    fn test_sighting_refreshes_order() {
        let mut set = DedupSet::new(4);

        for n in 0..4 {
            set.insert(id(n));
        }

        // Seen again: no longer the oldest
        assert!(!set.insert(id(0)));

        // Exceeds capacity: 40% of 5 = 2 evicted (1 and 2)
        set.insert(id(4));
        assert_eq!(set.len(), 3);
        assert!(set.contains(&id(0)));
        assert!(!set.contains(&id(1)));
        assert!(!set.contains(&id(2)));
    }
}
