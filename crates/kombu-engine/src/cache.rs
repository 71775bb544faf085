//! Recompute vector cache.
//!
//! Bounded LRU keyed by node index, per searcher (never shared across
//! queries, so it takes no locks). Capacity is counted in vectors with an
//! optional byte ceiling; eviction is strictly least-recently-used, never
//! age-based, because the working set of one query is bounded by the beam's
//! fanout rather than by time.

use kombu_vector::NodeId;
use std::collections::{HashMap, VecDeque};

struct Entry {
    vector: Vec<f32>,
    /// Tick of the most recent touch; stale queue records are skipped.
    last_used: u64,
}

/// LRU cache of recomputed embeddings.
pub struct VectorCache {
    capacity: usize,
    byte_budget: Option<usize>,
    map: HashMap<NodeId, Entry>,
    /// (tick, node) in insertion order; lazily pruned on eviction.
    queue: VecDeque<(u64, NodeId)>,
    tick: u64,
    bytes: usize,
    hits: u64,
    misses: u64,
}

impl VectorCache {
    pub fn new(capacity: usize, byte_budget: Option<usize>) -> Self {
        Self {
            capacity: capacity.max(1),
            byte_budget,
            map: HashMap::new(),
            queue: VecDeque::new(),
            tick: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Look up a vector, refreshing its recency.
    pub fn get(&mut self, node: NodeId) -> Option<&[f32]> {
        self.tick += 1;
        let tick = self.tick;
        match self.map.get_mut(&node) {
            Some(entry) => {
                entry.last_used = tick;
                self.queue.push_back((tick, node));
                self.hits += 1;
                Some(&entry.vector)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a vector, evicting least-recently-used entries to stay within
    /// bounds.
    pub fn insert(&mut self, node: NodeId, vector: Vec<f32>) {
        self.tick += 1;
        let bytes = vector.len() * std::mem::size_of::<f32>();

        if let Some(old) = self.map.insert(
            node,
            Entry {
                vector,
                last_used: self.tick,
            },
        ) {
            self.bytes -= old.vector.len() * std::mem::size_of::<f32>();
        }
        self.bytes += bytes;
        self.queue.push_back((self.tick, node));

        self.evict_to_bounds();
    }

    fn over_budget(&self) -> bool {
        self.map.len() > self.capacity
            || self.byte_budget.is_some_and(|budget| self.bytes > budget)
    }

    fn evict_to_bounds(&mut self) {
        while self.over_budget() {
            let Some((tick, node)) = self.queue.pop_front() else {
                return;
            };
            // A newer queue record exists for a touched entry; this one is
            // stale.
            let evict = self
                .map
                .get(&node)
                .is_some_and(|entry| entry.last_used == tick);
            if evict {
                if let Some(entry) = self.map.remove(&node) {
                    self.bytes -= entry.vector.len() * std::mem::size_of::<f32>();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let mut cache = VectorCache::new(4, None);
        assert!(cache.get(1).is_none());

        cache.insert(1, vec![1.0, 2.0]);
        assert_eq!(cache.get(1), Some(&[1.0, 2.0][..]));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = VectorCache::new(2, None);
        cache.insert(1, vec![1.0]);
        cache.insert(2, vec![2.0]);

        // Touch 1 so 2 becomes the LRU victim.
        cache.get(1);
        cache.insert(3, vec![3.0]);

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_updates_value() {
        let mut cache = VectorCache::new(2, None);
        cache.insert(1, vec![1.0]);
        cache.insert(1, vec![9.0, 9.0]);
        assert_eq!(cache.get(1), Some(&[9.0, 9.0][..]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_byte_budget() {
        // Each vector is 8 bytes; budget of 20 holds two.
        let mut cache = VectorCache::new(100, Some(20));
        cache.insert(1, vec![1.0, 1.0]);
        cache.insert(2, vec![2.0, 2.0]);
        cache.insert(3, vec![3.0, 3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_capacity_floor() {
        let mut cache = VectorCache::new(0, None);
        cache.insert(1, vec![1.0]);
        assert!(cache.get(1).is_some());
    }
}
