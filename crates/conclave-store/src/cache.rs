//! Bounded cache with insertion-order eviction
//!
//! Once the cache holds `capacity` entries, inserting a new key evicts the
//! oldest-inserted key still present. Reads do not refresh an entry's
//! position, and overwriting an existing key keeps its original position.

use conclave_core::{GenerationId, Segmentation};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct InsertionOrderCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Per-instance cache of segmentation results keyed by generation id
pub type SegmentationCache = InsertionOrderCache<GenerationId, Segmentation>;

impl<K, V> InsertionOrderCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Create a cache; a capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a key, counting the hit or miss
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a value, returning the key evicted to make room, if any
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                self.evictions += 1;
                evicted = Some(oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            len: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

impl<K, V> Default for InsertionOrderCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
