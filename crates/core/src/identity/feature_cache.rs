//! Bounded memo of hybrid vectors, keyed by frame and track.
//!
//! Entries carry no identity meaning: dropping any of them only costs a
//! recomputation. Eviction is strictly by insertion order.
use std::collections::{HashMap, VecDeque};

use crate::identity::person::TrackId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub frame_index: usize,
    pub track: TrackId,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    vector: Vec<f32>,
    inserted: u64,
}

pub struct FeatureCache {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<(CacheKey, u64)>,
    capacity: usize,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl FeatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<&[f32]> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.vector)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces `key`. A replaced entry counts as newly inserted.
    pub fn insert(&mut self, key: CacheKey, vector: Vec<f32>) {
        self.clock += 1;
        let inserted = self.clock;
        self.entries.insert(key, CacheEntry { vector, inserted });
        self.order.push_back((key, inserted));
        self.evict_overflow();
    }

    pub fn get_or_compute<E>(
        &mut self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<Vec<f32>, E>,
    ) -> Result<Vec<f32>, E> {
        if let Some(vector) = self.get(&key) {
            return Ok(vector.to_vec());
        }
        let vector = compute()?;
        self.insert(key, vector.clone());
        Ok(vector)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((key, inserted)) = self.order.pop_front() else {
                break;
            };
            // Queue slots left behind by a replaced key are skipped.
            if self.entries.get(&key).is_some_and(|e| e.inserted == inserted) {
                self.entries.remove(&key);
            }
        }
        if self.order.len() > self.capacity * 2 {
            let entries = &self.entries;
            self.order
                .retain(|(k, ins)| entries.get(k).is_some_and(|e| e.inserted == *ins));
        }
    }
}
