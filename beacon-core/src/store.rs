//! Bounded, append-only log of generated narratives.

use crate::model::GeneratedNarrative;
use std::collections::VecDeque;

/// Default number of narratives kept before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 1000;

/// In-memory narrative log.
///
/// Entries are never updated. Once `capacity` entries are held, each insert
/// evicts the oldest-inserted entry.
#[derive(Debug)]
pub struct NarrativeStore {
    entries: VecDeque<GeneratedNarrative>,
    capacity: usize,
}

impl Default for NarrativeStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NarrativeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Append a narrative. Returns the evicted entry, if any.
    pub fn insert(&mut self, narrative: GeneratedNarrative) -> Option<GeneratedNarrative> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(narrative);
        evicted
    }

    /// Every stored narrative, newest timestamp first.
    ///
    /// Entries with equal timestamps are ordered newest-inserted first.
    pub fn list_all(&self) -> Vec<GeneratedNarrative> {
        let mut all: Vec<GeneratedNarrative> = self.entries.iter().rev().cloned().collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all
    }

    /// The `n` newest narratives.
    pub fn recent(&self, n: usize) -> Vec<GeneratedNarrative> {
        let mut all = self.list_all();
        all.truncate(n);
        all
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
}
