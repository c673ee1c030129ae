//! Message deduplication for mesh flooding
//!
//! Tracks message ids this device has already accepted or originated so a
//! flooded copy is handled at most once. Ids are kept in two exact generations:
//! when the current generation fills up it becomes the previous one and the
//! oldest generation is dropped. The persistent store remains the authority for
//! anything that has aged out of memory.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::types::MessageId;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Default number of ids held per generation
pub const DEFAULT_GENERATION_CAPACITY: usize = 4096;

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Statistics for deduplication behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationStats {
    /// Total ids checked
    pub messages_processed: u64,
    /// Ids that had already been seen
    pub duplicates_detected: u64,
    /// Number of generation rotations
    pub rotations: u64,
}

impl DeduplicationStats {
    pub fn duplicate_rate(&self) -> f64 {
        if self.messages_processed == 0 {
            0.0
        } else {
            (self.duplicates_detected as f64) / (self.messages_processed as f64)
        }
    }
}

// ----------------------------------------------------------------------------
// Seen Set
// ----------------------------------------------------------------------------

/// Bounded exact set of recently seen message ids
#[derive(Debug, Clone)]
pub struct SeenMessages {
    current: HashSet<MessageId>,
    previous: HashSet<MessageId>,
    capacity: usize,
    stats: DeduplicationStats,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            current: HashSet::with_capacity(capacity),
            previous: HashSet::new(),
            capacity,
            stats: DeduplicationStats::default(),
        }
    }

    /// Record an id; returns true if it had already been seen
    pub fn check_and_add(&mut self, id: &MessageId) -> bool {
        self.stats.messages_processed += 1;

        if self.contains(id) {
            self.stats.duplicates_detected += 1;
            return true;
        }

        if self.current.len() >= self.capacity {
            self.rotate();
        }
        self.current.insert(id.clone());
        false
    }

    /// Check without recording
    pub fn contains(&self, id: &MessageId) -> bool {
        self.current.contains(id) || self.previous.contains(id)
    }

    /// Mark an id as seen without touching statistics
    pub fn insert(&mut self, id: MessageId) {
        if self.contains(&id) {
            return;
        }
        if self.current.len() >= self.capacity {
            self.rotate();
        }
        self.current.insert(id);
    }

    /// Age the current generation out
    pub fn rotate(&mut self) {
        self.stats.rotations += 1;
        self.previous = core::mem::replace(
            &mut self.current,
            HashSet::with_capacity(self.capacity),
        );
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &DeduplicationStats {
        &self.stats
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATION_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
