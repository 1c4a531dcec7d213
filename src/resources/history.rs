//! Bounded sample history.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Append-only ring of recent samples; the oldest entry is dropped when full.
#[derive(Debug)]
pub struct SampleHistory<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> SampleHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, sample: T) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(sample);
    }

    pub fn latest(&self) -> Option<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    /// Oldest-first copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop everything but the newest `keep` entries.
    pub fn retain_latest(&self, keep: usize) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let excess = entries.len().saturating_sub(keep);
        entries.drain(..excess);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
