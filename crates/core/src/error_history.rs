//! Bounded in-memory history of classified errors for diagnostics.

use std::collections::VecDeque;

use crate::classify::{ClassifiedError, ErrorKind, Severity};

/// Default number of errors retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// FIFO ring of the most recent errors; the oldest entry is evicted once
/// `capacity` is reached.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    entries: VecDeque<ClassifiedError>,
    capacity: usize,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, error: ClassifiedError) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
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

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedError> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&ClassifiedError> {
        self.entries.back()
    }

    pub fn count_kind(&self, kind: ErrorKind) -> usize {
        self.entries.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity() >= severity).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
