//! Bounded record cache.
//!
//! [`ArrayCache`] keeps the most recent records of a stream (trades) in
//! insertion order. Once full, every append evicts the oldest record.
//!
//! The cache also counts records appended since the last
//! [`take_new_updates`](ArrayCache::take_new_updates), so a watcher can be
//! handed only what it has not seen yet.

use std::collections::VecDeque;

/// Bounded FIFO with a new-updates counter
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    items: VecDeque<T>,
    capacity: usize,
    new_updates: usize,
}

impl<T> ArrayCache<T> {
    /// Default number of records kept
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a cache holding at most `capacity` records
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            new_updates: 0,
        }
    }

    /// Append a record, evicting the oldest if full
    pub fn append(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
        self.new_updates = (self.new_updates + 1).min(self.capacity);
    }

    /// Maximum number of records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the cache holds no records
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records appended since the last take
    pub fn new_updates(&self) -> usize {
        self.new_updates
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.items.iter()
    }

    /// Most recent record
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.items.clear();
        self.new_updates = 0;
    }
}

impl<T: Clone> ArrayCache<T> {
    /// Copy out the records appended since the last call, oldest first
    pub fn take_new_updates(&mut self) -> Vec<T> {
        let skip = self.items.len() - self.new_updates;
        self.new_updates = 0;
        self.items.iter().skip(skip).cloned().collect()
    }

    /// Copy out the newest `n` records, oldest first
    pub fn tail(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}

impl<T> Default for ArrayCache<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
