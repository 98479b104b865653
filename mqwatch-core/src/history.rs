//! Fixed-capacity FIFO history retaining the most recent items.

use std::collections::VecDeque;

/// Bounded FIFO container retaining the most recent `capacity` items.
///
/// Appending never fails: at capacity, the oldest item is evicted to make
/// room, so the buffer always holds the newest items in append order.
/// Listeners use it to keep per-connection received, sent, and error
/// histories from growing without bound on long-lived connections.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Create a history retaining at most `capacity` items.
    ///
    /// A zero capacity is raised to one; an empty history cannot record
    /// anything and has no use.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append an item, evicting the oldest if the history is full
    pub fn append(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Number of items currently retained
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the history holds no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of items the history retains
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Snapshot of all retained items, ordered oldest to newest.
    ///
    /// The returned vector is detached from the history; mutating it does not
    /// affect retained state.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
