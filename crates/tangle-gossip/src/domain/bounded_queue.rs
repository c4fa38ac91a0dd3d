//! Bounded, thread-safe FIFO queues with drop-oldest eviction.
//!
//! When full, pushing evicts the oldest entry so producers never block and
//! the consumer always sees the most recent work.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Drop-oldest FIFO.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Appends `item`, returning the evicted entry if the queue was full.
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }
}

impl<T> BoundedQueue<T> {
    /// Keeps only the entries for which `keep` returns `true`.
    ///
    /// Runs under the queue lock, so `keep` should be a cheap lookup.
    pub fn retain<F>(&self, keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.items.lock().retain(keep);
    }
}

/// Drop-oldest FIFO that ignores pushes of entries already queued.
#[derive(Debug)]
pub struct DedupQueue<T> {
    inner: Mutex<DedupInner<T>>,
    capacity: usize,
}

#[derive(Debug)]
struct DedupInner<T> {
    order: VecDeque<T>,
    members: HashSet<T>,
}

impl<T: Eq + Hash + Clone> DedupQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DedupInner {
                order: VecDeque::new(),
                members: HashSet::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Enqueues `item` unless it is already present.
    ///
    /// Returns `false` for duplicates.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.members.contains(&item) {
            return false;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.members.remove(&oldest);
            }
        }
        inner.members.insert(item.clone());
        inner.order.push_back(item);
        true
    }

    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.order.pop_front()?;
        inner.members.remove(&item);
        Some(item)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.inner.lock().members.contains(item)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
