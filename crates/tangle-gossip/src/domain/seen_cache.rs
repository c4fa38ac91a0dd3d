//! Recently seen transaction payloads.
//!
//! Maps a keyed SipHash digest of the expanded transaction bytes to the
//! transaction's hash. A duplicate then skips hashing, the weight check and
//! the store, and only its piggy-backed request is answered.

use parking_lot::Mutex;
use siphasher::sip::SipHasher13;
use std::collections::{HashMap, VecDeque};
use std::hash::Hasher;

use super::entities::TxHash;

/// Drop-oldest digest cache.
pub struct RecentlySeenCache {
    keys: (u64, u64),
    inner: Mutex<SeenInner>,
    capacity: usize,
}

#[derive(Default)]
struct SeenInner {
    hashes: HashMap<u64, TxHash>,
    order: VecDeque<u64>,
}

impl RecentlySeenCache {
    /// Creates an empty cache with random digest keys.
    pub fn new(capacity: usize) -> Self {
        Self::with_keys(capacity, rand::random(), rand::random())
    }

    pub fn with_keys(capacity: usize, k0: u64, k1: u64) -> Self {
        Self {
            keys: (k0, k1),
            inner: Mutex::new(SeenInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Digest of full transaction bytes under this cache's keys.
    pub fn digest(&self, tx_bytes: &[u8]) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(self.keys.0, self.keys.1);
        hasher.write(tx_bytes);
        hasher.finish()
    }

    pub fn get(&self, digest: u64) -> Option<TxHash> {
        self.inner.lock().hashes.get(&digest).copied()
    }

    /// Records `hash` under `digest`, evicting the oldest entry when full.
    pub fn insert(&self, digest: u64, hash: TxHash) {
        let mut inner = self.inner.lock();
        if inner.hashes.insert(digest, hash).is_some() {
            return;
        }
        inner.order.push_back(digest);
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.hashes.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
