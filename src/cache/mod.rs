//! Bounded, strictly least-recently-used caches shared across requests.
//!
//! Every cache is an owned object injected where it is needed. Access goes
//! through a mutex around an O(1) `lru::LruCache`; a lookup promotes the entry
//! exactly like an insert does.

pub mod embedding;
pub mod response;


use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use embedding::EmbeddingCache;
pub use response::ResponseCache;

/// Thread-safe LRU map with a fixed capacity.
pub struct LruStore<K, V> {
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> LruStore<K, V> {
    /// Create a store holding at most `capacity` entries (minimum one)
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a value, marking it as most recently used
    #[inline]
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Check for a key without touching the recency order
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    /// Insert or replace a value, evicting the least recently used entry when full.
    ///
    /// Returns the evicted key, if any.
    #[inline]
    pub fn put(&self, key: K, value: V) -> Option<K> {
        let mut entries = self.lock();
        let replacing = entries.contains(&key);
        let evicted = entries.push(key, value);
        drop(entries);

        if replacing {
            None
        } else {
            evicted.map(|(key, _)| key)
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    #[inline]
    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while the lock is held cannot leave the LruCache half-updated
    // from our side, so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
