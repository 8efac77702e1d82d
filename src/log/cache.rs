use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::StorageKey;

/// Sharded LRU of clean, persisted pages keyed by storage key.
///
/// Only immutable persisted pages are ever inserted, so evicting an entry
/// loses nothing but a backend read. Dirty pages live in the transaction
/// log and never pass through here.
pub struct PageCache<V> {
    shards: Vec<Mutex<LruCache<StorageKey, V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit and miss counters of a [`PageCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through.
    pub misses: u64,
}

impl<V: Clone> PageCache<V> {
    /// Creates a cache holding roughly `capacity` entries over `shards` locks.
    pub fn new(shards: usize, capacity: usize) -> Self {
        let shard_count = shards.max(1);
        let per_shard_cap = NonZeroUsize::new(capacity / shard_count).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard_cap)))
            .collect();
        Self {
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached value for `key`, refreshing its recency.
    pub fn get(&self, key: StorageKey) -> Option<V> {
        let found = self.shard_for(key).lock().get(&key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Caches `value` under `key`, possibly evicting the least recently used entry.
    pub fn insert(&self, key: StorageKey, value: V) {
        self.shard_for(key).lock().put(key, value);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries across all shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().cap().get()).sum()
    }

    /// Snapshot of the hit and miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drops every entry; counters are kept.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    fn shard_for(&self, key: StorageKey) -> &Mutex<LruCache<StorageKey, V>> {
        let idx = (key.0 as usize) % self.shards.len();
        &self.shards[idx]
    }
}
