//! Sharded Map
//!
//! Concurrent in-process storage for the Fast tier. Each shard owns its own
//! `RwLock`, so readers of different keys never contend, and the key's
//! precomputed hash picks the shard with a mask (shard count is a power of
//! two).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::key::CacheKey;
use super::FAST_SHARD_COUNT;

/// Single shard: a locked hashmap plus an entry counter
struct Shard<V> {
    map: RwLock<HashMap<CacheKey, V>>,
    count: AtomicU64,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
        }
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }
}

/// Fixed-shard concurrent map keyed by [`CacheKey`]
pub struct ShardedMap<V> {
    shards: Vec<Shard<V>>,
}

impl<V> ShardedMap<V> {
    /// Create an empty map with [`FAST_SHARD_COUNT`] shards
    pub fn new() -> Self {
        Self {
            shards: (0..FAST_SHARD_COUNT).map(|_| Shard::new()).collect(),
        }
    }

    #[inline]
    fn shard(&self, key: &CacheKey) -> &Shard<V> {
        &self.shards[key.shard_index(FAST_SHARD_COUNT)]
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Whether the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.len() == 0)
    }

    /// Check if a key is present
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.shard(key).map.read().contains_key(key)
    }

    /// Remove everything
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.map.write().clear();
            shard.count.store(0, Ordering::Relaxed);
        }
    }
}

impl<V: Clone> ShardedMap<V> {
    /// Get a value by key
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.shard(key).map.read().get(key).cloned()
    }

    /// Insert a value, returning the previous one if present
    pub fn insert(&self, key: CacheKey, value: V) -> Option<V> {
        let shard = self.shard(&key);
        let old = shard.map.write().insert(key, value);
        if old.is_none() {
            shard.count.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        let shard = self.shard(key);
        let removed = shard.map.write().remove(key);
        if removed.is_some() {
            shard.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Snapshot all entries (used for eviction scans and prefix scans)
    pub fn entries(&self) -> Vec<(CacheKey, V)> {
        let mut out = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let guard = shard.map.read();
            out.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    /// Snapshot all keys
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut out = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let guard = shard.map.read();
            out.extend(guard.keys().cloned());
        }
        out
    }
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
