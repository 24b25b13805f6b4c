//! Cache Key Convention
//!
//! Keys follow `<namespace>:<logical-name>[_<partition_id>][_<suffix>]`,
//! e.g. `viz:items_42_page1`. The partition id is a whole underscore-delimited
//! token of the logical name, which is what makes partition invalidation safe:
//! partition `42` matches `items_42_page1` but never `items_142_page1`.
//!
//! Lock records derive from the cache key by appending a fixed suffix
//! (`items_42_page1.lock`) and are excluded from partition scans.

use std::hash::{Hash, Hasher};

/// Suffix appended to a cache key to form its production-lock key
pub const LOCK_SUFFIX: &str = ".lock";

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Namespace-qualified cache key
#[derive(Clone, Debug, Eq)]
pub struct CacheKey {
    /// Hash of the full key (for fast comparison and shard/path derivation)
    hash: u64,
    /// Full key string, namespace included
    full: String,
}

impl CacheKey {
    /// Create a key from a namespace and a logical name
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self::from_full(format!("{}:{}", namespace.as_ref(), name.as_ref()))
    }

    /// Create a key from an already-qualified full string
    pub fn from_full(full: impl Into<String>) -> Self {
        let full = full.into();
        let hash = fx_hash(full.as_bytes());
        Self { hash, full }
    }

    /// Get the full key string (namespace included)
    #[inline]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Get the logical name (the part after the namespace separator)
    #[inline]
    pub fn name(&self) -> &str {
        match self.full.split_once(':') {
            Some((_, name)) => name,
            None => &self.full,
        }
    }

    /// Get the namespace prefix, if present
    #[inline]
    pub fn namespace(&self) -> Option<&str> {
        self.full.split_once(':').map(|(ns, _)| ns)
    }

    /// Get the precomputed key hash
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Get the shard index for this key (0..shard_count, shard_count a power of two)
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        (self.hash as usize) & (shard_count - 1)
    }

    /// Derive the production-lock key for this key
    pub fn lock_key(&self) -> CacheKey {
        Self::from_full(format!("{}{}", self.full, LOCK_SUFFIX))
    }

    /// Whether this key names a production-lock record
    #[inline]
    pub fn is_lock(&self) -> bool {
        self.full.ends_with(LOCK_SUFFIX)
    }

    /// Whether this key belongs to the given partition.
    ///
    /// The partition id must appear as a whole underscore-delimited token of
    /// the logical name. Lock records never match.
    pub fn matches_partition(&self, partition_id: &str) -> bool {
        if self.is_lock() || partition_id.is_empty() {
            return false;
        }
        self.name().split('_').any(|token| token == partition_id)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        if self.hash != other.hash {
            return false;
        }
        // Slow path: full string comparison for collision resolution
        self.full == other.full
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Use the pre-computed hash
        self.hash.hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

// =============================================================================
// Tests
// =============================================================================
