//! Fast Tier - In-Process Volatile Cache
//!
//! Holds small entries and short-TTL promotion copies of entries whose
//! tier-of-record is slower. Contents are advisory: anything here can be
//! evicted at any time because the tier-of-record still has the data.
//!
//! # Design
//!
//! - Sharded map for low lock contention
//! - Byte capacity with high/low watermarks and batch eviction
//! - Expired entries are removed on read; eviction prefers expired entries,
//!   then the least recently accessed

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::entry::{now_ms, Envelope};
use super::key::CacheKey;
use super::shard::ShardedMap;
use super::tier::{Tier, TierKind, TierStats};
use crate::error::Result;

/// Default Fast-tier capacity (64 MB)
pub const DEFAULT_FAST_CAPACITY: u64 = 64 * 1024 * 1024;

/// Fast tier configuration
#[derive(Debug, Clone)]
pub struct FastConfig {
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// Fill fraction that triggers eviction
    pub high_watermark: f64,
    /// Fill fraction at which eviction stops
    pub low_watermark: f64,
    /// Maximum entries evicted per pass
    pub eviction_batch_size: usize,
}

impl Default for FastConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_FAST_CAPACITY,
            high_watermark: 0.90,
            low_watermark: 0.80,
            eviction_batch_size: 256,
        }
    }
}

/// Stored envelope plus shared access-time tracking for eviction ordering
struct FastSlot {
    envelope: Envelope,
    last_access: AtomicI64,
}

impl FastSlot {
    fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            last_access: AtomicI64::new(now_ms()),
        }
    }

    fn touch(&self) {
        self.last_access.store(now_ms(), Ordering::Relaxed);
    }
}

/// Fast tier - in-process volatile cache
pub struct FastTier {
    storage: ShardedMap<Arc<FastSlot>>,
    config: FastConfig,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expired_purged: AtomicU64,
}

impl FastTier {
    /// Create a Fast tier with default configuration
    pub fn new() -> Self {
        Self::with_config(FastConfig::default())
    }

    /// Create a Fast tier with custom configuration
    pub fn with_config(config: FastConfig) -> Self {
        Self {
            storage: ShardedMap::new(),
            config,
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_purged: AtomicU64::new(0),
        }
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Current payload bytes
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    fn should_evict(&self) -> bool {
        let current = self.current_size.load(Ordering::Relaxed) as f64;
        current / self.config.capacity as f64 >= self.config.high_watermark
    }

    fn should_continue_eviction(&self) -> bool {
        let current = self.current_size.load(Ordering::Relaxed) as f64;
        current / self.config.capacity as f64 > self.config.low_watermark
    }

    /// Evict entries until the low watermark is reached: expired entries
    /// first, then least recently accessed.
    fn evict(&self) {
        let now = now_ms();
        let mut candidates: Vec<(CacheKey, f64)> = self
            .storage
            .entries()
            .into_iter()
            .map(|(key, slot)| {
                let score = if slot.envelope.is_expired() {
                    f64::MAX
                } else {
                    (now - slot.last_access.load(Ordering::Relaxed)) as f64
                };
                (key, score)
            })
            .collect();

        // Highest score first = most evictable
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut evicted = 0;
        for (key, _) in candidates {
            if !self.should_continue_eviction() || evicted >= self.config.eviction_batch_size {
                break;
            }
            if let Some(slot) = self.storage.remove(&key) {
                self.current_size
                    .fetch_sub(slot.envelope.size(), Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, size = self.size(), "fast tier eviction pass");
        }
    }

    fn remove_accounted(&self, key: &CacheKey) -> Option<Arc<FastSlot>> {
        let removed = self.storage.remove(key);
        if let Some(slot) = &removed {
            self.current_size
                .fetch_sub(slot.envelope.size(), Ordering::Relaxed);
        }
        removed
    }
}

impl Default for FastTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tier for FastTier {
    fn kind(&self) -> TierKind {
        TierKind::Fast
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Envelope>> {
        match self.storage.get(key) {
            Some(slot) if slot.envelope.is_expired() => {
                self.remove_accounted(key);
                self.expired_purged.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(slot) => {
                slot.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(slot.envelope.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, envelope: Envelope) -> Result<()> {
        let size = envelope.size();

        if self.should_evict() {
            self.evict();
        }

        // The copy here is advisory, an oversized entry is simply not kept
        if size > self.config.capacity {
            debug!(key = %key, size, "entry larger than fast tier capacity, skipping");
            return Ok(());
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        let old = self.storage.insert(key.clone(), Arc::new(FastSlot::new(envelope)));

        match old {
            Some(old_slot) => {
                let old_size = old_slot.envelope.size();
                if size > old_size {
                    self.current_size.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.current_size.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.current_size.fetch_add(size, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.remove_accounted(key).is_some())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<CacheKey>> {
        Ok(self
            .storage
            .keys()
            .into_iter()
            .filter(|key| key.full().starts_with(prefix))
            .collect())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut purged = 0;
        for (key, slot) in self.storage.entries() {
            if slot.envelope.is_expired() && self.remove_accounted(&key).is_some() {
                purged += 1;
            }
        }
        self.expired_purged.fetch_add(purged, Ordering::Relaxed);
        Ok(purged)
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear();
        self.current_size.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: self.storage.len() as u64,
            total_bytes: self.current_size.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
            corrupt_purged: 0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn make_key(name: &str) -> CacheKey {
        CacheKey::new("viz", name)
    }

    fn make_envelope(name: &str, data: &[u8], ttl: Duration) -> Envelope {
        Envelope::new(&make_key(name), Bytes::copy_from_slice(data), ttl)
    }

    #[tokio::test]
    async fn test_fast_tier_creation() {
        let tier = FastTier::new();
        assert!(tier.is_empty());
        assert_eq!(tier.size(), 0);
        assert_eq!(tier.kind(), TierKind::Fast);
    }

    #[tokio::test]
    async fn test_set_get() {
        let tier = FastTier::new();
        let key = make_key("items_42");

        tier.set(&key, make_envelope("items_42", b"hello", Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size(), 5);

        let env = tier.get(&key).await.unwrap().unwrap();
        assert_eq!(env.value().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_miss_tracking() {
        let tier = FastTier::new();
        let result = tier.get(&make_key("absent")).await.unwrap();

        assert!(result.is_none());
        assert_eq!(tier.stats().misses, 1);
        assert_eq!(tier.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_removed_on_read() {
        let tier = FastTier::new();
        let key = make_key("items_42");

        let expired = Envelope::with_expiry(
            &key,
            Bytes::from_static(b"stale"),
            now_ms() - 2000,
            now_ms() - 1000,
        );
        tier.set(&key, expired).await.unwrap();
        assert_eq!(tier.len(), 1);

        let result = tier.get(&key).await.unwrap();
        assert!(result.is_none());
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.size(), 0);
        assert_eq!(tier.stats().expired_purged, 1);
    }

    #[tokio::test]
    async fn test_replace_adjusts_size() {
        let tier = FastTier::new();
        let key = make_key("items_42");

        tier.set(&key, make_envelope("items_42", b"original", Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(tier.size(), 8);

        tier.set(&key, make_envelope("items_42", b"replaced content", Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size(), 16);
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let tier = FastTier::new();
        let key = make_key("items_42");

        tier.set(&key, make_envelope("items_42", b"data", Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(tier.delete(&key).await.unwrap());
        assert!(!tier.delete(&key).await.unwrap());
        assert_eq!(tier.size(), 0);
    }

    #[tokio::test]
    async fn test_scan_keys_by_prefix() {
        let tier = FastTier::new();

        for name in ["items_42_page1", "items_42_page2", "items_7_page1"] {
            tier.set(
                &make_key(name),
                make_envelope(name, b"data", Duration::from_secs(60)),
            )
            .await
            .unwrap();
        }

        let all = tier.scan_keys("viz:").await.unwrap();
        assert_eq!(all.len(), 3);

        let none = tier.scan_keys("other:").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let tier = FastTier::new();

        tier.set(
            &make_key("live"),
            make_envelope("live", b"data", Duration::from_secs(3600)),
        )
        .await
        .unwrap();

        let dead_key = make_key("dead");
        tier.set(
            &dead_key,
            Envelope::with_expiry(&dead_key, Bytes::from_static(b"xx"), now_ms() - 2000, now_ms() - 1000),
        )
        .await
        .unwrap();

        let purged = tier.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(tier.len(), 1);
        assert!(tier.get(&make_key("live")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_eviction_under_pressure() {
        let tier = FastTier::with_config(FastConfig {
            capacity: 1000,
            high_watermark: 0.80,
            low_watermark: 0.50,
            eviction_batch_size: 100,
        });

        for i in 0..20 {
            let name = format!("items_{}", i);
            tier.set(
                &make_key(&name),
                make_envelope(&name, &[i as u8; 100], Duration::from_secs(60)),
            )
            .await
            .unwrap();
        }

        assert!(tier.size() < 1000);
        assert!(tier.stats().evictions > 0);
    }

    #[tokio::test]
    async fn test_oversized_entry_skipped() {
        let tier = FastTier::with_config(FastConfig {
            capacity: 100,
            ..Default::default()
        });

        let key = make_key("huge");
        tier.set(&key, make_envelope("huge", &[0u8; 500], Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(tier.get(&key).await.unwrap().is_none());
        assert_eq!(tier.size(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let tier = FastTier::new();

        for i in 0..10 {
            let name = format!("items_{}", i);
            tier.set(
                &make_key(&name),
                make_envelope(&name, b"data", Duration::from_secs(60)),
            )
            .await
            .unwrap();
        }

        tier.clear().await.unwrap();
        assert!(tier.is_empty());
        assert_eq!(tier.size(), 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let tier = FastTier::new();
        let key = make_key("items_42");

        tier.set(&key, make_envelope("items_42", b"test data", Duration::from_secs(60)))
            .await
            .unwrap();
        tier.get(&key).await.unwrap();
        tier.get(&make_key("absent")).await.unwrap();

        let stats = tier.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 9);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }
}
