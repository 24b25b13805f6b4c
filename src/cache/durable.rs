//! Durable Tier - Shared Key/Value Store
//!
//! Tier-of-record for medium entries and for pointer stubs describing Bulk
//! entries. The backing store is shared by every process of the service, so
//! this tier is also where cross-process coordination state (fill locks)
//! lives.
//!
//! # Design
//!
//! - [`KvBackend`] abstracts the store: any KV with get/put/compare-free
//!   put-if-absent/delete/prefix-scan can back this tier
//! - Values are encoded envelopes; decode failures are treated as corruption,
//!   the entry is deleted and the read reports a miss
//! - `put_if_absent` is the atomic primitive the fill-lock protocol builds on

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::warn;

use super::entry::Envelope;
use super::key::CacheKey;
use super::tier::{Tier, TierKind, TierStats};
use crate::error::{Error, Result};

/// Default per-entry size limit for the Durable tier (1 MB).
///
/// Shared KV stores commonly refuse values above a hard threshold; entries
/// that would exceed it must be routed to the Bulk tier instead.
pub const DEFAULT_DURABLE_MAX_ENTRY_BYTES: u64 = 1024 * 1024;

// =============================================================================
// Backend Abstraction
// =============================================================================

/// Raw key/value store behind the Durable tier.
///
/// Implementations must make `put_if_absent` atomic with respect to
/// concurrent callers in any process sharing the store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Store `value` under `key` only if no value exists.
    /// Returns `true` if the value was stored.
    async fn put_if_absent(&self, key: &str, value: Bytes) -> Result<bool>;

    /// Remove the value under `key`, returning whether one existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List every key starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-process [`KvBackend`] used by tests and single-process deployments
pub struct InMemoryKvBackend {
    map: DashMap<String, Bytes>,
}

impl InMemoryKvBackend {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Number of raw records held (envelopes and lock records alike)
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for InMemoryKvBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> Result<bool> {
        match self.map.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.map.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

// =============================================================================
// Durable Tier
// =============================================================================

/// Durable tier - persistent shared KV store holding encoded envelopes.
///
/// `stats()` reports operation counters only; entry and byte totals live in
/// the shared backend and are not tracked per process.
pub struct DurableTier {
    backend: Arc<dyn KvBackend>,
    namespace: String,
    max_entry_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    expired_purged: AtomicU64,
    corrupt_purged: AtomicU64,
}

impl DurableTier {
    pub fn new(backend: Arc<dyn KvBackend>, namespace: impl Into<String>) -> Self {
        Self::with_limit(backend, namespace, DEFAULT_DURABLE_MAX_ENTRY_BYTES)
    }

    pub fn with_limit(
        backend: Arc<dyn KvBackend>,
        namespace: impl Into<String>,
        max_entry_bytes: u64,
    ) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            max_entry_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            expired_purged: AtomicU64::new(0),
            corrupt_purged: AtomicU64::new(0),
        }
    }

    /// The raw store this tier wraps. The fill-lock protocol goes through
    /// this handle so lock records share the tier's visibility.
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    fn namespace_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// Count entries and raw bytes currently stored under this namespace.
    /// Lock records are coordination state, not entries, and are skipped.
    pub async fn measure(&self) -> Result<(u64, u64)> {
        let mut count = 0;
        let mut bytes = 0;
        for raw_key in self.backend.scan_prefix(&self.namespace_prefix()).await? {
            if raw_key.ends_with(crate::cache::key::LOCK_SUFFIX) {
                continue;
            }
            if let Some(raw) = self.backend.get(&raw_key).await? {
                count += 1;
                bytes += raw.len() as u64;
            }
        }
        Ok((count, bytes))
    }

    /// Delete a record found to be unusable during a read
    async fn heal(&self, key: &str, reason: &str) {
        if let Err(error) = self.backend.delete(key).await {
            warn!(key, reason, %error, "failed to remove unusable durable entry");
        }
    }
}

#[async_trait]
impl Tier for DurableTier {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Envelope>> {
        let raw = match self.backend.get(key.full()).await? {
            Some(raw) => raw,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match Envelope::decode(&raw) {
            Ok(envelope) if envelope.is_expired() => {
                self.heal(key.full(), "expired").await;
                self.expired_purged.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Ok(envelope) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(envelope))
            }
            Err(error) => {
                warn!(key = %key, %error, "corrupt durable entry, removing");
                self.heal(key.full(), "corrupt").await;
                self.corrupt_purged.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, envelope: Envelope) -> Result<()> {
        let size = envelope.size();
        if size > self.max_entry_bytes {
            return Err(Error::EntryTooLarge {
                key: key.full().to_string(),
                size,
                limit: self.max_entry_bytes,
            });
        }

        self.backend.put(key.full(), envelope.encode()).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.backend.delete(key.full()).await
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<CacheKey>> {
        let keys = self.backend.scan_prefix(prefix).await?;
        Ok(keys.into_iter().map(CacheKey::from_full).collect())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut purged = 0;
        for raw_key in self.backend.scan_prefix(&self.namespace_prefix()).await? {
            let Some(raw) = self.backend.get(&raw_key).await? else {
                continue;
            };
            let counter = match Envelope::decode(&raw) {
                Ok(envelope) if envelope.is_expired() => &self.expired_purged,
                Ok(_) => continue,
                Err(_) => &self.corrupt_purged,
            };
            if self.backend.delete(&raw_key).await? {
                counter.fetch_add(1, Ordering::Relaxed);
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn clear(&self) -> Result<()> {
        for raw_key in self.backend.scan_prefix(&self.namespace_prefix()).await? {
            self.backend.delete(&raw_key).await?;
        }
        Ok(())
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: 0,
            total_bytes: 0,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: 0,
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
            corrupt_purged: self.corrupt_purged.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::now_ms;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn make_tier() -> DurableTier {
        DurableTier::new(Arc::new(InMemoryKvBackend::new()), "viz")
    }

    fn make_key(name: &str) -> CacheKey {
        CacheKey::new("viz", name)
    }

    fn make_envelope(name: &str, data: &[u8], ttl: Duration) -> Envelope {
        Envelope::new(&make_key(name), Bytes::copy_from_slice(data), ttl)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let tier = make_tier();
        let key = make_key("items_42");

        tier.set(&key, make_envelope("items_42", b"payload", Duration::from_secs(60)))
            .await
            .unwrap();

        let env = tier.get(&key).await.unwrap().unwrap();
        assert_eq!(env.value().as_ref(), b"payload");
        assert_eq!(tier.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_miss_on_absent_key() {
        let tier = make_tier();
        assert!(tier.get(&make_key("absent")).await.unwrap().is_none());
        assert_eq!(tier.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_removed_on_read() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let tier = DurableTier::new(backend.clone(), "viz");
        let key = make_key("items_42");

        let expired = Envelope::with_expiry(
            &key,
            Bytes::from_static(b"stale"),
            now_ms() - 2000,
            now_ms() - 1000,
        );
        tier.set(&key, expired).await.unwrap();
        assert_eq!(backend.len(), 1);

        assert!(tier.get(&key).await.unwrap().is_none());
        assert_eq!(backend.len(), 0);
        assert_eq!(tier.stats().expired_purged, 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_removed_on_read() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let tier = DurableTier::new(backend.clone(), "viz");
        let key = make_key("items_42");

        backend
            .put(key.full(), Bytes::from_static(b"not an envelope"))
            .await
            .unwrap();

        assert!(tier.get(&key).await.unwrap().is_none());
        assert_eq!(backend.len(), 0);
        assert_eq!(tier.stats().corrupt_purged, 1);
    }

    #[tokio::test]
    async fn test_rejects_oversized_entry() {
        let tier = DurableTier::with_limit(Arc::new(InMemoryKvBackend::new()), "viz", 16);
        let key = make_key("items_42");

        let result = tier
            .set(&key, make_envelope("items_42", &[0u8; 64], Duration::from_secs(60)))
            .await;

        assert_matches!(result, Err(Error::EntryTooLarge { size: 64, limit: 16, .. }));
    }

    #[tokio::test]
    async fn test_scan_keys_namespace_scoped() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let tier = DurableTier::new(backend.clone(), "viz");

        for name in ["items_42", "items_7"] {
            tier.set(
                &make_key(name),
                make_envelope(name, b"data", Duration::from_secs(60)),
            )
            .await
            .unwrap();
        }
        backend
            .put("other:stray", Bytes::from_static(b"xx"))
            .await
            .unwrap();

        let keys = tier.scan_keys("viz:").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|key| key.namespace() == Some("viz")));
    }

    #[tokio::test]
    async fn test_purge_expired_removes_expired_and_corrupt() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let tier = DurableTier::new(backend.clone(), "viz");

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

        backend
            .put("viz:garbled", Bytes::from_static(b"????"))
            .await
            .unwrap();

        let purged = tier.purge_expired().await.unwrap();
        assert_eq!(purged, 2);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_leaves_other_namespaces() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let tier = DurableTier::new(backend.clone(), "viz");

        tier.set(
            &make_key("items_42"),
            make_envelope("items_42", b"data", Duration::from_secs(60)),
        )
        .await
        .unwrap();
        backend
            .put("other:keep", Bytes::from_static(b"xx"))
            .await
            .unwrap();

        tier.clear().await.unwrap();
        assert_eq!(backend.len(), 1);
        assert!(backend.get("other:keep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_measure_skips_lock_records() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let tier = DurableTier::new(backend.clone(), "viz");

        tier.set(
            &make_key("items_42"),
            make_envelope("items_42", b"eight by", Duration::from_secs(60)),
        )
        .await
        .unwrap();
        backend
            .put("viz:items_42.lock", Bytes::from_static(b"lockdata"))
            .await
            .unwrap();

        let (count, bytes) = tier.measure().await.unwrap();
        assert_eq!(count, 1);
        assert!(bytes > 8);
    }

    #[tokio::test]
    async fn test_put_if_absent_single_winner() {
        let backend = InMemoryKvBackend::new();

        assert!(backend
            .put_if_absent("viz:items.lock", Bytes::from_static(b"a"))
            .await
            .unwrap());
        assert!(!backend
            .put_if_absent("viz:items.lock", Bytes::from_static(b"b"))
            .await
            .unwrap());

        let held = backend.get("viz:items.lock").await.unwrap().unwrap();
        assert_eq!(held.as_ref(), b"a");
    }
}
