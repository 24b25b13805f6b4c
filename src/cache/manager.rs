//! Cache Manager - Unified Tiered Cache
//!
//! Orchestrates the Fast, Durable, and Bulk tiers: cascading reads with
//! write-back promotion, size-routed writes, stampede-guarded fills, and
//! partition-scoped invalidation.
//!
//! # Design
//!
//! - One manager instance per process, constructed at startup and shared by
//!   `Arc` handle; no process-global state
//! - Read-path failures degrade to a miss with a warning; write-path and
//!   producer failures propagate
//! - Cross-tier consistency is last-write-wins per key, not linearizable

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::try_join;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::bulk::BulkTier;
use super::durable::{DurableTier, InMemoryKvBackend, KvBackend, DEFAULT_DURABLE_MAX_ENTRY_BYTES};
use super::entry::Envelope;
use super::fast::{FastConfig, FastTier};
use super::guard::{StampedeGuard, DEFAULT_LOCK_TTL};
use super::key::CacheKey;
use super::stats::{CacheCounters, CacheStats};
use super::strategy::PlacementPolicy;
use super::tier::{Tier, TierKind};
use crate::error::{Error, Result};

/// Default key namespace prefix
pub const DEFAULT_NAMESPACE: &str = "cache";

/// Default cap on the Fast-tier TTL given to read-path promotions (60s)
pub const DEFAULT_PROMOTION_TTL: Duration = Duration::from_secs(60);

/// Default interval between lock-contention polls (1s)
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of lock-contention polls before direct compute
pub const DEFAULT_LOCK_POLL_ATTEMPTS: u32 = 10;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace prepended to every key (`<namespace>:<name>`)
    pub namespace: String,
    /// Size thresholds routing values to their tier-of-record
    pub placement: PlacementPolicy,
    /// Fast tier capacity and eviction settings
    pub fast: FastConfig,
    /// Per-entry size limit enforced by the Durable tier
    pub durable_max_entry_bytes: u64,
    /// Cap on the Fast-tier TTL of entries promoted on read
    pub promotion_ttl: Duration,
    /// Fill-lock lifetime; bounds producer runtime
    pub lock_ttl: Duration,
    /// Interval between polls while another holder fills a key
    pub lock_poll_interval: Duration,
    /// Polls before giving up and computing directly
    pub lock_poll_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl CacheConfig {
    /// Balanced settings for typical deployments (default)
    pub fn balanced() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            placement: PlacementPolicy::default(),
            fast: FastConfig::default(),
            durable_max_entry_bytes: DEFAULT_DURABLE_MAX_ENTRY_BYTES,
            promotion_ttl: DEFAULT_PROMOTION_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            lock_poll_attempts: DEFAULT_LOCK_POLL_ATTEMPTS,
        }
    }

    /// Small in-process footprint for memory-constrained hosts
    pub fn constrained() -> Self {
        Self {
            fast: FastConfig {
                capacity: 8 * 1024 * 1024,
                ..FastConfig::default()
            },
            promotion_ttl: Duration::from_secs(30),
            ..Self::balanced()
        }
    }

    /// Larger Fast tier and longer promotions for read-dominated workloads
    pub fn read_heavy() -> Self {
        Self {
            fast: FastConfig {
                capacity: 256 * 1024 * 1024,
                ..FastConfig::default()
            },
            promotion_ttl: Duration::from_secs(120),
            ..Self::balanced()
        }
    }

    /// Same settings under a different namespace
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::balanced()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }
        if self.namespace.contains(':') {
            return Err(Error::Config(format!(
                "namespace {:?} must not contain ':'",
                self.namespace
            )));
        }
        if self.lock_poll_attempts == 0 {
            return Err(Error::Config(
                "lock_poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.lock_poll_interval.is_zero() || self.lock_ttl.is_zero() {
            return Err(Error::Config(
                "lock intervals must be non-zero".to_string(),
            ));
        }
        self.placement.validate()?;
        // A Fast-record value has no copy in any other tier, so the Fast
        // tier must always be able to admit one
        if self.fast.capacity < self.placement.fast_max_bytes {
            return Err(Error::Config(format!(
                "fast capacity ({}) is below fast_max_bytes ({})",
                self.fast.capacity, self.placement.fast_max_bytes
            )));
        }
        Ok(())
    }
}

/// Unified tiered cache
pub struct CacheManager {
    fast: FastTier,
    durable: DurableTier,
    bulk: BulkTier,
    guard: StampedeGuard,
    config: CacheConfig,
    counters: CacheCounters,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Create a manager over a shared KV backend and a Bulk-tier root
    pub async fn new(
        config: CacheConfig,
        backend: Arc<dyn KvBackend>,
        bulk_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;

        let durable = DurableTier::with_limit(
            backend.clone(),
            config.namespace.clone(),
            config.durable_max_entry_bytes,
        );
        let guard = StampedeGuard::new(backend, config.lock_ttl);

        Ok(Self {
            fast: FastTier::with_config(config.fast.clone()),
            durable,
            bulk: BulkTier::open(bulk_root).await?,
            guard,
            config,
            counters: CacheCounters::new(),
        })
    }

    /// Create with an in-memory KV backend (tests, single-process deployments)
    pub async fn in_memory(bulk_root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            CacheConfig::default(),
            Arc::new(InMemoryKvBackend::new()),
            bulk_root,
        )
        .await
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn fast(&self) -> &FastTier {
        &self.fast
    }

    pub fn durable(&self) -> &DurableTier {
        &self.durable
    }

    pub fn bulk(&self) -> &BulkTier {
        &self.bulk
    }

    fn cache_key(&self, name: &str) -> CacheKey {
        CacheKey::new(&self.config.namespace, name)
    }

    fn namespace_prefix(&self) -> String {
        format!("{}:", self.config.namespace)
    }

    /// Read one tier, degrading any failure to a miss
    async fn read_tier(&self, tier: &dyn Tier, key: &CacheKey) -> Option<Envelope> {
        match tier.get(key).await {
            Ok(found) => found,
            Err(error) => {
                warn!(key = %key, tier = %tier.kind(), %error, "tier read failed, treating as miss");
                None
            }
        }
    }

    /// Copy a slower-tier hit into the Fast tier under a capped TTL
    async fn promote(&self, key: &CacheKey, envelope: &Envelope) {
        let Some(remaining) = envelope.remaining_ttl() else {
            return;
        };
        let ttl = remaining.min(self.config.promotion_ttl);
        let copy = Envelope::new(key, envelope.value().clone(), ttl);
        match self.fast.set(key, copy).await {
            Ok(()) => self.counters.record_promotion(),
            Err(error) => warn!(key = %key, %error, "promotion to fast tier failed"),
        }
    }

    /// Look up a key across the tiers, fastest first.
    ///
    /// `Ok(None)` means "not cached" and is distinct from a cached empty
    /// value, which comes back as `Ok(Some(empty))`.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.counters.record_get();
        let key = self.cache_key(key);

        if let Some(envelope) = self.read_tier(&self.fast, &key).await {
            self.counters.record_hit(TierKind::Fast);
            debug!(key = %key, "fast tier hit");
            return Ok(Some(envelope.into_value()));
        }

        if let Some(envelope) = self.read_tier(&self.durable, &key).await {
            if !envelope.is_pointer() {
                self.counters.record_hit(TierKind::Durable);
                debug!(key = %key, "durable tier hit");
                self.promote(&key, &envelope).await;
                return Ok(Some(envelope.into_value()));
            }
            // Pointer envelope: the payload lives in the Bulk tier
        }

        if let Some(envelope) = self.read_tier(&self.bulk, &key).await {
            self.counters.record_hit(TierKind::Bulk);
            debug!(key = %key, "bulk tier hit");
            self.promote(&key, &envelope).await;
            return Ok(Some(envelope.into_value()));
        }

        self.counters.record_miss();
        Ok(None)
    }

    /// Store a value under `key` for `ttl`.
    ///
    /// The placement policy picks the tier-of-record from the value size; a
    /// Fast-tier copy is always written, and stale copies of the key are
    /// removed from the remaining tiers. Returns the tier-of-record.
    #[instrument(skip(self, value), fields(size = value.len()))]
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<TierKind> {
        self.counters.record_set();
        let key = self.cache_key(key);
        let record = self.config.placement.tier_for(value.len() as u64);
        let envelope = Envelope::new(&key, value, ttl);

        self.fast.set(&key, envelope.clone()).await?;

        match record {
            TierKind::Fast => {
                try_join!(self.durable.delete(&key), self.bulk.delete(&key))?;
            }
            TierKind::Durable => {
                self.durable.set(&key, envelope).await?;
                self.bulk.delete(&key).await?;
            }
            TierKind::Bulk => {
                // Payload lands before the stub that advertises it
                let pointer = Envelope::pointer(&key, ttl);
                self.bulk.set(&key, envelope).await?;
                self.durable.set(&key, pointer).await?;
            }
        }

        debug!(key = %key, tier = %record, "cached");
        Ok(record)
    }

    /// Remove `key` from every tier. Absent keys are not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.counters.record_delete();
        let key = self.cache_key(key);

        let (fast, durable, bulk) = try_join!(
            self.fast.delete(&key),
            self.durable.delete(&key),
            self.bulk.delete(&key),
        )?;

        Ok(fast || durable || bulk)
    }

    /// Run the producer and cache its result; empty results are returned but
    /// never cached, and caching failures never mask a produced value.
    async fn produce_and_store<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        self.counters.record_producer_run();
        let value = match producer().await {
            Ok(value) => value,
            Err(error) => {
                self.counters.record_producer_failure();
                return Err(error);
            }
        };
        self.store_produced(key, ttl, &value).await;
        Ok(value)
    }

    async fn store_produced(&self, key: &str, ttl: Duration, value: &Bytes) {
        if value.is_empty() {
            debug!(key, "empty producer result not cached");
            return;
        }
        if let Err(error) = self.set(key, value.clone(), ttl).await {
            warn!(key, %error, "failed to cache produced value");
        }
    }

    /// Read-through: return the cached value or compute and cache it.
    ///
    /// No stampede protection; concurrent callers may each run the producer.
    #[instrument(skip(self, producer))]
    pub async fn remember<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        self.counters.record_remember();
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        self.produce_and_store(key, ttl, producer).await
    }

    /// Read-through with cross-process stampede protection.
    ///
    /// See [`remember_with_lock_cancellable`](Self::remember_with_lock_cancellable);
    /// this variant never cancels the contention wait.
    pub async fn remember_with_lock<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let cancel = CancellationToken::new();
        self.remember_with_lock_cancellable(key, ttl, &cancel, producer)
            .await
    }

    /// Read-through with cross-process stampede protection.
    ///
    /// On a miss, one caller across all processes claims the fill lock and
    /// runs the producer; the rest poll for the value to appear. A poller
    /// whose wait exhausts computes directly (liveness over de-duplication),
    /// and a cancelled wait returns [`Error::Cancelled`]. The lock is
    /// released on every exit path; a crashed holder's lock expires after
    /// `lock_ttl`.
    #[instrument(skip(self, cancel, producer))]
    pub async fn remember_with_lock_cancellable<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        producer: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        self.counters.record_remember();
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let cache_key = self.cache_key(key);
        match self.guard.try_acquire(&cache_key).await {
            Ok(Some(lock)) => {
                self.counters.record_producer_run();
                let outcome = match producer().await {
                    Ok(value) => {
                        self.store_produced(key, ttl, &value).await;
                        Ok(value)
                    }
                    Err(error) => {
                        self.counters.record_producer_failure();
                        Err(error)
                    }
                };
                if let Err(error) = self.guard.release(lock).await {
                    // TTL reclaims the record if this delete never lands
                    warn!(key = %cache_key, %error, "failed to release fill lock");
                }
                outcome
            }
            Ok(None) => {
                self.counters.record_lock_contention();
                self.wait_for_fill(key, &cache_key, ttl, cancel, producer)
                    .await
            }
            Err(error) => {
                warn!(key = %cache_key, %error, "fill lock unavailable, computing directly");
                self.counters.record_lock_fallback();
                self.produce_and_store(key, ttl, producer).await
            }
        }
    }

    /// Poll for another holder's fill to land, falling back to a direct
    /// compute once the attempts are exhausted
    async fn wait_for_fill<F, Fut>(
        &self,
        key: &str,
        cache_key: &CacheKey,
        ttl: Duration,
        cancel: &CancellationToken,
        producer: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        for attempt in 1..=self.config.lock_poll_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %cache_key, attempt, "fill wait cancelled");
                    return Err(Error::Cancelled {
                        key: cache_key.full().to_string(),
                    });
                }
                _ = tokio::time::sleep(self.config.lock_poll_interval) => {}
            }
            if let Some(value) = self.get(key).await? {
                debug!(key = %cache_key, attempt, "value appeared while waiting");
                return Ok(value);
            }
        }

        warn!(key = %cache_key, "fill wait exhausted, computing directly");
        self.counters.record_lock_fallback();
        self.produce_and_store(key, ttl, producer).await
    }

    /// Remove every entry whose key carries `partition_id` as a delimited
    /// token, across all tiers. Returns how many entries were removed.
    #[instrument(skip(self))]
    pub async fn invalidate_partition(&self, partition_id: &str) -> Result<u64> {
        let prefix = self.namespace_prefix();
        let scanned = try_join!(
            self.fast.scan_keys(&prefix),
            self.durable.scan_keys(&prefix),
            self.bulk.scan_keys(&prefix),
        )?;

        let mut matched: HashSet<CacheKey> = HashSet::new();
        for keys in [scanned.0, scanned.1, scanned.2] {
            matched.extend(
                keys.into_iter()
                    .filter(|key| key.matches_partition(partition_id)),
            );
        }

        let mut removed = 0;
        for key in &matched {
            let (fast, durable, bulk) = try_join!(
                self.fast.delete(key),
                self.durable.delete(key),
                self.bulk.delete(key),
            )?;
            if fast || durable || bulk {
                removed += 1;
            }
        }

        self.counters.record_invalidated(removed);
        info!(partition = partition_id, removed, "partition invalidated");
        Ok(removed)
    }

    /// Drop every managed entry from every tier
    #[instrument(skip(self))]
    pub async fn invalidate_all(&self) -> Result<()> {
        self.fast.clear().await?;
        self.durable.clear().await?;
        self.bulk.clear().await?;
        info!(namespace = %self.config.namespace, "all entries invalidated");
        Ok(())
    }

    /// Aggregate operation counters and per-tier storage stats.
    ///
    /// Durable entry/byte totals come from a backend scan; if that scan
    /// fails, the snapshot carries zeros for them and a warning is logged.
    pub async fn stats(&self) -> CacheStats {
        let mut durable = self.durable.stats();
        match self.durable.measure().await {
            Ok((entries, bytes)) => {
                durable.entries = entries;
                durable.total_bytes = bytes;
            }
            Err(error) => {
                warn!(%error, "durable tier measurement failed");
            }
        }
        self.counters
            .snapshot(self.fast.stats(), durable, self.bulk.stats())
    }

    // =========================================================================
    // Typed JSON convenience API
    // =========================================================================

    /// Serialize `value` as JSON and cache it.
    /// Serialization failures propagate; they indicate a caller bug.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<TierKind> {
        let raw = serde_json::to_vec(value)?;
        self.set(key, Bytes::from(raw), ttl).await
    }

    /// Fetch and deserialize a JSON-cached value.
    /// A present-but-undeserializable payload is an error, not a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Typed read-through over [`remember`](Self::remember)
    pub async fn remember_json<T, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get_json(key).await? {
            return Ok(value);
        }
        self.counters.record_producer_run();
        let value = match producer().await {
            Ok(value) => value,
            Err(error) => {
                self.counters.record_producer_failure();
                return Err(error);
            }
        };
        if let Err(error) = self.set_json(key, &value, ttl).await {
            warn!(key, %error, "failed to cache produced value");
        }
        Ok(value)
    }
}

// =============================================================================
// Tests
// =============================================================================
