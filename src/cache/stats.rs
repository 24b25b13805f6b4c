//! Cache Statistics
//!
//! Lock-free operation counters recorded by the manager, plus the aggregate
//! snapshot returned to callers. Per-tier storage counters come from the
//! tiers themselves; this module tracks the cascade-level view.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::tier::{TierKind, TierStats};

/// Cascade-level operation counters, updated with relaxed atomics
#[derive(Debug, Default)]
pub struct CacheCounters {
    gets: AtomicU64,
    hits_fast: AtomicU64,
    hits_durable: AtomicU64,
    hits_bulk: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    promotions: AtomicU64,
    remembers: AtomicU64,
    producer_runs: AtomicU64,
    producer_failures: AtomicU64,
    lock_contentions: AtomicU64,
    lock_fallbacks: AtomicU64,
    invalidated_entries: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self, tier: TierKind) {
        let counter = match tier {
            TierKind::Fast => &self.hits_fast,
            TierKind::Durable => &self.hits_durable,
            TierKind::Bulk => &self.hits_bulk,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remember(&self) {
        self.remembers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_producer_run(&self) {
        self.producer_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_producer_failure(&self) {
        self.producer_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_fallback(&self) {
        self.lock_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, count: u64) {
        self.invalidated_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn total_hits(&self) -> u64 {
        self.hits_fast.load(Ordering::Relaxed)
            + self.hits_durable.load(Ordering::Relaxed)
            + self.hits_bulk.load(Ordering::Relaxed)
    }

    /// Build the aggregate snapshot from these counters and the tiers' own
    pub fn snapshot(&self, fast: TierStats, durable: TierStats, bulk: TierStats) -> CacheStats {
        let hits = self.total_hits();
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStats {
            entry_count: fast.entries + durable.entries + bulk.entries,
            total_bytes: fast.total_bytes + durable.total_bytes + bulk.total_bytes,
            gets: self.gets.load(Ordering::Relaxed),
            hits,
            hits_fast: self.hits_fast.load(Ordering::Relaxed),
            hits_durable: self.hits_durable.load(Ordering::Relaxed),
            hits_bulk: self.hits_bulk.load(Ordering::Relaxed),
            misses,
            hit_ratio,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            remembers: self.remembers.load(Ordering::Relaxed),
            producer_runs: self.producer_runs.load(Ordering::Relaxed),
            producer_failures: self.producer_failures.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            lock_fallbacks: self.lock_fallbacks.load(Ordering::Relaxed),
            invalidated_entries: self.invalidated_entries.load(Ordering::Relaxed),
            fast,
            durable,
            bulk,
        }
    }
}

/// Point-in-time view of cache activity
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Entries held across all tiers
    pub entry_count: u64,
    /// Stored bytes across all tiers
    pub total_bytes: u64,
    /// Lookup operations issued
    pub gets: u64,
    /// Lookups answered from any tier
    pub hits: u64,
    /// Lookups answered by the Fast tier
    pub hits_fast: u64,
    /// Lookups answered by the Durable tier
    pub hits_durable: u64,
    /// Lookups answered by the Bulk tier
    pub hits_bulk: u64,
    /// Lookups answered by no tier
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when idle
    pub hit_ratio: f64,
    /// Store operations issued
    pub sets: u64,
    /// Delete operations issued
    pub deletes: u64,
    /// Entries copied into the Fast tier after a slower-tier hit
    pub promotions: u64,
    /// remember / remember_with_lock calls
    pub remembers: u64,
    /// Producer closures actually run
    pub producer_runs: u64,
    /// Producer closures that returned an error
    pub producer_failures: u64,
    /// Fill-lock claims lost to another holder
    pub lock_contentions: u64,
    /// Polls that exhausted and fell back to a direct producer run
    pub lock_fallbacks: u64,
    /// Entries removed by invalidation calls
    pub invalidated_entries: u64,
    /// Fast tier storage counters
    pub fast: TierStats,
    /// Durable tier storage counters
    pub durable: TierStats,
    /// Bulk tier storage counters
    pub bulk: TierStats,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_zero() {
        let counters = CacheCounters::new();
        let stats = counters.snapshot(TierStats::default(), TierStats::default(), TierStats::default());
        assert_eq!(stats.gets, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_ratio, 0.0);
    }

    #[test]
    fn test_hit_ratio() {
        let counters = CacheCounters::new();
        counters.record_hit(TierKind::Fast);
        counters.record_hit(TierKind::Durable);
        counters.record_hit(TierKind::Bulk);
        counters.record_miss();

        let stats = counters.snapshot(TierStats::default(), TierStats::default(), TierStats::default());
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.hits_fast, 1);
        assert_eq!(stats.hits_durable, 1);
        assert_eq!(stats.hits_bulk, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.75);
    }

    #[test]
    fn test_totals_sum_tier_stats() {
        let counters = CacheCounters::new();
        let fast = TierStats {
            entries: 2,
            total_bytes: 100,
            ..Default::default()
        };
        let bulk = TierStats {
            entries: 1,
            total_bytes: 5000,
            ..Default::default()
        };

        let stats = counters.snapshot(fast, TierStats::default(), bulk);
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.total_bytes, 5100);
    }

    #[test]
    fn test_invalidation_accumulates() {
        let counters = CacheCounters::new();
        counters.record_invalidated(3);
        counters.record_invalidated(2);

        let stats = counters.snapshot(TierStats::default(), TierStats::default(), TierStats::default());
        assert_eq!(stats.invalidated_entries, 5);
    }

    #[test]
    fn test_snapshot_serializes() {
        let counters = CacheCounters::new();
        counters.record_get();
        counters.record_hit(TierKind::Fast);

        let stats = counters.snapshot(TierStats::default(), TierStats::default(), TierStats::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["gets"], 1);
        assert_eq!(json["hits_fast"], 1);
        assert!(json["fast"].is_object());
    }
}
