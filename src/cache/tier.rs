//! Tier Interface
//!
//! One async interface over all three storage backends so the manager's
//! cascade, invalidation, sweeping, and stats logic never cares which
//! backend it is talking to, and each tier is independently testable.

use async_trait::async_trait;
use serde::Serialize;

use super::entry::Envelope;
use super::key::CacheKey;
use crate::error::Result;

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TierKind {
    /// In-process, volatile, capacity-bounded
    Fast,
    /// Shared store, survives process restarts, size-limited per entry
    Durable,
    /// File-backed, for large payloads, slowest
    Bulk,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Fast => write!(f, "Fast (in-process)"),
            TierKind::Durable => write!(f, "Durable (shared)"),
            TierKind::Bulk => write!(f, "Bulk (files)"),
        }
    }
}

/// Per-tier statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    /// Number of live entries
    pub entries: u64,
    /// Total payload bytes
    pub total_bytes: u64,
    /// Read hits
    pub hits: u64,
    /// Read misses
    pub misses: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
    /// Entries evicted under capacity pressure
    pub evictions: u64,
    /// Entries removed because they had expired
    pub expired_purged: u64,
    /// Entries removed because they failed envelope validation
    pub corrupt_purged: u64,
}

/// A storage tier in the cache hierarchy.
///
/// Expired and corrupt entries are removed on read and reported as misses;
/// callers never see them. All operations are safe under concurrent use.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Which tier this is
    fn kind(&self) -> TierKind;

    /// Fetch the envelope stored under `key`
    async fn get(&self, key: &CacheKey) -> Result<Option<Envelope>>;

    /// Store an envelope under `key`, replacing any previous entry
    async fn set(&self, key: &CacheKey, envelope: Envelope) -> Result<()>;

    /// Remove the entry under `key`; absence is not an error
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// List every stored key whose full form starts with `prefix`
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<CacheKey>>;

    /// Remove expired and unreadable entries, returning how many were dropped
    async fn purge_expired(&self) -> Result<u64>;

    /// Remove every entry this tier manages
    async fn clear(&self) -> Result<()>;

    /// Tier statistics snapshot
    fn stats(&self) -> TierStats;
}

// =============================================================================
// Tests
// =============================================================================
