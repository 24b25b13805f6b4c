//! Tiered Cache Subsystem
//!
//! Read-through caching over three tiers with different cost, capacity, and
//! durability profiles, addressed through one manager.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                           Cache Manager                               │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  Fast (in-process)    │ Durable (shared KV)   │ Bulk (file-backed)    │
//! │  ┌─────────────────┐  │ ┌──────────────────┐  │ ┌─────────────────┐   │
//! │  │ ShardedMap      │  │ │ KvBackend        │  │ │ <root>/<2-hex>/ │   │
//! │  │ (64-way)        │  │ │ (pluggable)      │  │ │   <hash>.bin    │   │
//! │  │ volatile, LRU   │  │ │ ≤ 1MB per entry  │  │ │ unbounded       │   │
//! │  └─────────────────┘  │ └──────────────────┘  │ └─────────────────┘   │
//! │           │           │          │            │          │            │
//! │           └───────────┴──────────┴────────────┴──────────┘            │
//! │                               │                                       │
//! │              Placement Policy + Stampede Guard + Sweeper              │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Read path
//!
//! `get` cascades Fast → Durable → Bulk and stops at the first live entry;
//! hits below the Fast tier are promoted back into it under a capped TTL.
//! Expired or undecodable entries are deleted where they are found and
//! reported as misses.
//!
//! # Write path
//!
//! `set` routes the value to its tier-of-record by size, always writes a
//! Fast-tier copy, and removes stale copies of the key from the other
//! tiers. Bulk-tier entries leave a pointer stub in the Durable tier so
//! remote processes without the file find their way to the payload.
//!
//! # Design Principles
//!
//! - Reads never fail: a broken tier degrades to a miss, not an error
//! - Entries are self-describing on every tier (same binary envelope)
//! - `remember_with_lock` de-duplicates producer runs across processes,
//!   but prefers running the producer twice over returning nothing

mod bulk;
mod durable;
mod entry;
mod fast;
mod guard;
mod key;
mod manager;
mod shard;
mod stats;
mod strategy;
mod sweeper;
mod tier;

#[cfg(test)]
mod proptests;

pub use bulk::BulkTier;
pub use durable::{DurableTier, InMemoryKvBackend, KvBackend, DEFAULT_DURABLE_MAX_ENTRY_BYTES};
pub use entry::{Envelope, ENVELOPE_OVERHEAD};
pub use fast::{FastConfig, FastTier, DEFAULT_FAST_CAPACITY};
pub use guard::{FillLock, StampedeGuard, DEFAULT_LOCK_TTL};
pub use key::{CacheKey, LOCK_SUFFIX};
pub use manager::{
    CacheConfig, CacheManager, DEFAULT_LOCK_POLL_ATTEMPTS, DEFAULT_LOCK_POLL_INTERVAL,
    DEFAULT_NAMESPACE, DEFAULT_PROMOTION_TTL,
};
pub use shard::ShardedMap;
pub use stats::{CacheCounters, CacheStats};
pub use strategy::{
    PlacementPolicy, DEFAULT_DURABLE_MAX_VALUE_BYTES, DEFAULT_FAST_MAX_VALUE_BYTES,
};
pub use sweeper::{SweepReport, Sweeper, SweeperConfig, DEFAULT_SWEEP_INTERVAL};
pub use tier::{Tier, TierKind, TierStats};

/// Number of Fast-tier shards (must be a power of two; shard selection masks
/// the key hash)
pub const FAST_SHARD_COUNT: usize = 64;

// =============================================================================
// Tests
// =============================================================================
