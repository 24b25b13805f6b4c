//! StrataCache - Tiered Cache for Derived Data
//!
//! Caching for values that are expensive to recompute but cheap to lose:
//! query results, rendered fragments, geocoding responses, exported files.
//! Three tiers with different cost and durability profiles sit behind one
//! manager, and callers never pick a tier themselves.
//!
//! # Architecture
//!
//! ```text
//! get ──▶ Fast (in-process) ──▶ Durable (shared KV) ──▶ Bulk (files)
//!              ▲                        │                    │
//!              └────────── promotion ◀──┴────────────────────┘
//! ```
//!
//! Writes route by value size: small values live in the Fast tier, medium
//! ones in the Durable tier, large ones as files in the Bulk tier with a
//! pointer stub in the Durable tier. Reads cascade fastest-first and promote
//! hits back into the Fast tier.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bytes::Bytes;
//! use stratacache::CacheManager;
//!
//! # async fn run() -> stratacache::Result<()> {
//! let cache = CacheManager::in_memory("/var/cache/app").await?;
//!
//! let report = cache
//!     .remember("report_42", Duration::from_secs(300), || async {
//!         Ok(Bytes::from(build_report().await))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! # async fn build_report() -> Vec<u8> { vec![] }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, manager, stampede guard, and sweeper
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    BulkTier, CacheConfig, CacheManager, CacheStats, DurableTier, FastTier, InMemoryKvBackend,
    KvBackend, SweepReport, Sweeper, SweeperConfig, TierKind,
};
pub use error::{Error, Result};

/// Returns the crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
