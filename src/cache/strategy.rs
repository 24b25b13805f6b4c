//! Placement Strategy
//!
//! Decides the tier-of-record for a value from its size alone. Small values
//! go where reads are cheapest, large values go where capacity is cheapest,
//! and the Durable tier covers the middle ground.

use serde::{Deserialize, Serialize};

use super::tier::TierKind;
use crate::error::{Error, Result};

/// Largest value kept in the Fast tier as tier-of-record (1 KB)
pub const DEFAULT_FAST_MAX_VALUE_BYTES: u64 = 1024;

/// Largest value kept in the Durable tier as tier-of-record (100 KB)
pub const DEFAULT_DURABLE_MAX_VALUE_BYTES: u64 = 100 * 1024;

/// Size thresholds mapping a value to its tier-of-record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementPolicy {
    /// Values up to this many bytes land in the Fast tier
    pub fast_max_bytes: u64,
    /// Values up to this many bytes land in the Durable tier;
    /// anything larger lands in the Bulk tier
    pub durable_max_bytes: u64,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            fast_max_bytes: DEFAULT_FAST_MAX_VALUE_BYTES,
            durable_max_bytes: DEFAULT_DURABLE_MAX_VALUE_BYTES,
        }
    }
}

impl PlacementPolicy {
    pub fn new(fast_max_bytes: u64, durable_max_bytes: u64) -> Self {
        Self {
            fast_max_bytes,
            durable_max_bytes,
        }
    }

    /// Check the thresholds are ordered and non-zero
    pub fn validate(&self) -> Result<()> {
        if self.fast_max_bytes == 0 || self.durable_max_bytes == 0 {
            return Err(Error::Config(
                "placement thresholds must be non-zero".to_string(),
            ));
        }
        if self.fast_max_bytes > self.durable_max_bytes {
            return Err(Error::Config(format!(
                "fast_max_bytes ({}) exceeds durable_max_bytes ({})",
                self.fast_max_bytes, self.durable_max_bytes
            )));
        }
        Ok(())
    }

    /// Tier-of-record for a value of `size` bytes. Thresholds are inclusive.
    pub fn tier_for(&self, size: u64) -> TierKind {
        if size <= self.fast_max_bytes {
            TierKind::Fast
        } else if size <= self.durable_max_bytes {
            TierKind::Durable
        } else {
            TierKind::Bulk
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
