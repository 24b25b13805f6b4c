//! Background Expiry Sweeper
//!
//! Read-time healing only removes expired entries somebody asks for; keys
//! that are never read again would otherwise sit in the Durable and Bulk
//! tiers forever. The sweeper walks all three tiers on a fixed interval and
//! purges anything past its deadline, plus any record that no longer
//! decodes. In the Bulk tier a sweep also reclaims temp files abandoned by
//! interrupted writes.
//!
//! Run it as a task per process (tiers tolerate concurrent sweeps; a purge
//! that loses a race just purges nothing):
//!
//! ```ignore
//! let sweeper = Sweeper::new(manager.clone(), SweeperConfig::default());
//! tokio::spawn(async move { sweeper.run(shutdown.clone()).await });
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::manager::CacheManager;
use super::tier::Tier;
use crate::error::Result;

/// Default pause between sweep cycles (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Pause between sweep cycles
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Entries removed by one sweep cycle, per tier
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub fast: u64,
    pub durable: u64,
    pub bulk: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.fast + self.durable + self.bulk
    }
}

/// Periodic expired-entry collector over a [`CacheManager`]
pub struct Sweeper {
    manager: Arc<CacheManager>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(manager: Arc<CacheManager>, config: SweeperConfig) -> Self {
        Self { manager, config }
    }

    /// Sweep on the configured interval until `cancel` fires.
    ///
    /// The first sweep happens one full interval after start, not
    /// immediately; startup is when expired entries matter least.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval = ?self.config.interval, "sweeper started");
        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweeper stopped");
                    return;
                }
                _ = tick.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.total() > 0 => {
                            info!(
                                fast = report.fast,
                                durable = report.durable,
                                bulk = report.bulk,
                                "sweep purged expired entries"
                            );
                        }
                        Ok(_) => debug!("sweep found nothing to purge"),
                        Err(error) => warn!(%error, "sweep cycle failed"),
                    }
                }
            }
        }
    }

    /// Purge expired entries from every tier once
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let fast = self.manager.fast().purge_expired().await?;
        let durable = self.manager.durable().purge_expired().await?;
        let bulk = self.manager.bulk().purge_expired().await?;
        Ok(SweepReport {
            fast,
            durable,
            bulk,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn payload(len: usize) -> Bytes {
        Bytes::from(vec![3u8; len])
    }

    #[tokio::test]
    async fn test_sweep_once_purges_all_tiers() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(CacheManager::in_memory(dir.path()).await.unwrap());

        // One short-lived entry per tier-of-record
        manager
            .set("small", payload(100), Duration::from_millis(20))
            .await
            .unwrap();
        manager
            .set("medium", payload(50 * 1024), Duration::from_millis(20))
            .await
            .unwrap();
        manager
            .set("large", payload(200 * 1024), Duration::from_millis(20))
            .await
            .unwrap();
        manager
            .set("keeper", payload(100), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let sweeper = Sweeper::new(manager.clone(), SweeperConfig::default());
        let report = sweeper.sweep_once().await.unwrap();

        // Fast holds a copy of all three expired entries; the pointer stub
        // for "large" counts toward the durable purge alongside "medium"
        assert_eq!(report.fast, 3);
        assert_eq!(report.durable, 2);
        assert_eq!(report.bulk, 1);
        assert_eq!(report.total(), 6);

        assert!(manager.get("keeper").await.unwrap().is_some());
        assert_eq!(manager.bulk().stats().entries, 0);
    }

    #[tokio::test]
    async fn test_sweep_once_empty_cache() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(CacheManager::in_memory(dir.path()).await.unwrap());

        let sweeper = Sweeper::new(manager, SweeperConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(CacheManager::in_memory(dir.path()).await.unwrap());

        let sweeper = Sweeper::new(
            manager,
            SweeperConfig {
                interval: Duration::from_millis(10),
            },
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(35)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_purges_on_interval() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(CacheManager::in_memory(dir.path()).await.unwrap());

        manager
            .set("short", payload(100), Duration::from_millis(10))
            .await
            .unwrap();

        let sweeper = Sweeper::new(
            manager.clone(),
            SweeperConfig {
                interval: Duration::from_millis(25),
            },
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(manager.fast().len(), 0);
    }
}
