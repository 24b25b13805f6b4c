//! Stampede Guard - Cross-Process Fill Locks
//!
//! Serializes expensive cache fills so that one producer runs per key across
//! every process sharing the Durable backend. The lock is a record in that
//! backend, claimed with `put_if_absent`, so no in-process state is involved.
//!
//! # Protocol
//!
//! - The lock record lives under `<key>.lock` and is an ordinary envelope
//!   whose value is a per-acquisition holder token
//! - The record carries its own expiry; a crashed holder's lock becomes
//!   claimable once that expiry passes
//! - Takeover deletes the stale record and re-attempts the claim exactly
//!   once, so concurrent claimants still resolve to a single winner
//! - Release verifies the holder token before deleting, so a holder whose
//!   lock expired and was claimed by someone else cannot release the new
//!   holder's lock

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use super::durable::KvBackend;
use super::entry::Envelope;
use super::key::CacheKey;
use crate::error::Result;

/// Default time a fill lock stays valid before it becomes claimable (30s).
///
/// Must exceed the slowest expected producer; a lock outliving its holder
/// blocks other fillers until this expires.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Proof of an acquired fill lock, consumed on release
#[derive(Debug)]
pub struct FillLock {
    lock_key: CacheKey,
    token: String,
}

impl FillLock {
    /// Full key of the lock record
    pub fn key(&self) -> &CacheKey {
        &self.lock_key
    }

    /// Holder token stored in the lock record
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Acquires and releases fill locks against the shared Durable backend
pub struct StampedeGuard {
    backend: Arc<dyn KvBackend>,
    lock_ttl: Duration,
}

impl StampedeGuard {
    pub fn new(backend: Arc<dyn KvBackend>, lock_ttl: Duration) -> Self {
        Self { backend, lock_ttl }
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Attempt to claim the fill lock for `key`.
    ///
    /// Returns `None` when another holder currently owns a live lock.
    pub async fn try_acquire(&self, key: &CacheKey) -> Result<Option<FillLock>> {
        let lock_key = key.lock_key();
        let token = Uuid::new_v4().to_string();
        let record = Envelope::new(&lock_key, Bytes::from(token.clone()), self.lock_ttl);

        if self
            .backend
            .put_if_absent(lock_key.full(), record.encode())
            .await?
        {
            debug!(key = %key, token = %token, "fill lock acquired");
            return Ok(Some(FillLock { lock_key, token }));
        }

        // Lost the claim. Look at the current record: a live lock means we
        // wait, anything unusable is claimable after removal.
        let claimable = match self.backend.get(lock_key.full()).await? {
            None => true,
            Some(raw) => match Envelope::decode(&raw) {
                Ok(record) if record.is_expired() => {
                    debug!(key = %key, "removing expired fill lock");
                    self.backend.delete(lock_key.full()).await?;
                    true
                }
                Ok(_) => false,
                Err(error) => {
                    warn!(key = %key, %error, "removing corrupt fill lock");
                    self.backend.delete(lock_key.full()).await?;
                    true
                }
            },
        };

        if !claimable {
            return Ok(None);
        }

        // Single re-attempt; concurrent claimants still get one winner
        let record = Envelope::new(&lock_key, Bytes::from(token.clone()), self.lock_ttl);
        if self
            .backend
            .put_if_absent(lock_key.full(), record.encode())
            .await?
        {
            debug!(key = %key, token = %token, "fill lock acquired after takeover");
            Ok(Some(FillLock { lock_key, token }))
        } else {
            Ok(None)
        }
    }

    /// Release a held lock. The record is only deleted while it still carries
    /// this holder's token; a lock that expired and was re-claimed is left to
    /// its new holder.
    pub async fn release(&self, lock: FillLock) -> Result<()> {
        let current = match self.backend.get(lock.lock_key.full()).await? {
            Some(raw) => raw,
            None => return Ok(()),
        };

        let still_ours = match Envelope::decode(&current) {
            Ok(record) => record.value().as_ref() == lock.token.as_bytes(),
            Err(_) => false,
        };

        if still_ours {
            self.backend.delete(lock.lock_key.full()).await?;
            debug!(key = %lock.lock_key, "fill lock released");
        } else {
            warn!(
                key = %lock.lock_key,
                "fill lock no longer held at release, leaving record"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
