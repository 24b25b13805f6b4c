//! Bulk Tier - File-Backed Large Payload Store
//!
//! Tier-of-record for payloads too large for the shared KV store. Each entry
//! is one encoded envelope in one file; the Durable tier holds a pointer stub
//! so the cascade knows to look here.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   a3/
//!     a3f1c2d4e5f60718.bin     # first two hex digits of the key hash
//!   07/
//!     07deadbeef013579.bin
//! ```
//!
//! # Design
//!
//! - Writes go to a uniquely named temp file in the target directory and are
//!   renamed into place, so readers never observe a half-written envelope
//! - Temp files orphaned by an interrupted write are removed at open and on
//!   every purge pass, once old enough that no live writer can own them
//! - The envelope carries the full cache key, letting prefix scans recover
//!   keys from hashed file names and reads reject a hash-colliding neighbor
//! - Entry/byte gauges are seeded by a directory walk at open and kept
//!   current per process afterwards

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::entry::Envelope;
use super::key::CacheKey;
use super::tier::{Tier, TierKind, TierStats};
use crate::error::Result;

/// Temp files older than this are treated as abandoned by a dead writer;
/// younger ones may still be racing toward their rename
const TEMP_FILE_MAX_AGE: Duration = Duration::from_secs(60);

/// Bulk tier - large payloads as individual files under a root directory
pub struct BulkTier {
    root: PathBuf,
    entries: AtomicU64,
    total_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    expired_purged: AtomicU64,
    corrupt_purged: AtomicU64,
}

impl BulkTier {
    /// Open (creating if needed) a bulk store rooted at `root`.
    ///
    /// Walks any existing files once to seed the entry and byte gauges.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let tier = Self {
            root,
            entries: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            expired_purged: AtomicU64::new(0),
            corrupt_purged: AtomicU64::new(0),
        };

        tier.remove_stale_temps().await?;
        let (count, bytes) = tier.measure().await?;
        tier.entries.store(count, Ordering::Relaxed);
        tier.total_bytes.store(bytes, Ordering::Relaxed);
        debug!(root = %tier.root.display(), count, bytes, "bulk tier opened");

        Ok(tier)
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, key: &CacheKey) -> PathBuf {
        let hex = format!("{:016x}", key.hash_value());
        self.root.join(&hex[..2]).join(format!("{}.bin", hex))
    }

    /// List every entry file currently under the root
    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut top = fs::read_dir(&self.root).await?;
        while let Some(dir) = top.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let mut inner = fs::read_dir(dir.path()).await?;
            while let Some(file) = inner.next_entry().await? {
                let path = file.path();
                if path.extension().map(|ext| ext == "bin").unwrap_or(false) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    async fn measure(&self) -> Result<(u64, u64)> {
        let mut count = 0;
        let mut bytes = 0;
        for path in self.entry_files().await? {
            count += 1;
            bytes += fs::metadata(&path).await?.len();
        }
        Ok((count, bytes))
    }

    /// Remove one entry file, updating gauges. Missing files are fine.
    async fn remove_file(&self, path: &Path) -> Result<bool> {
        let size = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(error.into()),
        };
        match fs::remove_file(path).await {
            Ok(()) => {
                self.entries.fetch_sub(1, Ordering::Relaxed);
                self.total_bytes.fetch_sub(size, Ordering::Relaxed);
                Ok(true)
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Remove temp files whose writer died between write and rename.
    ///
    /// Temps never count toward the gauges, so none are adjusted here. Files
    /// younger than [`TEMP_FILE_MAX_AGE`] are left alone.
    async fn remove_stale_temps(&self) -> Result<u64> {
        let mut removed = 0;
        let mut top = fs::read_dir(&self.root).await?;
        while let Some(dir) = top.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let mut inner = fs::read_dir(dir.path()).await?;
            while let Some(file) = inner.next_entry().await? {
                let path = file.path();
                let is_temp = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(".tmp-"))
                    .unwrap_or(false);
                if !is_temp {
                    continue;
                }
                let meta = match fs::metadata(&path).await {
                    Ok(meta) => meta,
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(error) => return Err(error.into()),
                };
                // A clock-skewed future mtime reads as age zero and is kept
                let age = meta.modified()?.elapsed().unwrap_or_default();
                if age < TEMP_FILE_MAX_AGE {
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "removed abandoned temp file");
                        removed += 1;
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                    Err(error) => return Err(error.into()),
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl Tier for BulkTier {
    fn kind(&self) -> TierKind {
        TierKind::Bulk
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Envelope>> {
        let path = self.file_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        match Envelope::decode(&raw) {
            Ok(envelope) if envelope.is_expired() => {
                self.remove_file(&path).await?;
                self.expired_purged.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            // File names are 64-bit hashes; the resident entry may belong
            // to a colliding key and is not ours to serve or remove
            Ok(envelope) if envelope.key() != key.full() => {
                warn!(key = %key, resident = envelope.key(), "bulk file name collision");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Ok(envelope) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(envelope))
            }
            Err(error) => {
                warn!(key = %key, path = %path.display(), %error, "corrupt bulk entry, removing");
                self.remove_file(&path).await?;
                self.corrupt_purged.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, envelope: Envelope) -> Result<()> {
        let path = self.file_path(key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).await?;

        let encoded = envelope.encode();
        let new_size = encoded.len() as u64;
        let old_size = match fs::metadata(&path).await {
            Ok(meta) => Some(meta.len()),
            Err(_) => None,
        };

        // Write-then-rename keeps concurrent readers off partial files
        let temp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&temp, &encoded).await?;
        if let Err(error) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(error.into());
        }

        match old_size {
            Some(old) => {
                if new_size > old {
                    self.total_bytes.fetch_add(new_size - old, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old - new_size, Ordering::Relaxed);
                }
            }
            None => {
                self.entries.fetch_add(1, Ordering::Relaxed);
                self.total_bytes.fetch_add(new_size, Ordering::Relaxed);
            }
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.remove_file(&self.file_path(key)).await
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();
        for path in self.entry_files().await? {
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            // Unreadable files are left for purge_expired to collect
            if let Ok(envelope) = Envelope::decode(&raw) {
                if envelope.key().starts_with(prefix) {
                    keys.push(CacheKey::from_full(envelope.key()));
                }
            }
        }
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut purged = 0;
        for path in self.entry_files().await? {
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            match Envelope::decode(&raw) {
                Ok(envelope) if envelope.is_expired() => {
                    if self.remove_file(&path).await? {
                        self.expired_purged.fetch_add(1, Ordering::Relaxed);
                        purged += 1;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "corrupt bulk entry, removing");
                    if self.remove_file(&path).await? {
                        self.corrupt_purged.fetch_add(1, Ordering::Relaxed);
                        purged += 1;
                    }
                }
            }
        }
        // Interrupted writes leave temps the entry walk cannot see
        self.remove_stale_temps().await?;
        Ok(purged)
    }

    async fn clear(&self) -> Result<()> {
        let mut top = fs::read_dir(&self.root).await?;
        while let Some(dir) = top.next_entry().await? {
            if dir.file_type().await?.is_dir() {
                fs::remove_dir_all(dir.path()).await?;
            } else {
                fs::remove_file(dir.path()).await?;
            }
        }
        self.entries.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: self.entries.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
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
