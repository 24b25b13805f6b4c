//! Stored Entry Envelope
//!
//! Every value persisted to a tier is wrapped in a versioned binary envelope
//! so corruption is detected deterministically instead of relying on a
//! deserializer throwing.
//!
//! # Layout (big-endian)
//!
//! ```text
//! magic       u32   0x53544341 ("STCA")
//! version     u8    format version, currently 1
//! flags       u8    bit 0 = pointer (payload lives in the Bulk tier)
//! created_at  i64   epoch milliseconds
//! expires_at  i64   epoch milliseconds
//! key_len     u16   length of the full key string
//! key         [u8]  full key, UTF-8
//! value_hash  u64   FxHash of the value bytes
//! value_len   u32   length of the value
//! value       [u8]  payload
//! ```
//!
//! Decoding verifies magic, version, declared lengths, and the value hash;
//! any mismatch is a corrupt entry. The key travels inside the envelope so
//! Bulk-tier files (whose names are one-way hashes) can be matched back to
//! their keys during partition scans.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;

use super::key::{fx_hash, CacheKey};
use crate::error::{Error, Result};

/// Envelope magic number ("STCA")
pub const ENVELOPE_MAGIC: u32 = 0x5354_4341;

/// Current envelope format version
pub const ENVELOPE_VERSION: u8 = 1;

/// Flag: the payload lives in the Bulk tier, this envelope is a stub
const FLAG_POINTER: u8 = 0b0000_0001;

/// Fixed envelope overhead: all fields except the key and value bytes
pub const ENVELOPE_OVERHEAD: usize = 4 + 1 + 1 + 8 + 8 + 2 + 8 + 4;

/// Current time in epoch milliseconds
#[inline]
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A stored cache entry: value plus the metadata that travels with it
#[derive(Clone)]
pub struct Envelope {
    /// Full key string (namespace included)
    key: String,
    /// Payload bytes (empty for pointer envelopes)
    value: Bytes,
    /// Flag bits
    flags: u8,
    /// Creation time, epoch milliseconds
    created_at: i64,
    /// Expiry time, epoch milliseconds
    expires_at: i64,
}

impl Envelope {
    /// Create an envelope expiring `ttl` from now
    pub fn new(key: &CacheKey, value: Bytes, ttl: Duration) -> Self {
        let created_at = now_ms();
        // TTLs past the epoch-millisecond horizon saturate instead of wrapping
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            key: key.full().to_string(),
            value,
            flags: 0,
            created_at,
            expires_at: created_at.saturating_add(ttl_ms),
        }
    }

    /// Create an envelope with explicit timestamps (tier transfers, rewraps)
    pub fn with_expiry(key: &CacheKey, value: Bytes, created_at: i64, expires_at: i64) -> Self {
        Self {
            key: key.full().to_string(),
            value,
            flags: 0,
            created_at,
            expires_at,
        }
    }

    /// Create a pointer stub marking that the payload lives in the Bulk tier
    pub fn pointer(key: &CacheKey, ttl: Duration) -> Self {
        let mut env = Self::new(key, Bytes::new(), ttl);
        env.flags |= FLAG_POINTER;
        env
    }

    /// Get the full key string
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the payload
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consume the envelope, returning the payload
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }

    /// Whether this is a Bulk-tier pointer stub
    #[inline]
    pub fn is_pointer(&self) -> bool {
        self.flags & FLAG_POINTER != 0
    }

    /// Creation time, epoch milliseconds
    #[inline]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Expiry time, epoch milliseconds
    #[inline]
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Whether the entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let left = self.expires_at - now_ms();
        if left <= 0 {
            None
        } else {
            Some(Duration::from_millis(left as u64))
        }
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_OVERHEAD + self.key.len() + self.value.len()
    }

    /// Encode into the binary envelope format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        buf.put_u32(ENVELOPE_MAGIC);
        buf.put_u8(ENVELOPE_VERSION);
        buf.put_u8(self.flags);
        buf.put_i64(self.created_at);
        buf.put_i64(self.expires_at);
        buf.put_u16(self.key.len() as u16);
        buf.put_slice(self.key.as_bytes());
        buf.put_u64(fx_hash(&self.value));
        buf.put_u32(self.value.len() as u32);
        buf.put_slice(&self.value);

        buf.freeze()
    }

    /// Decode and validate a binary envelope.
    ///
    /// Any structural mismatch (short buffer, wrong magic or version, length
    /// overrun, hash mismatch) returns [`Error::CorruptEntry`].
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let corrupt = |key: &str, reason: &str| Error::CorruptEntry {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let mut buf = raw;
        if buf.remaining() < ENVELOPE_OVERHEAD {
            return Err(corrupt("<unknown>", "truncated header"));
        }

        if buf.get_u32() != ENVELOPE_MAGIC {
            return Err(corrupt("<unknown>", "bad magic"));
        }
        let version = buf.get_u8();
        if version != ENVELOPE_VERSION {
            return Err(corrupt("<unknown>", "unsupported version"));
        }
        let flags = buf.get_u8();
        let created_at = buf.get_i64();
        let expires_at = buf.get_i64();

        let key_len = buf.get_u16() as usize;
        if buf.remaining() < key_len + 8 + 4 {
            return Err(corrupt("<unknown>", "truncated key"));
        }
        let key = match std::str::from_utf8(&buf[..key_len]) {
            Ok(s) => s.to_string(),
            Err(_) => return Err(corrupt("<unknown>", "key is not UTF-8")),
        };
        buf.advance(key_len);

        let value_hash = buf.get_u64();
        let value_len = buf.get_u32() as usize;
        if buf.remaining() < value_len {
            return Err(corrupt(&key, "truncated value"));
        }
        let value = Bytes::copy_from_slice(&buf[..value_len]);
        if fx_hash(&value) != value_hash {
            return Err(corrupt(&key, "value hash mismatch"));
        }

        Ok(Self {
            key,
            value,
            flags,
            created_at,
            expires_at,
        })
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("key", &self.key)
            .field("size", &self.value.len())
            .field("pointer", &self.is_pointer())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
