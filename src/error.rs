//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend storage error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Stored envelope failed validation
    #[error("Corrupt entry for key '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    /// Entry exceeds the per-entry size limit of the target tier
    #[error("Entry for key '{key}' is {size} bytes, over the {limit} byte tier limit")]
    EntryTooLarge { key: String, size: u64, limit: u64 },

    /// Value serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller-supplied producer failed
    #[error("Producer failed for key '{key}': {source}")]
    Producer {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Production lock is held by another caller
    #[error("Lock for key '{key}' is held by another caller")]
    LockHeld { key: String },

    /// Operation was cancelled by the caller
    #[error("Operation cancelled for key '{key}'")]
    Cancelled { key: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a producer failure, preserving the original error as the source.
    pub fn producer(
        key: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Producer {
            key: key.into(),
            source: source.into(),
        }
    }

    /// True for failures that the read path downgrades to a miss.
    pub fn is_read_degradable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Backend(_) | Error::CorruptEntry { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
