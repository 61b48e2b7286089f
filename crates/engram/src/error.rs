//! Error types for the Engram engine

use thiserror::Error;

/// Main error type for Engram operations
#[derive(Error, Debug)]
pub enum EngramError {
    /// Per-record lock could not be acquired within the configured deadline.
    /// Retryable by the caller.
    #[error("lock timeout for {kind}/{id} after {waited_ms}ms")]
    LockTimeout {
        /// Record kind the lock belongs to
        kind: String,
        /// Record id the lock belongs to
        id: String,
        /// How long the caller waited before giving up
        waited_ms: u64,
    },

    /// Record or version is absent. Read paths return `Option` instead of
    /// this; it is surfaced only where a write requires an existing target.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (affect out of range, empty id, etc.), rejected
    /// before any lock is acquired
    #[error("validation error: {0}")]
    Validation(String),

    /// A single tier/window consolidation failed; other tiers are unaffected
    #[error("consolidation error for {tier} window {bucket}: {message}")]
    Consolidation {
        /// Tier that failed
        tier: String,
        /// Bucket key of the failed window
        bucket: String,
        /// What went wrong
        message: String,
    },

    /// Storage-layer errors, fatal for the single operation
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngramError {
    fn from(err: serde_json::Error) -> Self {
        EngramError::Serialization(err.to_string())
    }
}

/// Result type alias for Engram operations
pub type Result<T> = std::result::Result<T, EngramError>;
