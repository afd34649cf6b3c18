//! Error types for the vote ledger

use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unresolved input, rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable write or read failed (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Signing key could not be created or loaded
    #[error("Key initialization error: {0}")]
    KeyInitialization(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Canonical payload encoding error
    #[error("Payload encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Merkle proof invalid
    #[error("Merkle proof invalid: {0}")]
    Merkle(String),

    /// Ledger entry not found
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(u64),

    /// Invariant violation (tally drift, hash mismatch, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Submission refused by the anomaly monitor (block policy only)
    #[error("Submission throttled: {0}")]
    Throttled(String),

    /// Caller stopped waiting for the writer; the request may still have
    /// been applied
    #[error("Timed out after {0}ms waiting for the ledger writer")]
    Timeout(u64),

    /// Vote submission timed out with an unknown outcome. Look the vote up
    /// by `vote_id` before submitting again.
    #[error("Vote {vote_id} timed out after {timeout_ms}ms, outcome unknown")]
    SubmissionTimeout {
        /// ID the vote would be committed under
        vote_id: Uuid,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the request is known not to have been applied, so the caller
    /// may retry it as is.
    ///
    /// Timeouts are excluded: the writer may have committed the request
    /// after the caller stopped waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
