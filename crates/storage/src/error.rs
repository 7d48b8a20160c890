//! Storage error types.

use depot_state::FetchFailure;
use thiserror::Error;

/// Content store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("object of {size} bytes exceeds the storage budget of {budget} bytes")]
    ExceedsBudget { size: u64, budget: u64 },

    #[error("origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("fetch failed: {0}")]
    FetchFailed(FetchFailure),
}

impl From<&StorageError> for FetchFailure {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::SizeMismatch { .. } | StorageError::HashMismatch { .. } => {
                FetchFailure::IntegrityMismatch(err.to_string())
            }
            StorageError::OriginUnavailable(msg) => FetchFailure::OriginUnavailable(msg.clone()),
            StorageError::Timeout(msg) => FetchFailure::Timeout(msg.clone()),
            StorageError::FetchFailed(failure) => failure.clone(),
            _ => FetchFailure::Io(err.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
