//! Cache-state error types.

use thiserror::Error;

/// Errors raised while loading or persisting the cache-state snapshot.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache-state operations.
pub type StateResult<T> = std::result::Result<T, StateError>;
