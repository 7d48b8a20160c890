//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid origin endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
