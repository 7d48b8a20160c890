//! Error types for origin access and chain-of-record lookups.

use thiserror::Error;

/// Origin and catalog error type.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error(transparent)]
    Core(#[from] depot_core::Error),

    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("no origin available: {0}")]
    Unavailable(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OriginError {
    pub(crate) fn request(endpoint: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout(endpoint.to_string())
        } else {
            Self::Request {
                endpoint: endpoint.to_string(),
                source,
            }
        }
    }
}

/// Result type alias for origin operations.
pub type OriginResult<T> = std::result::Result<T, OriginError>;
