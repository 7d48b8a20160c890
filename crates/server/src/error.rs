//! API error types.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use depot_origin::OriginError;
use depot_state::FetchFailure;
use depot_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type for programmatic handling.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not served by this node: {0}")]
    NotSupported(String),

    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("public API is stopped")]
    ApiStopped,

    #[error("origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("integrity check failed: {0}")]
    IntegrityMismatch(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("local I/O error")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error type for this error.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotSupported(_) => "not_supported",
            Self::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::ApiStopped => "api_stopped",
            Self::OriginUnavailable(_) => "origin_unavailable",
            Self::IntegrityMismatch(_) => "integrity_mismatch",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotSupported(_) => StatusCode::MISDIRECTED_REQUEST,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ApiStopped => StatusCode::SERVICE_UNAVAILABLE,
            Self::OriginUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::IntegrityMismatch(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::InvalidRange(msg) => Self::BadRequest(msg),
            StorageError::SizeMismatch { .. } | StorageError::HashMismatch { .. } => {
                Self::IntegrityMismatch(e.to_string())
            }
            StorageError::OriginUnavailable(msg) => Self::OriginUnavailable(msg),
            StorageError::Timeout(msg) => Self::Timeout(msg),
            StorageError::FetchFailed(failure) => failure.into(),
            StorageError::Io(_) | StorageError::ExceedsBudget { .. } => Self::Io(e.to_string()),
        }
    }
}

impl From<FetchFailure> for ApiError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::OriginUnavailable(msg) => Self::OriginUnavailable(msg),
            FetchFailure::IntegrityMismatch(msg) => Self::IntegrityMismatch(msg),
            FetchFailure::Io(msg) => Self::Io(msg),
            FetchFailure::Timeout(msg) => Self::Timeout(msg),
            FetchFailure::Abandoned => Self::Internal("fetch abandoned".to_string()),
        }
    }
}

impl From<OriginError> for ApiError {
    fn from(e: OriginError) -> Self {
        match e {
            OriginError::Timeout(endpoint) => Self::Timeout(endpoint),
            OriginError::Unavailable(msg) => Self::OriginUnavailable(msg),
            OriginError::Request { .. } | OriginError::Status { .. } => {
                Self::OriginUnavailable(e.to_string())
            }
            OriginError::Core(_) | OriginError::Catalog(_) | OriginError::Io(_) | OriginError::Json(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<depot_core::Error> for ApiError {
    fn from(e: depot_core::Error) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Io(detail) => tracing::error!(error = %detail, "request failed on local I/O"),
            e if status.is_server_error() => tracing::warn!(error = %e, "request failed"),
            _ => {}
        }
        let body = ErrorResponse {
            error_type: self.error_type().to_string(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Self::RangeNotSatisfiable { size } = self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
