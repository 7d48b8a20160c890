//! HTTP edge server for the depot content cache.
//!
//! This crate provides the node's HTTP surface:
//! - Asset retrieval with range support, tailing of in-flight fetches
//!   and reverse proxying of uncacheable objects
//! - Status, bucket assignment and health endpoints
//! - Admin endpoints (API switch, shutdown, reassignment)
//! - Startup reconciliation and background maintenance loops

pub mod auth;
pub mod background;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod range;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use background::BackgroundTasks;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
