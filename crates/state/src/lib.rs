//! Authoritative in-memory bookkeeping for the depot edge cache.
//!
//! This crate provides:
//! - LRU order and mime-type cache of stored objects, with a JSON snapshot
//! - The registry of in-flight fetches (at most one per object)
//! - The per-fetch state machine waiters block on
//! - Per-origin latency statistics

pub mod error;
pub mod latency;
pub mod pending;
pub mod store;

pub use error::{StateError, StateResult};
pub use latency::LatencyStats;
pub use pending::{
    AlreadyTracked, DownloadSource, FetchFailure, FetchGuard, FetchMilestone, FetchStatus, PendingFetch,
};
pub use store::{CacheSnapshot, CacheStateStore};
