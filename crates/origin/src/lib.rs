//! Origin access for the depot edge cache.
//!
//! This crate provides:
//! - The chain-of-record boundary and a JSON catalog implementation
//! - An HTTP client for origin storage nodes
//! - Latency-ranked origin selection with a bounded probe race and
//!   resumable fail-over downloads
//! - A periodic latency prober

pub mod catalog;
pub mod client;
pub mod error;
pub mod fetcher;
pub mod prober;

pub use catalog::{CatalogDocument, CatalogFile, ChainOfRecord};
pub use client::OriginClient;
pub use error::{OriginError, OriginResult};
pub use fetcher::Fetcher;
pub use prober::LatencyProber;
