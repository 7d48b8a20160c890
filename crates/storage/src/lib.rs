//! Disk-backed content store for the depot edge cache.
//!
//! This crate provides:
//! - A space ledger enforcing the configured byte budget
//! - Streaming ingestion with LRU eviction and integrity checks
//! - Range reads of complete files and tailing reads of files still being written
//! - Startup reconciliation of on-disk files against the assignment

pub mod content;
pub mod error;
mod ingest;
pub mod ledger;
pub mod mime;
mod reconcile;
mod tail;

pub use content::ContentStore;
pub use error::{StorageError, StorageResult};
pub use ledger::SpaceLedger;
pub use reconcile::ReconcileReport;

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads and ingestion sources.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;
