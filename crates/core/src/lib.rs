//! Core domain types and shared logic for the depot edge cache.
//!
//! This crate defines the data model used across all other crates:
//! - Data object identifiers and content hashes
//! - Chain-of-record records and distribution assignments
//! - Node configuration
//! - Owned periodic background tasks

pub mod config;
pub mod error;
pub mod hash;
pub mod object;
pub mod task;

pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use object::{AssignedObject, Assignment, ObjectId, ObjectRecord};
pub use task::PeriodicTask;

/// Content type reported when sniffing cannot identify a blob.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
