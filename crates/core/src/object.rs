//! Data object identity and distribution assignment types.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maximum accepted length of an object id.
const MAX_OBJECT_ID_LEN: usize = 128;

/// Identifier of a data object, as assigned by the chain of record.
///
/// Object ids double as on-disk filenames, so only ASCII alphanumerics,
/// `-` and `_` are accepted and the id may not start with `-`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Create from a string, validating format.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidObjectId(
                "object id cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_OBJECT_ID_LEN {
            return Err(crate::Error::InvalidObjectId(format!(
                "object id longer than {MAX_OBJECT_ID_LEN} chars"
            )));
        }
        if id.starts_with('-') {
            return Err(crate::Error::InvalidObjectId(format!(
                "object id cannot start with '-': {id}"
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(crate::Error::InvalidObjectId(format!(
                "invalid character in object id: {c:?}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which buckets this node distributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// An explicit set of bucket ids.
    Buckets(BTreeSet<String>),
    /// Every bucket operated by the given worker.
    Worker(u64),
}

impl Assignment {
    /// Resolve the effective assignment from node settings.
    ///
    /// An explicit bucket list takes precedence over the worker id.
    pub fn from_settings(worker_id: Option<u64>, buckets: Option<&[String]>) -> Self {
        match (buckets, worker_id) {
            (Some(buckets), _) => Self::Buckets(buckets.iter().cloned().collect()),
            (None, Some(worker_id)) => Self::Worker(worker_id),
            (None, None) => Self::Buckets(BTreeSet::new()),
        }
    }

    /// Whether a bucket with the given id and operators falls under this
    /// assignment.
    pub fn covers(&self, bucket_id: &str, operators: &[u64]) -> bool {
        match self {
            Self::Buckets(ids) => ids.contains(bucket_id),
            Self::Worker(worker_id) => operators.contains(worker_id),
        }
    }
}

/// What the chain of record knows about a single object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub object_id: ObjectId,
    /// Declared size in bytes.
    pub size: u64,
    /// Expected digest, when the chain of record reports one.
    pub content_hash: Option<ContentHash>,
    /// Candidate origin endpoints currently storing the object.
    pub origins: Vec<String>,
    /// Whether this node is assigned to distribute the object.
    pub assigned: bool,
}

/// An object in the node's current distribution assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignedObject {
    pub object_id: ObjectId,
    pub size: u64,
}
