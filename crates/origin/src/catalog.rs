//! Chain-of-record boundary.
//!
//! The node never decides on its own which objects exist or who stores
//! them. It asks a [`ChainOfRecord`]. The bundled implementation reads a
//! JSON snapshot of buckets and objects from disk.

use crate::error::{OriginError, OriginResult};
use async_trait::async_trait;
use depot_core::{AssignedObject, Assignment, ContentHash, ObjectId, ObjectRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of truth for object existence, assignment and candidate origins.
#[async_trait]
pub trait ChainOfRecord: Send + Sync + 'static {
    /// Look up one object. `None` means the object is unknown.
    async fn lookup(
        &self,
        object_id: &ObjectId,
        assignment: &Assignment,
    ) -> OriginResult<Option<ObjectRecord>>;

    /// Every object the assignment covers, with its declared size.
    async fn assigned_objects(&self, assignment: &Assignment) -> OriginResult<Vec<AssignedObject>>;

    /// Origin endpoints serving the buckets the assignment covers.
    async fn known_origins(&self, assignment: &Assignment) -> OriginResult<Vec<String>>;

    /// Pick up upstream changes, if the implementation caches anything.
    async fn refresh(&self) -> OriginResult<()> {
        Ok(())
    }
}

/// A bucket as listed in the catalog document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntry {
    pub id: String,
    /// Worker ids operating this bucket.
    #[serde(default)]
    pub operators: Vec<u64>,
    /// Origin endpoints holding the bucket's objects.
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub objects: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

/// The on-disk catalog format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub buckets: Vec<BucketEntry>,
    #[serde(default)]
    pub objects: Vec<ObjectEntry>,
}

#[derive(Debug, Default)]
struct Index {
    buckets: Vec<BucketEntry>,
    objects: HashMap<ObjectId, ObjectEntry>,
    /// Object id to indices of the buckets holding it.
    holders: HashMap<ObjectId, Vec<usize>>,
}

impl Index {
    fn build(document: CatalogDocument) -> Self {
        let mut holders: HashMap<ObjectId, Vec<usize>> = HashMap::new();
        for (index, bucket) in document.buckets.iter().enumerate() {
            for object_id in &bucket.objects {
                holders.entry(object_id.clone()).or_default().push(index);
            }
        }
        let objects = document
            .objects
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        Self {
            buckets: document.buckets,
            objects,
            holders,
        }
    }

    fn holding_buckets<'a>(&'a self, object_id: &ObjectId) -> impl Iterator<Item = &'a BucketEntry> {
        self.holders
            .get(object_id)
            .into_iter()
            .flatten()
            .filter_map(|&index| self.buckets.get(index))
    }

    fn is_assigned(&self, object_id: &ObjectId, assignment: &Assignment) -> bool {
        self.holding_buckets(object_id)
            .any(|bucket| assignment.covers(&bucket.id, &bucket.operators))
    }
}

fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, origins: &[String]) {
    for origin in origins {
        if seen.insert(origin.clone()) {
            out.push(origin.clone());
        }
    }
}

/// [`ChainOfRecord`] backed by a JSON catalog file.
pub struct CatalogFile {
    path: Option<PathBuf>,
    index: RwLock<Arc<Index>>,
}

impl CatalogFile {
    /// Build from an in-memory document. [`ChainOfRecord::refresh`] is a
    /// no-op for catalogs created this way.
    pub fn from_document(document: CatalogDocument) -> Self {
        Self {
            path: None,
            index: RwLock::new(Arc::new(Index::build(document))),
        }
    }

    /// Load the catalog from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> OriginResult<Self> {
        let path = path.as_ref().to_path_buf();
        let document = read_document(&path).await?;
        tracing::info!(
            path = %path.display(),
            buckets = document.buckets.len(),
            objects = document.objects.len(),
            "catalog loaded"
        );
        Ok(Self {
            path: Some(path),
            index: RwLock::new(Arc::new(Index::build(document))),
        })
    }

    fn index(&self) -> Arc<Index> {
        self.index.read().clone()
    }
}

async fn read_document(path: &Path) -> OriginResult<CatalogDocument> {
    let raw = tokio::fs::read(path).await.map_err(|e| {
        OriginError::Catalog(format!("failed to read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

#[async_trait]
impl ChainOfRecord for CatalogFile {
    async fn lookup(
        &self,
        object_id: &ObjectId,
        assignment: &Assignment,
    ) -> OriginResult<Option<ObjectRecord>> {
        let index = self.index();
        let Some(entry) = index.objects.get(object_id) else {
            return Ok(None);
        };

        let mut origins = Vec::new();
        let mut seen = HashSet::new();
        for bucket in index.holding_buckets(object_id) {
            push_unique(&mut origins, &mut seen, &bucket.origins);
        }

        Ok(Some(ObjectRecord {
            object_id: object_id.clone(),
            size: entry.size,
            content_hash: entry.hash,
            origins,
            assigned: index.is_assigned(object_id, assignment),
        }))
    }

    async fn assigned_objects(&self, assignment: &Assignment) -> OriginResult<Vec<AssignedObject>> {
        let index = self.index();
        Ok(index
            .objects
            .values()
            .filter(|entry| index.is_assigned(&entry.id, assignment))
            .map(|entry| AssignedObject {
                object_id: entry.id.clone(),
                size: entry.size,
            })
            .collect())
    }

    async fn known_origins(&self, assignment: &Assignment) -> OriginResult<Vec<String>> {
        let index = self.index();
        let mut origins = Vec::new();
        let mut seen = HashSet::new();
        for bucket in &index.buckets {
            if assignment.covers(&bucket.id, &bucket.operators) {
                push_unique(&mut origins, &mut seen, &bucket.origins);
            }
        }
        Ok(origins)
    }

    async fn refresh(&self) -> OriginResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let document = read_document(path).await?;
        *self.index.write() = Arc::new(Index::build(document));
        tracing::debug!(path = %path.display(), "catalog reloaded");
        Ok(())
    }
}
