//! The cache-state store.

use crate::error::StateResult;
use crate::latency::LatencyStats;
use crate::pending::{AlreadyTracked, FetchGuard, PendingFetch, Registry};
use depot_core::config::{OriginConfig, StateConfig};
use depot_core::{ObjectId, PeriodicTask};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// On-disk snapshot of the cache state.
///
/// Only LRU order and mime types are persisted. Pending fetches and latency
/// samples live for the process lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Cached object ids, least recently used first.
    pub lru: Vec<ObjectId>,
    pub mime_types: HashMap<ObjectId, String>,
}

/// LRU entries map to the size the ledger accounts for the object.
#[derive(Debug)]
struct Entries {
    lru: LruCache<ObjectId, u64>,
    mime_types: HashMap<ObjectId, String>,
}

/// Owns LRU order, the mime map, the pending-fetch registry and latency
/// statistics.
///
/// All locks are synchronous and never held across an await point. When
/// both the entry lock and the registry lock are needed, the entry lock is
/// taken first.
pub struct CacheStateStore {
    entries: Mutex<Entries>,
    pending: Registry,
    latency: Mutex<LatencyStats>,
    snapshot_path: PathBuf,
}

impl CacheStateStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, latency_window: usize, penalty_ms: u64) -> Self {
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                mime_types: HashMap::new(),
            }),
            pending: Registry::default(),
            latency: Mutex::new(LatencyStats::new(latency_window, penalty_ms)),
            snapshot_path: snapshot_path.into(),
        }
    }

    pub fn from_config(state: &StateConfig, origin: &OriginConfig) -> Self {
        Self::new(
            &state.path,
            origin.latency_window,
            origin.default_latency_penalty_ms,
        )
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    // --- LRU and mime map ---

    /// Mark an object most recently used. No-op if it is not cached.
    pub fn touch(&self, object_id: &ObjectId) {
        self.entries.lock().lru.promote(object_id);
    }

    /// Add an object of `size` bytes as most recently used.
    pub fn insert_entry(&self, object_id: ObjectId, size: u64) {
        self.entries.lock().lru.push(object_id, size);
    }

    /// Record the size of an existing entry without changing its LRU
    /// position. Returns `false` if the object is not cached.
    pub fn set_entry_size(&self, object_id: &ObjectId, size: u64) -> bool {
        match self.entries.lock().lru.peek_mut(object_id) {
            Some(entry) => {
                *entry = size;
                true
            }
            None => false,
        }
    }

    pub fn contains_entry(&self, object_id: &ObjectId) -> bool {
        self.entries.lock().lru.contains(object_id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().lru.len()
    }

    /// Cached ids, least recently used first.
    pub fn cached_ids(&self) -> Vec<ObjectId> {
        self.entries
            .lock()
            .lru
            .iter()
            .rev()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn set_mime(&self, object_id: ObjectId, mime_type: impl Into<String>) {
        self.entries
            .lock()
            .mime_types
            .insert(object_id, mime_type.into());
    }

    pub fn get_mime(&self, object_id: &ObjectId) -> Option<String> {
        self.entries.lock().mime_types.get(object_id).cloned()
    }

    /// Forget an object's LRU position and mime type.
    ///
    /// Returns the recorded size if the entry existed. Of several concurrent
    /// callers only one gets `Some`, which makes it the owner of the bytes.
    pub fn drop_entry(&self, object_id: &ObjectId) -> Option<u64> {
        let mut entries = self.entries.lock();
        entries.mime_types.remove(object_id);
        entries.lru.pop(object_id)
    }

    /// Like [`Self::drop_entry`], but runs `remove` first while the entries
    /// lock is held, so no fetch for the object can be registered until both
    /// are done. `remove` is not called when the object is not cached; if it
    /// fails the entry stays.
    pub fn drop_entry_with<E>(
        &self,
        object_id: &ObjectId,
        remove: impl FnOnce() -> Result<(), E>,
    ) -> Result<Option<u64>, E> {
        let mut entries = self.entries.lock();
        if !entries.lru.contains(object_id) {
            return Ok(None);
        }
        remove()?;
        entries.mime_types.remove(object_id);
        Ok(entries.lru.pop(object_id))
    }

    /// The least recently used cached object that has no fetch in flight.
    pub fn pick_eviction_candidate(&self) -> Option<ObjectId> {
        let entries = self.entries.lock();
        let pending = self.pending.lock();
        entries
            .lru
            .iter()
            .rev()
            .map(|(id, _)| id)
            .find(|id| !pending.contains_key(*id))
            .cloned()
    }

    // --- Pending fetch registry ---

    /// Register a fetch for `object_id` unless one already exists or the
    /// object is already cached.
    ///
    /// Check and insert happen under the entry and registry locks, so
    /// concurrent callers for the same object get exactly one guard; everyone
    /// else receives the existing fetch to wait on. An ingestion inserts its
    /// entry before releasing its registration, so a finished object is
    /// never fetched again.
    pub fn register_pending_fetch(
        &self,
        object_id: ObjectId,
        expected_size: u64,
    ) -> Result<FetchGuard, AlreadyTracked> {
        let entries = self.entries.lock();
        let mut registry = self.pending.lock();
        if let Some(existing) = registry.get(&object_id) {
            return Err(AlreadyTracked::InFlight(existing.clone()));
        }
        if entries.lru.contains(&object_id) {
            return Err(AlreadyTracked::Cached);
        }
        let fetch = Arc::new(PendingFetch::new(object_id.clone(), expected_size));
        registry.insert(object_id, fetch.clone());
        Ok(FetchGuard::new(fetch, self.pending.clone()))
    }

    pub fn get_pending_fetch(&self, object_id: &ObjectId) -> Option<Arc<PendingFetch>> {
        self.pending.lock().get(object_id).cloned()
    }

    /// Remove a registration. Waiters of a fetch that had not finished are
    /// released with [`crate::FetchFailure::Abandoned`].
    pub fn drop_pending_fetch(&self, object_id: &ObjectId) -> Option<Arc<PendingFetch>> {
        let removed = self.pending.lock().remove(object_id);
        if let Some(fetch) = &removed
            && !fetch.status().is_terminal()
        {
            tracing::warn!(object_id = %object_id, "dropping unfinished fetch");
            fetch.abandon();
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // --- Latency ---

    pub fn record_latency(&self, endpoint: &str, latency_ms: u64) {
        self.latency.lock().record(endpoint, latency_ms);
    }

    /// Mean recorded latency, or the penalty for unknown endpoints.
    pub fn mean_latency(&self, endpoint: &str) -> u64 {
        self.latency.lock().mean(endpoint)
    }

    // --- Persistence ---

    pub fn snapshot(&self) -> CacheSnapshot {
        let entries = self.entries.lock();
        CacheSnapshot {
            lru: entries.lru.iter().rev().map(|(id, _)| id.clone()).collect(),
            mime_types: entries.mime_types.clone(),
        }
    }

    /// Write the snapshot atomically (temp file, fsync, rename).
    pub async fn persist(&self) -> StateResult<()> {
        let snapshot = self.snapshot();
        let data = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = self.snapshot_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self
            .snapshot_path
            .with_extension(format!("tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &self.snapshot_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            path = %self.snapshot_path.display(),
            entries = snapshot.lru.len(),
            "cache state persisted"
        );
        Ok(())
    }

    /// Load the snapshot, replacing in-memory LRU order and mime types.
    ///
    /// Returns `false` when no snapshot exists (cold start).
    pub async fn load(&self) -> StateResult<bool> {
        let data = match fs::read(&self.snapshot_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let snapshot: CacheSnapshot = serde_json::from_slice(&data)?;
        let count = snapshot.lru.len();

        let mut entries = self.entries.lock();
        entries.lru.clear();
        // Sizes are not persisted; reconciliation fills them in from disk.
        for id in snapshot.lru {
            entries.lru.push(id, 0);
        }
        entries.mime_types = snapshot.mime_types;
        drop(entries);

        tracing::info!(
            path = %self.snapshot_path.display(),
            entries = count,
            "cache state loaded"
        );
        Ok(true)
    }

    /// Persist on a fixed interval until the returned task is shut down.
    pub fn spawn_persistence(self: &Arc<Self>, interval: Duration) -> PeriodicTask {
        let store = Arc::clone(self);
        PeriodicTask::spawn("cache-state-persist", interval, move || {
            let store = store.clone();
            async move {
                if let Err(e) = store.persist().await {
                    tracing::warn!(error = %e, "periodic cache state persist failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchFailure;
    use tempfile::tempdir;

    fn id(s: &str) -> ObjectId {
        ObjectId::new(s).unwrap()
    }

    fn store() -> CacheStateStore {
        CacheStateStore::new("unused.json", 10, 99_999)
    }

    #[test]
    fn eviction_follows_lru_order() {
        let store = store();
        store.insert_entry(id("a"), 10);
        store.insert_entry(id("b"), 10);
        store.insert_entry(id("c"), 10);
        assert_eq!(store.pick_eviction_candidate(), Some(id("a")));

        store.touch(&id("a"));
        assert_eq!(store.pick_eviction_candidate(), Some(id("b")));
    }

    #[test]
    fn touch_of_unknown_object_is_noop() {
        let store = store();
        store.touch(&id("ghost"));
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.pick_eviction_candidate(), None);
    }

    #[test]
    fn eviction_skips_objects_with_pending_fetch() {
        let store = store();
        store.insert_entry(id("b"), 10);
        // An ingestion inserts its entry just before releasing the fetch.
        let _guard = store.register_pending_fetch(id("a"), 10).unwrap();
        store.insert_entry(id("a"), 10);
        store.touch(&id("b"));

        assert_eq!(store.pick_eviction_candidate(), Some(id("b")));

        store.drop_entry(&id("b"));
        assert_eq!(store.pick_eviction_candidate(), None);
    }

    #[test]
    fn registration_is_check_and_insert() {
        let store = store();
        let guard = store.register_pending_fetch(id("x"), 10).unwrap();
        let existing = match store.register_pending_fetch(id("x"), 10).unwrap_err() {
            AlreadyTracked::InFlight(fetch) => fetch,
            AlreadyTracked::Cached => panic!("object is not cached"),
        };
        assert!(Arc::ptr_eq(guard.fetch(), &existing));
        assert_eq!(store.pending_count(), 1);

        drop(guard);
        assert_eq!(store.pending_count(), 0);
        assert!(store.register_pending_fetch(id("x"), 10).is_ok());
    }

    #[test]
    fn cached_object_is_not_registered_again() {
        let store = store();
        store.insert_entry(id("a"), 100);
        assert!(matches!(
            store.register_pending_fetch(id("a"), 100),
            Err(AlreadyTracked::Cached)
        ));
        assert_eq!(store.pending_count(), 0);

        store.drop_entry(&id("a"));
        assert!(store.register_pending_fetch(id("a"), 100).is_ok());
    }

    #[test]
    fn only_one_caller_claims_a_dropped_entry() {
        let store = store();
        store.insert_entry(id("a"), 100);
        assert_eq!(store.drop_entry(&id("a")), Some(100));
        assert_eq!(store.drop_entry(&id("a")), None);
    }

    #[test]
    fn failed_removal_keeps_the_entry() {
        let store = store();
        store.insert_entry(id("a"), 100);
        assert_eq!(store.drop_entry_with(&id("a"), || Err("busy")), Err("busy"));
        assert!(store.contains_entry(&id("a")));

        let mut calls = 0;
        assert_eq!(
            store.drop_entry_with(&id("a"), || {
                calls += 1;
                Ok::<_, ()>(())
            }),
            Ok(Some(100))
        );
        assert_eq!(
            store.drop_entry_with(&id("a"), || {
                calls += 1;
                Ok::<_, ()>(())
            }),
            Ok(None)
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn entry_size_update_keeps_lru_position() {
        let store = store();
        store.insert_entry(id("a"), 0);
        store.insert_entry(id("b"), 0);
        assert!(store.set_entry_size(&id("a"), 42));
        assert!(!store.set_entry_size(&id("ghost"), 1));
        assert_eq!(store.pick_eviction_candidate(), Some(id("a")));
        assert_eq!(store.drop_entry(&id("a")), Some(42));
    }

    #[tokio::test]
    async fn drop_pending_fetch_releases_waiters() {
        let store = store();
        let guard = store.register_pending_fetch(id("x"), 10).unwrap();
        let fetch = guard.fetch().clone();

        store.drop_pending_fetch(&id("x"));
        assert_eq!(
            fetch
                .wait_until(crate::FetchMilestone::Downloading)
                .await
                .unwrap_err(),
            FetchFailure::Abandoned
        );

        // The guard for the dropped registration must not remove a newer one.
        let newer = store.register_pending_fetch(id("x"), 10).unwrap();
        drop(guard);
        assert!(store.get_pending_fetch(&id("x")).is_some());
        drop(newer);
    }

    #[test]
    fn drop_entry_clears_mime() {
        let store = store();
        store.insert_entry(id("a"), 10);
        store.set_mime(id("a"), "image/png");
        assert_eq!(store.get_mime(&id("a")).as_deref(), Some("image/png"));

        store.drop_entry(&id("a"));
        assert!(store.get_mime(&id("a")).is_none());
        assert!(!store.contains_entry(&id("a")));
    }

    #[test]
    fn latency_defaults_to_penalty() {
        let store = store();
        assert_eq!(store.mean_latency("http://a"), 99_999);
        store.record_latency("http://a", 40);
        store.record_latency("http://a", 60);
        assert_eq!(store.mean_latency("http://a"), 50);
    }

    #[tokio::test]
    async fn persist_and_load_roundtrip_order() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state").join("cache.json");

        let original = CacheStateStore::new(&path, 10, 99_999);
        original.insert_entry(id("a"), 10);
        original.insert_entry(id("b"), 10);
        original.insert_entry(id("c"), 10);
        original.touch(&id("a"));
        original.set_mime(id("b"), "video/mp4");
        let _guard = original.register_pending_fetch(id("d"), 5).unwrap();
        original.persist().await.unwrap();

        let restored = CacheStateStore::new(&path, 10, 99_999);
        assert!(restored.load().await.unwrap());
        assert_eq!(restored.cached_ids(), vec![id("b"), id("c"), id("a")]);
        assert_eq!(restored.get_mime(&id("b")).as_deref(), Some("video/mp4"));
        assert_eq!(restored.pending_count(), 0);
    }

    #[tokio::test]
    async fn load_without_snapshot_is_cold_start() {
        let temp = tempdir().unwrap();
        let store = CacheStateStore::new(temp.path().join("missing.json"), 10, 99_999);
        assert!(!store.load().await.unwrap());
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn load_rejects_corrupt_snapshot() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = CacheStateStore::new(&path, 10, 99_999);
        assert!(matches!(
            store.load().await,
            Err(crate::StateError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn periodic_persistence_writes_snapshot() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.json");
        let store = Arc::new(CacheStateStore::new(&path, 10, 99_999));
        store.insert_entry(id("a"), 10);

        let task = store.spawn_persistence(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.shutdown().await;

        assert!(path.exists());
    }
}
