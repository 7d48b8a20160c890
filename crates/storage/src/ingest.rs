//! Admission control and streaming ingestion.

use crate::ByteStream;
use crate::content::ContentStore;
use crate::error::{StorageError, StorageResult};
use depot_core::{ContentHash, ObjectId};
use depot_state::{FetchFailure, FetchGuard};
use futures::StreamExt;
use std::future::Future;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Ledger reservation for an object being written.
///
/// Unless committed, dropping it removes the partial file, gives the bytes
/// back to the ledger and forgets any state entry. This also covers an
/// ingestion future that is cancelled or panics mid-write.
struct Reservation<'a> {
    store: &'a ContentStore,
    object_id: &'a ObjectId,
    size: u64,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Blocking unlink: the file must be gone before the caller's guard
        // drops and the object can be registered again.
        match std::fs::remove_file(self.store.path(self.object_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(object_id = %self.object_id, error = %e, "failed to remove partial file"),
        }
        self.store.ledger.release(self.size);
        self.store.state.drop_entry(self.object_id);
        tracing::debug!(object_id = %self.object_id, size = self.size, "reservation released");
    }
}

impl ContentStore {
    /// Make room for `size` bytes and reserve them in the ledger.
    ///
    /// Evicts least recently used objects until the reservation fits. When
    /// nothing is evictable the call polls until space frees up rather than
    /// failing. Returns the number of evicted objects.
    pub(crate) async fn admit(&self, object_id: &ObjectId, size: u64) -> StorageResult<usize> {
        if size > self.ledger.budget() {
            return Err(StorageError::ExceedsBudget {
                size,
                budget: self.ledger.budget(),
            });
        }

        let mut evicted = 0;
        let mut logged_wait = false;
        loop {
            if self.ledger.try_reserve(size) {
                return Ok(evicted);
            }
            match self.state.pick_eviction_candidate() {
                Some(victim) => {
                    self.delete(&victim, "evicted").await?;
                    evicted += 1;
                }
                None => {
                    if !logged_wait {
                        tracing::info!(
                            object_id = %object_id,
                            size,
                            free = self.ledger.free(),
                            "no eviction candidate, waiting for space"
                        );
                        logged_wait = true;
                    }
                    tokio::time::sleep(self.admission_poll_interval).await;
                }
            }
        }
    }

    /// Admit, download and finalize one object.
    ///
    /// `source` is awaited only after space is reserved and the destination
    /// file exists, so a source that publishes its origin into the pending
    /// fetch lets tailing readers open the file straight away.
    ///
    /// On success the object becomes the most recently used cache entry with
    /// a sniffed mime type, and the guard completes. On any failure the
    /// partial file is removed, the reservation released and every waiter on
    /// the guard's fetch receives the error.
    #[instrument(skip_all, fields(object_id = %guard.object_id(), size = guard.expected_size()))]
    pub async fn admit_and_ingest<F>(
        &self,
        guard: FetchGuard,
        expected_hash: Option<ContentHash>,
        source: F,
    ) -> StorageResult<u64>
    where
        F: Future<Output = StorageResult<ByteStream>> + Send,
    {
        let object_id = guard.object_id().clone();
        let expected_size = guard.expected_size();

        let evicted = match self.admit(&object_id, expected_size).await {
            Ok(evicted) => evicted,
            Err(e) => {
                guard.fail(FetchFailure::from(&e));
                return Err(e);
            }
        };
        if evicted > 0 {
            tracing::info!(evicted, "made room for object");
        }
        let reservation = Reservation {
            store: self,
            object_id: &object_id,
            size: expected_size,
            committed: false,
        };

        match self
            .write_object(&object_id, expected_size, expected_hash, source)
            .await
        {
            Ok(written) => {
                let mime_type = match self.detect_mime_type(&object_id).await {
                    Ok(mime_type) => mime_type,
                    Err(e) => {
                        tracing::warn!(error = %e, "mime detection failed");
                        depot_core::DEFAULT_MIME_TYPE.to_string()
                    }
                };
                self.state.set_mime(object_id.clone(), mime_type);
                self.state.insert_entry(object_id.clone(), expected_size);
                reservation.commit();
                guard.complete();
                tracing::info!(bytes = written, "object ingested");
                Ok(written)
            }
            Err(e) => {
                drop(reservation);
                guard.fail(FetchFailure::from(&e));
                Err(e)
            }
        }
    }

    async fn write_object<F>(
        &self,
        object_id: &ObjectId,
        expected_size: u64,
        expected_hash: Option<ContentHash>,
        source: F,
    ) -> StorageResult<u64>
    where
        F: Future<Output = StorageResult<ByteStream>> + Send,
    {
        let mut file = fs::File::create(self.path(object_id)).await?;
        let mut stream = source.await?;
        let mut hasher = ContentHash::hasher();
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            if received > expected_size {
                return Err(StorageError::SizeMismatch {
                    expected: expected_size,
                    actual: received,
                });
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            // Make the bytes visible to tailing readers.
            file.flush().await?;
        }

        if received != expected_size {
            return Err(StorageError::SizeMismatch {
                expected: expected_size,
                actual: received,
            });
        }
        let actual = hasher.finalize();
        if let Some(expected) = expected_hash
            && expected != actual
        {
            return Err(StorageError::HashMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        file.sync_all().await?;
        Ok(received)
    }
}
