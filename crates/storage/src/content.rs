//! Budgeted on-disk content store.

use crate::ByteStream;
use crate::error::{StorageError, StorageResult};
use crate::ledger::SpaceLedger;
use crate::mime;
use bytes::Bytes;
use depot_core::ObjectId;
use depot_core::config::StorageConfig;
use depot_state::CacheStateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

/// Default chunk size for streaming reads (64 KiB).
pub(crate) const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Stores one file per object, named by object id, under a single directory.
///
/// The store owns the space ledger and is the only component that creates or
/// deletes object files. LRU order and mime types live in the
/// [`CacheStateStore`], which is updated through its public operations.
pub struct ContentStore {
    pub(crate) root: PathBuf,
    pub(crate) ledger: SpaceLedger,
    pub(crate) state: Arc<CacheStateStore>,
    pub(crate) admission_poll_interval: Duration,
    pub(crate) tail_retry_interval: Duration,
    pub(crate) tail_max_retries: u32,
}

impl ContentStore {
    /// Create the store, creating the data directory if needed.
    ///
    /// The ledger starts at zero; run
    /// [`ContentStore::startup_reconciliation`] to account for files already
    /// on disk.
    pub async fn new(config: &StorageConfig, state: Arc<CacheStateStore>) -> StorageResult<Self> {
        fs::create_dir_all(&config.path).await?;
        Ok(Self {
            root: config.path.clone(),
            ledger: SpaceLedger::new(config.limit_bytes),
            state,
            admission_poll_interval: config.admission_poll_interval(),
            tail_retry_interval: config.tail_retry_interval(),
            tail_max_retries: config.tail_max_retries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &Arc<CacheStateStore> {
        &self.state
    }

    pub fn budget(&self) -> u64 {
        self.ledger.budget()
    }

    pub fn used_space(&self) -> u64 {
        self.ledger.used()
    }

    pub fn free_space(&self) -> u64 {
        self.ledger.free()
    }

    /// File path of an object. Object ids are validated to be plain file
    /// names, so the path never escapes the root.
    pub fn path(&self, object_id: &ObjectId) -> PathBuf {
        self.root.join(object_id.as_str())
    }

    pub async fn exists(&self, object_id: &ObjectId) -> StorageResult<bool> {
        Ok(fs::try_exists(self.path(object_id)).await?)
    }

    /// Current on-disk size; for an object still being written this is the
    /// length of the downloaded prefix.
    pub async fn size_of(&self, object_id: &ObjectId) -> StorageResult<u64> {
        let metadata = fs::metadata(self.path(object_id))
            .await
            .map_err(|e| not_found_or_io(e, object_id))?;
        Ok(metadata.len())
    }

    /// Delete a cached object: remove its file, forget its cache state and
    /// give its bytes back to the ledger.
    ///
    /// The file is unlinked while the state store holds the entry, so no new
    /// fetch can be registered and recreate the file in between. Of
    /// concurrent deletes only the one that claims the entry releases its
    /// bytes. Returns `false` when the object was not cached.
    #[instrument(skip(self), fields(object_id = %object_id))]
    pub async fn delete(&self, object_id: &ObjectId, reason: &str) -> StorageResult<bool> {
        let path = self.path(object_id);
        let mut file_was_present = true;
        let claimed = self.state.drop_entry_with(object_id, || {
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    file_was_present = false;
                    Ok(())
                }
                Err(e) => Err(StorageError::Io(e)),
            }
        })?;
        let Some(size) = claimed else {
            tracing::debug!(reason, "object not cached, nothing to delete");
            return Ok(false);
        };
        self.ledger.release(size);
        if file_was_present {
            tracing::info!(reason, size, "object deleted");
        } else {
            tracing::warn!(reason, size, "object file already gone");
        }
        Ok(true)
    }

    /// Sniff the content type from the file's leading bytes.
    pub async fn detect_mime_type(&self, object_id: &ObjectId) -> StorageResult<String> {
        let mut file = fs::File::open(self.path(object_id))
            .await
            .map_err(|e| not_found_or_io(e, object_id))?;
        let mut head = vec![0u8; mime::SNIFF_LEN];
        let mut filled = 0;
        while filled < head.len() {
            let n = file.read(&mut head[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(mime::sniff(&head[..filled]))
    }

    /// Stream the inclusive byte range `[start, end]` of a complete file.
    #[instrument(skip(self), fields(object_id = %object_id))]
    pub async fn read_range(
        &self,
        object_id: &ObjectId,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream> {
        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        let mut file = fs::File::open(self.path(object_id))
            .await
            .map_err(|e| not_found_or_io(e, object_id))?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut remaining = end - start + 1;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            while remaining > 0 {
                let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file ended with {remaining} bytes of the range unread"),
                    ))?;
                }
                remaining -= n as u64;
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };
        Ok(Box::pin(stream))
    }
}

pub(crate) fn not_found_or_io(e: std::io::Error, object_id: &ObjectId) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(object_id.to_string())
    } else {
        StorageError::Io(e)
    }
}
