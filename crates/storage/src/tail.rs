//! Reads over files that are still being written.

use crate::ByteStream;
use crate::content::{ContentStore, STREAM_CHUNK_SIZE, not_found_or_io};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use depot_core::ObjectId;
use depot_state::{FetchFailure, FetchStatus};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tracing::instrument;

/// What a reader should do after hitting the current end of file.
enum AtEof {
    Retry,
    Finished,
    Failed(FetchFailure),
}

fn check_fetch(watch: Option<&watch::Receiver<FetchStatus>>) -> AtEof {
    let Some(watch) = watch else {
        return AtEof::Retry;
    };
    match &*watch.borrow() {
        FetchStatus::Failed(failure) => AtEof::Failed(failure.clone()),
        FetchStatus::Completed(_) => AtEof::Finished,
        _ => AtEof::Retry,
    }
}

impl ContentStore {
    /// Stream `[start, end]` of an object whose file may still be growing.
    ///
    /// When the reader catches up with the writer it sleeps for the tail
    /// retry interval and tries again. After `tail_max_retries` consecutive
    /// empty reads the stream fails with [`StorageError::Timeout`]. Passing
    /// the fetch's status receiver lets the reader stop early when the fetch
    /// fails or completes short of `end`.
    #[instrument(skip(self, watch), fields(object_id = %object_id))]
    pub async fn open_tailing_reader(
        &self,
        object_id: &ObjectId,
        start: u64,
        end: u64,
        watch: Option<watch::Receiver<FetchStatus>>,
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

        let retry_interval = self.tail_retry_interval;
        let max_retries = self.tail_max_retries;
        let object_id = object_id.clone();

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut position = start;
            let mut idle: u32 = 0;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            while position <= end {
                let remaining = end - position + 1;
                let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                let n = file.read(&mut buf[..want]).await?;
                if n > 0 {
                    idle = 0;
                    position += n as u64;
                    yield Bytes::copy_from_slice(&buf[..n]);
                    continue;
                }

                match check_fetch(watch.as_ref()) {
                    AtEof::Failed(failure) => {
                        Err(StorageError::FetchFailed(failure))?;
                    }
                    AtEof::Finished => {
                        // One last read: the final write may have landed
                        // between the empty read and the status check.
                        let n = file.read(&mut buf[..want]).await?;
                        if n == 0 {
                            Err(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                format!("{object_id} ended at byte {position}, before {end}"),
                            ))?;
                        }
                        position += n as u64;
                        yield Bytes::copy_from_slice(&buf[..n]);
                    }
                    AtEof::Retry => {
                        idle += 1;
                        if idle > max_retries {
                            tracing::warn!(object_id = %object_id, position, "tailing read stalled");
                            Err(StorageError::Timeout(format!(
                                "no new data for {object_id} at byte {position} after {max_retries} retries"
                            )))?;
                        }
                        tokio::time::sleep(retry_interval).await;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
