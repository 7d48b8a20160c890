use bytes::Bytes;
use depot_core::ObjectId;
use depot_core::config::StorageConfig;
use depot_state::CacheStateStore;
use depot_storage::{ByteStream, ContentStore, StorageResult};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

#[allow(dead_code)]
pub fn id(s: &str) -> ObjectId {
    ObjectId::new(s).unwrap()
}

/// A content store over a fresh temp directory with fast polling.
#[allow(dead_code)]
pub async fn store(budget: u64) -> (TempDir, Arc<ContentStore>) {
    let temp = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        path: temp.path().join("objects"),
        limit_bytes: budget,
        max_cached_item_size: budget,
        admission_poll_interval_ms: 5,
        tail_retry_interval_ms: 5,
        tail_max_retries: 200,
        ..StorageConfig::default()
    };
    let state = Arc::new(CacheStateStore::new(
        temp.path().join("state.json"),
        10,
        99_999,
    ));
    let store = ContentStore::new(&config, state).await.unwrap();
    (temp, Arc::new(store))
}

/// A source yielding `data` in chunks of `chunk` bytes.
#[allow(dead_code)]
pub fn chunked(data: Bytes, chunk: usize) -> ByteStream {
    let chunks: Vec<StorageResult<Bytes>> = (0..data.len())
        .step_by(chunk)
        .map(|start| Ok(data.slice(start..(start + chunk).min(data.len()))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

/// Sum of the sizes of the files in the store's directory.
#[allow(dead_code)]
pub fn bytes_on_disk(store: &ContentStore) -> u64 {
    std::fs::read_dir(store.root())
        .unwrap()
        .map(|entry| entry.unwrap().metadata().unwrap().len())
        .sum()
}
