//! Ingestion that never finishes must leave nothing behind.

mod common;

use common::*;
use depot_state::{FetchFailure, FetchStatus};
use depot_storage::{ByteStream, StorageError};
use futures::StreamExt;
use std::time::Duration;

#[tokio::test]
async fn cancelled_ingestion_releases_everything() {
    let (_temp, store) = store(1024).await;
    let data = seeded_bytes(1, 200);

    let guard = store
        .state()
        .register_pending_fetch(id("obj-1"), 200)
        .unwrap();
    let fetch = guard.fetch().clone();

    // Half the object, then the origin goes silent.
    let stalled: ByteStream = Box::pin(
        futures::stream::iter(vec![Ok::<_, StorageError>(data.slice(0..100))])
            .chain(futures::stream::pending()),
    );
    let ingest = store.admit_and_ingest(guard, None, async { Ok(stalled) });
    let result = tokio::time::timeout(Duration::from_millis(200), ingest).await;
    assert!(result.is_err(), "ingestion should still be running");

    assert_eq!(store.used_space(), 0);
    assert!(!store.path(&id("obj-1")).exists());
    assert_eq!(fetch.status(), FetchStatus::Failed(FetchFailure::Abandoned));
    assert_eq!(store.state().pending_count(), 0);
    assert!(!store.state().contains_entry(&id("obj-1")));
}

#[tokio::test]
async fn failing_source_releases_everything() {
    let (_temp, store) = store(1024).await;
    let data = seeded_bytes(2, 200);

    let guard = store
        .state()
        .register_pending_fetch(id("obj-1"), 200)
        .unwrap();
    let fetch = guard.fetch().clone();

    let broken: ByteStream = Box::pin(futures::stream::iter(vec![
        Ok(data.slice(0..100)),
        Err(StorageError::Io(std::io::Error::other("connection reset"))),
    ]));
    let result = store
        .admit_and_ingest(guard, None, async { Ok(broken) })
        .await;
    assert!(result.is_err());

    assert_eq!(store.used_space(), 0);
    assert!(!store.path(&id("obj-1")).exists());
    assert!(matches!(fetch.status(), FetchStatus::Failed(_)));
    assert_eq!(store.state().pending_count(), 0);
}
