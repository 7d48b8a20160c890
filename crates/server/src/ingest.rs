//! Starting pull-through fetches.

use crate::metrics;
use crate::state::AppState;
use depot_core::ObjectRecord;
use depot_state::{AlreadyTracked, FetchFailure, PendingFetch};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Result of [`join_or_start`].
pub enum Joined {
    /// This call started the fetch.
    Started(Arc<PendingFetch>),
    /// Another request's fetch is running.
    Running(Arc<PendingFetch>),
    /// The object finished caching after the caller last looked.
    Cached,
}

/// Join the fetch for an object, starting one if none is running.
///
/// Registration is a check-and-insert, so concurrent callers for the same
/// object share a single fetch and an object that is already cached is
/// never fetched again.
pub fn join_or_start(state: &AppState, record: ObjectRecord) -> Joined {
    let guard = match state
        .cache_state
        .register_pending_fetch(record.object_id.clone(), record.size)
    {
        Ok(guard) => guard,
        Err(AlreadyTracked::InFlight(existing)) => return Joined::Running(existing),
        Err(AlreadyTracked::Cached) => return Joined::Cached,
    };
    let fetch = guard.fetch().clone();
    metrics::FETCHES_STARTED.inc();

    let content = state.content.clone();
    let fetcher = state.fetcher.clone();
    let span = tracing::info_span!("ingest", object_id = %record.object_id, size = record.size);
    tokio::spawn(
        async move {
            let started = Instant::now();
            let expected_hash = record.content_hash;
            let source = fetcher.fetch(record, guard.fetch().clone());
            match content
                .admit_and_ingest(guard, expected_hash, async move { Ok(source) })
                .await
            {
                Ok(bytes) => {
                    metrics::BYTES_INGESTED.inc_by(bytes);
                    metrics::INGEST_DURATION.observe(started.elapsed().as_secs_f64());
                }
                Err(e) => {
                    let failure = FetchFailure::from(&e);
                    metrics::FETCHES_FAILED
                        .with_label_values(&[failure.kind()])
                        .inc();
                }
            }
        }
        .instrument(span),
    );

    Joined::Started(fetch)
}
