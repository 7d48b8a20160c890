//! Asset retrieval: cache hits, joins onto in-flight fetches, cold misses
//! and reverse proxying.

use crate::error::{ApiError, ApiResult};
use crate::ingest;
use crate::metrics::record_cache_result;
use crate::range::ByteRange;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use depot_core::{DEFAULT_MIME_TYPE, ObjectId, ObjectRecord};
use depot_state::{FetchMilestone, PendingFetch};
use depot_storage::{ByteStream, StorageError};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;

const CACHE_CONTROL_HIT: &str = "max-age=31536000";
const CACHE_CONTROL_PENDING: &str = "max-age=0, must-revalidate";

/// How a request was answered, reported in `x-cache`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheResult {
    Hit,
    Pending,
    Miss,
}

impl CacheResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Pending => "pending",
            Self::Miss => "miss",
        }
    }
}

/// Headers shared by every locally served asset response.
struct AssetHead {
    status: StatusCode,
    cache: CacheResult,
    cache_control: &'static str,
    content_type: String,
    length: u64,
    /// `(start, end, size)` for partial responses.
    content_range: Option<(u64, u64, u64)>,
}

impl AssetHead {
    /// Plan a response for `size` bytes, honoring a parsed range.
    /// Returns `None` when the range cannot be satisfied.
    fn plan(
        size: u64,
        range: Option<ByteRange>,
        cache: CacheResult,
        cache_control: &'static str,
        content_type: String,
    ) -> Option<Self> {
        let (status, length, content_range) = match range {
            None => (StatusCode::OK, size, None),
            Some(range) => {
                let (start, end) = range.resolve(size)?;
                (
                    StatusCode::PARTIAL_CONTENT,
                    end - start + 1,
                    Some((start, end, size)),
                )
            }
        };
        Some(Self {
            status,
            cache,
            cache_control,
            content_type,
            length,
            content_range,
        })
    }

    /// Inclusive byte span to read, or `None` for an empty body.
    fn span(&self) -> Option<(u64, u64)> {
        match self.content_range {
            Some((start, end, _)) => Some((start, end)),
            None if self.length > 0 => Some((0, self.length - 1)),
            None => None,
        }
    }

    fn into_response(self, body: Body) -> ApiResult<Response> {
        let mut builder = Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, self.content_type)
            .header(CONTENT_LENGTH, self.length)
            .header(ACCEPT_RANGES, "bytes")
            .header(CACHE_CONTROL, self.cache_control)
            .header("x-cache", self.cache.as_str())
            .header("x-data-source", "local");
        if let Some((start, end, size)) = self.content_range {
            builder = builder.header(CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
        }
        builder
            .body(body)
            .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
    }
}

fn stream_body(object_id: &ObjectId, stream: ByteStream) -> Body {
    let object_id = object_id.clone();
    Body::from_stream(stream.inspect_err(move |e| {
        tracing::warn!(object_id = %object_id, error = %e, "asset stream aborted");
    }))
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(RANGE).and_then(|v| v.to_str().ok())
}

/// Resolve an object through the chain of record, enforcing assignment.
async fn resolve_record(state: &AppState, raw_id: &str) -> ApiResult<ObjectRecord> {
    let object_id =
        ObjectId::new(raw_id).map_err(|_| ApiError::NotFound(format!("object {raw_id}")))?;
    let record = state
        .catalog
        .lookup(&object_id, &state.node.assignment())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("object {object_id}")))?;
    if !record.assigned {
        return Err(ApiError::NotSupported(format!(
            "object {object_id} is not distributed by this node"
        )));
    }
    Ok(record)
}

/// GET /api/v1/assets/{object_id}
pub async fn get_asset(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let record = resolve_record(&state, &raw_id).await?;
    let range = range_header(&headers);

    if let Some(fetch) = state.cache_state.get_pending_fetch(&record.object_id) {
        record_cache_result("pending");
        return serve_pending(&state, &record, fetch, range, CacheResult::Pending).await;
    }

    if state.content.exists(&record.object_id).await? {
        return serve_hit(&state, &record, range).await;
    }

    // Cold miss.
    if record.size > state.config.storage.max_cached_item_size {
        tracing::debug!(object_id = %record.object_id, size = record.size, "too large to cache, proxying");
        record_cache_result("proxied");
        let origin = state.fetcher.find_source(&record).await?;
        return proxy(&state, &record.object_id, &origin, range, CacheResult::Miss).await;
    }

    let (fetch, cache) = match ingest::join_or_start(&state, record.clone()) {
        ingest::Joined::Started(fetch) => (fetch, CacheResult::Miss),
        ingest::Joined::Running(fetch) => (fetch, CacheResult::Pending),
        ingest::Joined::Cached => return serve_hit(&state, &record, range).await,
    };
    record_cache_result(cache.as_str());
    serve_pending(&state, &record, fetch, range, cache).await
}

/// Serve an object that is fully on disk.
async fn serve_hit(state: &AppState, record: &ObjectRecord, range: Option<&str>) -> ApiResult<Response> {
    let object_id = &record.object_id;
    let size = state.content.size_of(object_id).await?;
    let content_type = state
        .cache_state
        .get_mime(object_id)
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
    let head = AssetHead::plan(
        size,
        range.and_then(ByteRange::parse),
        CacheResult::Hit,
        CACHE_CONTROL_HIT,
        content_type,
    )
    .ok_or(ApiError::RangeNotSatisfiable { size })?;

    let body = match head.span() {
        Some((start, end)) => stream_body(object_id, state.content.read_range(object_id, start, end).await?),
        None => Body::empty(),
    };
    state.cache_state.touch(object_id);
    record_cache_result("hit");
    head.into_response(body)
}

/// Serve an object that is still arriving, or hand off to its origin.
async fn serve_pending(
    state: &AppState,
    record: &ObjectRecord,
    fetch: Arc<PendingFetch>,
    range: Option<&str>,
    cache: CacheResult,
) -> ApiResult<Response> {
    let object_id = &record.object_id;
    let status = fetch.wait_until(FetchMilestone::Downloading).await?;
    let source = status.source().cloned();

    let downloaded = match state.content.size_of(object_id).await {
        Ok(size) => Some(size),
        Err(StorageError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    // An invalid or unsatisfiable range is ignored and the whole object is
    // streamed from the local file.
    let parsed = range
        .and_then(ByteRange::parse)
        .filter(|r| r.resolve(record.size).is_some());
    let local = match (parsed, downloaded) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(r), Some(downloaded)) => r
            .resolve(record.size)
            .is_some_and(|(start, _)| start <= downloaded),
    };

    if !local {
        let origin = match source {
            Some(source) => source.origin,
            None => state.fetcher.find_source(record).await?,
        };
        return proxy(state, object_id, &origin, range, cache).await;
    }

    let content_type = source
        .and_then(|s| s.content_type)
        .or_else(|| state.cache_state.get_mime(object_id))
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
    let head = AssetHead::plan(record.size, parsed, cache, CACHE_CONTROL_PENDING, content_type)
        .ok_or(ApiError::RangeNotSatisfiable { size: record.size })?;

    let body = match head.span() {
        Some((start, end)) => {
            let stream = state
                .content
                .open_tailing_reader(object_id, start, end, Some(fetch.watch()))
                .await?;
            // Reads that reach the last byte end only once the fetch has
            // passed its integrity checks.
            let stream = if end + 1 == record.size {
                until_verified(stream, fetch)
            } else {
                stream
            };
            stream_body(object_id, stream)
        }
        None => Body::empty(),
    };
    head.into_response(body)
}

/// Append the fetch outcome to a stream: nothing on success, an error when
/// the fetch fails after the bytes were read.
fn until_verified(stream: ByteStream, fetch: Arc<PendingFetch>) -> ByteStream {
    let outcome = futures::stream::once(async move {
        fetch
            .wait_until(FetchMilestone::Completed)
            .await
            .err()
            .map(|failure| Err(StorageError::FetchFailed(failure)))
    })
    .filter_map(futures::future::ready);
    Box::pin(stream.chain(outcome))
}

/// Forward the request to an origin and stream its answer back.
async fn proxy(
    state: &AppState,
    object_id: &ObjectId,
    origin: &str,
    range: Option<&str>,
    cache: CacheResult,
) -> ApiResult<Response> {
    let upstream = state
        .fetcher
        .client()
        .proxy(origin, object_id, range)
        .await?;

    let mut builder = Response::builder()
        .status(upstream.status())
        .header("x-cache", cache.as_str())
        .header("x-data-source", "external");
    for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_RANGE, ACCEPT_RANGES] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// HEAD /api/v1/assets/{object_id}
///
/// Same status and headers as GET without a body. Never starts a fetch.
pub async fn head_asset(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let record = resolve_record(&state, &raw_id).await?;
    let range = range_header(&headers).and_then(ByteRange::parse);
    let object_id = &record.object_id;

    let head = if let Some(fetch) = state.cache_state.get_pending_fetch(object_id) {
        let content_type = fetch
            .status()
            .source()
            .and_then(|s| s.content_type.clone())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let range = range.filter(|r| r.resolve(record.size).is_some());
        AssetHead::plan(record.size, range, CacheResult::Pending, CACHE_CONTROL_PENDING, content_type)
            .ok_or(ApiError::RangeNotSatisfiable { size: record.size })?
    } else if state.content.exists(object_id).await? {
        let size = state.content.size_of(object_id).await?;
        let content_type = state
            .cache_state
            .get_mime(object_id)
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        AssetHead::plan(size, range, CacheResult::Hit, CACHE_CONTROL_HIT, content_type)
            .ok_or(ApiError::RangeNotSatisfiable { size })?
    } else {
        let range = range.filter(|r| r.resolve(record.size).is_some());
        AssetHead::plan(
            record.size,
            range,
            CacheResult::Miss,
            CACHE_CONTROL_PENDING,
            DEFAULT_MIME_TYPE.to_string(),
        )
        .ok_or(ApiError::RangeNotSatisfiable { size: record.size })?
    };

    head.into_response(Body::empty())
}
