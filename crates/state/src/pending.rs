//! Per-object fetch state machine.
//!
//! A [`PendingFetch`] exists for every object currently being pulled from an
//! origin. Its status only moves forward:
//!
//! ```text
//! Waiting -> Downloading -> Completed
//!    \            \
//!     +------------+--> Failed
//! ```
//!
//! `Waiting` covers both "registered" and "probing origins"; the two are
//! not observably different. Waiters subscribe to a `watch` channel, so a
//! milestone that was already reached resolves immediately and a failure
//! wakes every waiter exactly once.

use depot_core::ObjectId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

pub(crate) type Registry = Arc<Mutex<HashMap<ObjectId, Arc<PendingFetch>>>>;

/// Terminal failure of a fetch, delivered to every waiter.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("no origin could serve the object: {0}")]
    OriginUnavailable(String),

    #[error("integrity check failed: {0}")]
    IntegrityMismatch(String),

    #[error("local I/O error: {0}")]
    Io(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("fetch abandoned before completion")]
    Abandoned,
}

impl FetchFailure {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OriginUnavailable(_) => "origin_unavailable",
            Self::IntegrityMismatch(_) => "integrity_mismatch",
            Self::Io(_) => "io",
            Self::Timeout(_) => "timeout",
            Self::Abandoned => "abandoned",
        }
    }
}

/// The origin bytes are currently flowing from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadSource {
    pub origin: String,
    pub content_type: Option<String>,
}

/// Current status of a fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    Waiting,
    Downloading(DownloadSource),
    /// All bytes are on disk. Keeps the last source for reference.
    Completed(Option<DownloadSource>),
    Failed(FetchFailure),
}

impl FetchStatus {
    fn milestone(&self) -> Option<FetchMilestone> {
        match self {
            Self::Waiting => Some(FetchMilestone::Waiting),
            Self::Downloading(_) => Some(FetchMilestone::Downloading),
            Self::Completed(_) => Some(FetchMilestone::Completed),
            Self::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    pub fn source(&self) -> Option<&DownloadSource> {
        match self {
            Self::Downloading(source) => Some(source),
            Self::Completed(source) => source.as_ref(),
            _ => None,
        }
    }
}

/// Why [`crate::CacheStateStore::register_pending_fetch`] handed out no
/// guard.
#[derive(Debug)]
pub enum AlreadyTracked {
    /// A fetch is running; wait on it.
    InFlight(Arc<PendingFetch>),
    /// The object is fully cached.
    Cached,
}

/// Milestones a caller can wait for, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchMilestone {
    Waiting,
    Downloading,
    Completed,
}

/// One in-flight fetch of a single object.
#[derive(Debug)]
pub struct PendingFetch {
    object_id: ObjectId,
    expected_size: u64,
    started_at: Instant,
    status: watch::Sender<FetchStatus>,
}

impl PendingFetch {
    pub(crate) fn new(object_id: ObjectId, expected_size: u64) -> Self {
        let (status, _) = watch::channel(FetchStatus::Waiting);
        Self {
            object_id,
            expected_size,
            started_at: Instant::now(),
            status,
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn status(&self) -> FetchStatus {
        self.status.borrow().clone()
    }

    /// A receiver observing every status change.
    pub fn watch(&self) -> watch::Receiver<FetchStatus> {
        self.status.subscribe()
    }

    /// Publish the origin bytes are now streaming from. Republishing with a
    /// different origin is allowed while downloading; ignored once terminal.
    pub fn set_downloading(&self, origin: impl Into<String>, content_type: Option<String>) {
        let source = DownloadSource {
            origin: origin.into(),
            content_type,
        };
        self.status.send_if_modified(|status| {
            if status.is_terminal() {
                return false;
            }
            *status = FetchStatus::Downloading(source);
            true
        });
    }

    fn finish(&self, outcome: FetchStatus) -> bool {
        self.status.send_if_modified(|status| {
            if status.is_terminal() {
                return false;
            }
            *status = match outcome {
                FetchStatus::Completed(_) => FetchStatus::Completed(status.source().cloned()),
                other => other,
            };
            true
        })
    }

    pub(crate) fn abandon(&self) -> bool {
        self.finish(FetchStatus::Failed(FetchFailure::Abandoned))
    }

    /// Resolve once the fetch has reached at least `milestone`.
    ///
    /// Returns the status observed at that point, or the failure if the
    /// fetch fails first.
    pub async fn wait_until(&self, milestone: FetchMilestone) -> Result<FetchStatus, FetchFailure> {
        let mut rx = self.status.subscribe();
        let observed = rx
            .wait_for(|status| match status.milestone() {
                Some(reached) => reached >= milestone,
                None => true,
            })
            .await
            .map(|status| (*status).clone())
            .map_err(|_| FetchFailure::Abandoned)?;

        match observed {
            FetchStatus::Failed(failure) => Err(failure),
            status => Ok(status),
        }
    }
}

/// Exclusive handle held by the task performing a fetch.
///
/// Only [`crate::CacheStateStore::register_pending_fetch`] creates one, so
/// at most one exists per object. Consuming it with [`FetchGuard::complete`]
/// or [`FetchGuard::fail`] resolves every waiter; dropping it unresolved
/// (a panicking or cancelled task) fails waiters with
/// [`FetchFailure::Abandoned`]. Either way the registry entry is removed.
#[derive(Debug)]
pub struct FetchGuard {
    fetch: Arc<PendingFetch>,
    registry: Registry,
}

impl FetchGuard {
    pub(crate) fn new(fetch: Arc<PendingFetch>, registry: Registry) -> Self {
        Self { fetch, registry }
    }

    pub fn fetch(&self) -> &Arc<PendingFetch> {
        &self.fetch
    }

    pub fn object_id(&self) -> &ObjectId {
        self.fetch.object_id()
    }

    pub fn expected_size(&self) -> u64 {
        self.fetch.expected_size()
    }

    pub fn set_downloading(&self, origin: impl Into<String>, content_type: Option<String>) {
        self.fetch.set_downloading(origin, content_type);
    }

    /// Mark the fetch successful and release it.
    pub fn complete(self) {
        self.fetch.finish(FetchStatus::Completed(None));
    }

    /// Mark the fetch failed and release it.
    pub fn fail(self, failure: FetchFailure) {
        tracing::warn!(
            object_id = %self.fetch.object_id(),
            kind = failure.kind(),
            error = %failure,
            "fetch failed"
        );
        self.fetch.finish(FetchStatus::Failed(failure));
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if self.fetch.abandon() {
            tracing::warn!(object_id = %self.fetch.object_id(), "fetch abandoned");
        }
        let mut registry = self.registry.lock();
        if registry
            .get(self.fetch.object_id())
            .is_some_and(|current| Arc::ptr_eq(current, &self.fetch))
        {
            registry.remove(self.fetch.object_id());
        }
    }
}
