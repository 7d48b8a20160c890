//! Application state shared across handlers.

use depot_core::Assignment;
use depot_core::config::AppConfig;
use depot_origin::{ChainOfRecord, Fetcher, OriginClient};
use depot_state::CacheStateStore;
use depot_storage::ContentStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The node's distribution settings, changeable at runtime by admins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignmentSettings {
    pub worker_id: Option<u64>,
    pub buckets: Option<Vec<String>>,
}

/// Runtime controls: assignment, public API switch and shutdown trigger.
pub struct NodeControl {
    node_id: String,
    settings: RwLock<AssignmentSettings>,
    public_api: AtomicBool,
    shutdown: CancellationToken,
    started_at: Instant,
    cleanup: tokio::sync::Mutex<()>,
}

impl NodeControl {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            node_id: config.node.id.clone(),
            settings: RwLock::new(AssignmentSettings {
                worker_id: config.node.worker_id,
                buckets: config.node.buckets.clone(),
            }),
            public_api: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
            cleanup: tokio::sync::Mutex::new(()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn settings(&self) -> AssignmentSettings {
        self.settings.read().clone()
    }

    /// The effective assignment. An explicit bucket list wins over the
    /// worker id.
    pub fn assignment(&self) -> Assignment {
        let settings = self.settings.read();
        Assignment::from_settings(settings.worker_id, settings.buckets.as_deref())
    }

    pub fn set_worker_id(&self, worker_id: u64) {
        self.settings.write().worker_id = Some(worker_id);
    }

    pub fn set_buckets(&self, buckets: Option<Vec<String>>) {
        self.settings.write().buckets = buckets;
    }

    pub fn public_api_enabled(&self) -> bool {
        self.public_api.load(Ordering::Acquire)
    }

    pub fn set_public_api(&self, enabled: bool) {
        self.public_api.store(enabled, Ordering::Release);
    }

    /// Cancelled when an admin requests shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Serializes assignment cleanup runs.
    pub(crate) fn cleanup_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.cleanup
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// LRU, mime, latency and in-flight fetch bookkeeping.
    pub cache_state: Arc<CacheStateStore>,
    /// On-disk object storage.
    pub content: Arc<ContentStore>,
    /// Chain-of-record lookups.
    pub catalog: Arc<dyn ChainOfRecord>,
    /// Origin selection and downloads.
    pub fetcher: Arc<Fetcher>,
    /// Runtime node controls.
    pub node: Arc<NodeControl>,
}

impl AppState {
    /// Build the state from configuration.
    ///
    /// Creates the data directory but does not load persisted state or
    /// reconcile the disk; see [`crate::background::prepare`].
    pub async fn new(config: AppConfig, catalog: Arc<dyn ChainOfRecord>) -> anyhow::Result<Self> {
        let cache_state = Arc::new(CacheStateStore::from_config(&config.state, &config.origin));
        let content = Arc::new(ContentStore::new(&config.storage, cache_state.clone()).await?);
        let client = OriginClient::new(config.origin.request_timeout())?;
        let fetcher = Arc::new(Fetcher::new(client, cache_state.clone(), &config.origin));
        let node = Arc::new(NodeControl::new(&config));

        Ok(Self {
            config: Arc::new(config),
            cache_state,
            content,
            catalog,
            fetcher,
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_reassignment_overrides_worker() {
        let control = NodeControl::new(&AppConfig::for_testing());
        assert_eq!(control.assignment(), Assignment::Worker(1));

        control.set_buckets(Some(vec!["3:1".to_string()]));
        assert!(matches!(control.assignment(), Assignment::Buckets(_)));

        control.set_buckets(None);
        control.set_worker_id(9);
        assert_eq!(control.assignment(), Assignment::Worker(9));
    }

    #[test]
    fn public_api_toggle() {
        let control = NodeControl::new(&AppConfig::for_testing());
        assert!(control.public_api_enabled());
        control.set_public_api(false);
        assert!(!control.public_api_enabled());
    }
}
