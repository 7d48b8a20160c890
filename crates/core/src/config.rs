//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3334").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:3334".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Node identity and distribution assignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id reported by the status endpoint.
    #[serde(default = "default_node_id")]
    pub id: String,
    /// Worker id used when no explicit bucket list is configured.
    #[serde(default)]
    pub worker_id: Option<u64>,
    /// Explicit set of distributed bucket ids.
    /// When absent, every bucket operated by `worker_id` is distributed.
    #[serde(default)]
    pub buckets: Option<Vec<String>>,
}

fn default_node_id() -> String {
    "depot-node".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            worker_id: None,
            buckets: None,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("node.id cannot be empty".to_string());
        }
        if self.worker_id.is_none() && self.buckets.is_none() {
            return Err("node requires either worker_id or an explicit buckets list".to_string());
        }
        Ok(())
    }
}

/// Content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding cached object files.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Disk budget in bytes.
    #[serde(default = "default_limit_bytes")]
    pub limit_bytes: u64,
    /// Objects declared larger than this are proxied and never cached.
    #[serde(default = "default_max_cached_item_size")]
    pub max_cached_item_size: u64,
    /// How often a blocked admission re-checks for free space.
    #[serde(default = "default_admission_poll_interval_ms")]
    pub admission_poll_interval_ms: u64,
    /// Delay between tailing-reader polls when no new bytes are available.
    #[serde(default = "default_tail_retry_interval_ms")]
    pub tail_retry_interval_ms: u64,
    /// Consecutive empty polls after which a tailing read times out.
    #[serde(default = "default_tail_max_retries")]
    pub tail_max_retries: u32,
    /// Interval between assignment cleanup runs.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_limit_bytes() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

fn default_max_cached_item_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_admission_poll_interval_ms() -> u64 {
    500
}

fn default_tail_retry_interval_ms() -> u64 {
    100
}

fn default_tail_max_retries() -> u32 {
    300 // 30 seconds at the default interval
}

fn default_cleanup_interval_secs() -> u64 {
    600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            limit_bytes: default_limit_bytes(),
            max_cached_item_size: default_max_cached_item_size(),
            admission_poll_interval_ms: default_admission_poll_interval_ms(),
            tail_retry_interval_ms: default_tail_retry_interval_ms(),
            tail_max_retries: default_tail_max_retries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl StorageConfig {
    pub fn admission_poll_interval(&self) -> Duration {
        Duration::from_millis(self.admission_poll_interval_ms.max(1))
    }

    pub fn tail_retry_interval(&self) -> Duration {
        Duration::from_millis(self.tail_retry_interval_ms.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.limit_bytes == 0 {
            return Err("storage.limit_bytes must be greater than zero".to_string());
        }
        if self.max_cached_item_size > self.limit_bytes {
            return Err(
                "storage.max_cached_item_size cannot exceed storage.limit_bytes".to_string(),
            );
        }
        if self.tail_max_retries == 0 {
            return Err("storage.tail_max_retries must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Cache-state snapshot configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateConfig {
    /// JSON snapshot file (LRU order and mime types).
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    /// Interval between periodic snapshot writes.
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/cache-state.json")
}

fn default_save_interval_secs() -> u64 {
    60
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

impl StateConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

/// Origin selection and transfer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Maximum concurrent availability probes per fetch and per latency sweep.
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    /// Hard timeout for every outbound probe or download request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Interval between latency sweeps over all known origins.
    #[serde(default = "default_latency_probe_interval_secs")]
    pub latency_probe_interval_secs: u64,
    /// Number of latency samples kept per origin.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    /// Latency assumed for origins without samples.
    #[serde(default = "default_latency_penalty_ms")]
    pub default_latency_penalty_ms: u64,
}

fn default_probe_concurrency() -> usize {
    10
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_latency_probe_interval_secs() -> u64 {
    60
}

fn default_latency_window() -> usize {
    10
}

fn default_latency_penalty_ms() -> u64 {
    99_999
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: default_probe_concurrency(),
            request_timeout_ms: default_request_timeout_ms(),
            latency_probe_interval_secs: default_latency_probe_interval_secs(),
            latency_window: default_latency_window(),
            default_latency_penalty_ms: default_latency_penalty_ms(),
        }
    }
}

impl OriginConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn latency_probe_interval(&self) -> Duration {
        Duration::from_secs(self.latency_probe_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.probe_concurrency == 0 {
            return Err("origin.probe_concurrency must be greater than zero".to_string());
        }
        if self.latency_window == 0 {
            return Err("origin.latency_window must be greater than zero".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("origin.request_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Chain-of-record catalog configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON document describing buckets, objects and their origins.
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("./data/catalog.json")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// Admin surface configuration.
///
/// Without a token hash every admin call is refused.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// SHA256 hex of the admin bearer token, optionally prefixed with `sha256:`.
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    #[serde(default)]
    pub token_hash: Option<String>,
}

impl AdminConfig {
    /// **For testing only.** SHA256 of "test-admin-token".
    pub fn for_testing() -> Self {
        Self {
            token_hash: Some(
                "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5".to_string(),
            ),
        }
    }

    /// The configured hash without its optional `sha256:` prefix, lowercased.
    pub fn normalized_hash(&self) -> Option<String> {
        self.token_hash.as_deref().map(|hash| {
            hash.trim()
                .strip_prefix("sha256:")
                .unwrap_or(hash.trim())
                .to_ascii_lowercase()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.normalized_hash() {
            Some(hash) if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) => {
                Err("admin.token_hash must be 64 hex characters".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Worker 1, small budget, fast tailing polls and
    /// the test admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            node: NodeConfig {
                id: "test-node".to_string(),
                worker_id: Some(1),
                buckets: None,
            },
            storage: StorageConfig {
                limit_bytes: 1024 * 1024,
                max_cached_item_size: 512 * 1024,
                admission_poll_interval_ms: 10,
                tail_retry_interval_ms: 10,
                tail_max_retries: 100,
                ..StorageConfig::default()
            },
            state: StateConfig::default(),
            origin: OriginConfig {
                request_timeout_ms: 2_000,
                ..OriginConfig::default()
            },
            catalog: CatalogConfig::default(),
            admin: AdminConfig::for_testing(),
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.node.validate()?;
        self.storage.validate()?;
        self.origin.validate()?;
        self.admin.validate()?;
        Ok(())
    }
}
