//! Periodic latency probing of known origins.

use crate::client::OriginClient;
use depot_core::PeriodicTask;
use depot_state::CacheStateStore;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Refreshes per-origin latency samples independently of any fetch.
pub struct LatencyProber {
    client: OriginClient,
    state: Arc<CacheStateStore>,
    concurrency: usize,
}

impl LatencyProber {
    pub fn new(client: OriginClient, state: Arc<CacheStateStore>, concurrency: usize) -> Self {
        Self {
            client,
            state,
            concurrency: concurrency.max(1),
        }
    }

    /// Probe every endpoint once and record a latency sample for each.
    /// A failed probe records the request timeout. Returns how many
    /// endpoints answered.
    pub async fn probe_all(&self, endpoints: Vec<String>) -> usize {
        let timeout_ms = self.client.timeout().as_millis() as u64;
        let results: Vec<bool> = futures::stream::iter(endpoints)
            .map(|endpoint| async move {
                let started = Instant::now();
                let result = self.client.version(&endpoint).await;
                let latency_ms = match &result {
                    Ok(()) => started.elapsed().as_millis() as u64,
                    Err(e) => {
                        tracing::debug!(origin = %endpoint, error = %e, "latency probe failed");
                        timeout_ms
                    }
                };
                self.state.record_latency(&endpoint, latency_ms);
                result.is_ok()
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Probe on a fixed interval. `endpoints` is asked for the current
    /// endpoint list on every tick, so reassignments are picked up.
    pub fn spawn<F, Fut>(self: &Arc<Self>, interval: Duration, mut endpoints: F) -> PeriodicTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        let prober = self.clone();
        PeriodicTask::spawn("latency-probe", interval, move || {
            let prober = prober.clone();
            let endpoints = endpoints();
            async move {
                let endpoints = endpoints.await;
                let total = endpoints.len();
                let reachable = prober.probe_all(endpoints).await;
                tracing::debug!(total, reachable, "latency probe sweep finished");
            }
        })
    }
}
