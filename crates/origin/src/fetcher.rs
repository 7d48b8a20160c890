//! Origin selection and the download race.

use crate::client::{OriginClient, parse_endpoint};
use crate::error::{OriginError, OriginResult};
use depot_core::config::OriginConfig;
use depot_core::{ObjectId, ObjectRecord};
use depot_state::{CacheStateStore, PendingFetch};
use depot_storage::{ByteStream, StorageError};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use reqwest::header::CONTENT_TYPE;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Picks origins for an object and streams its bytes from them.
pub struct Fetcher {
    client: OriginClient,
    state: Arc<CacheStateStore>,
    probe_concurrency: usize,
    probe_failures: AtomicU64,
}

impl Fetcher {
    pub fn new(client: OriginClient, state: Arc<CacheStateStore>, config: &OriginConfig) -> Self {
        Self {
            client,
            state,
            probe_concurrency: config.probe_concurrency.max(1),
            probe_failures: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &OriginClient {
        &self.client
    }

    /// Probe failures since the last call.
    pub fn take_probe_failures(&self) -> u64 {
        self.probe_failures.swap(0, Ordering::Relaxed)
    }

    /// Drop malformed endpoints and order the rest by mean latency, fastest
    /// first. Endpoints without samples carry the penalty latency.
    pub fn rank_origins(&self, origins: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<(u64, String)> = origins
            .iter()
            .filter(|endpoint| seen.insert(*endpoint))
            .filter(|endpoint| match parse_endpoint(endpoint) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "skipping origin");
                    false
                }
            })
            .map(|endpoint| (self.state.mean_latency(endpoint), endpoint.clone()))
            .collect();
        // Stable, so equal latencies keep chain-of-record order.
        ranked.sort_by_key(|(latency, _)| *latency);
        ranked.into_iter().map(|(_, endpoint)| endpoint).collect()
    }

    async fn timed_probe(&self, endpoint: String, object_id: &ObjectId) -> (String, OriginResult<()>) {
        let started = Instant::now();
        let result = self.client.probe(&endpoint, object_id).await;
        let latency_ms = match &result {
            Ok(()) => started.elapsed().as_millis() as u64,
            Err(e) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(origin = %endpoint, object_id = %object_id, error = %e, "probe failed");
                self.client.timeout().as_millis() as u64
            }
        };
        self.state.record_latency(&endpoint, latency_ms);
        (endpoint, result)
    }

    /// Probe queued endpoints concurrently and return the first that
    /// answers.
    ///
    /// Probes still running when one succeeds are cancelled and their
    /// endpoints go back to the front of the queue in their original order,
    /// so a later fallback can try them.
    async fn probe_next(&self, object_id: &ObjectId, queue: &mut VecDeque<String>) -> Option<String> {
        let mut in_flight = FuturesUnordered::new();
        let mut probing: Vec<String> = Vec::new();
        loop {
            while in_flight.len() < self.probe_concurrency {
                let Some(endpoint) = queue.pop_front() else {
                    break;
                };
                probing.push(endpoint.clone());
                in_flight.push(self.timed_probe(endpoint, object_id));
            }

            let (endpoint, result) = in_flight.next().await?;
            probing.retain(|e| e != &endpoint);
            if result.is_ok() {
                drop(in_flight);
                for endpoint in probing.into_iter().rev() {
                    queue.push_front(endpoint);
                }
                return Some(endpoint);
            }
        }
    }

    /// Find one origin that currently has the object.
    pub async fn find_source(&self, record: &ObjectRecord) -> OriginResult<String> {
        let mut queue: VecDeque<String> = self.rank_origins(&record.origins).into();
        let candidates = queue.len();
        self.probe_next(&record.object_id, &mut queue)
            .await
            .ok_or_else(|| {
                OriginError::Unavailable(format!(
                    "none of {candidates} origins has {}",
                    record.object_id
                ))
            })
    }

    /// Stream an object's bytes, failing over between origins.
    ///
    /// Nothing happens until the stream is polled. Each download publishes
    /// its origin into `fetch` once response headers arrive. A download that
    /// breaks off is resumed from the received offset on the next origin that
    /// answers a probe. The stream fails with
    /// [`StorageError::OriginUnavailable`] once every origin is exhausted.
    pub fn fetch(self: &Arc<Self>, record: ObjectRecord, fetch: Arc<PendingFetch>) -> ByteStream {
        let this = self.clone();
        let stream = async_stream::try_stream! {
            let object_id = record.object_id.clone();
            let mut queue: VecDeque<String> = this.rank_origins(&record.origins).into();
            let candidates = queue.len();
            let chunk_timeout = this.client.timeout();
            let mut received: u64 = 0;

            while let Some(endpoint) = this.probe_next(&object_id, &mut queue).await {
                let response = match this.client.download(&endpoint, &object_id, received).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(origin = %endpoint, object_id = %object_id, error = %e, "download failed to start");
                        continue;
                    }
                };
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                tracing::info!(origin = %endpoint, object_id = %object_id, offset = received, "downloading");
                fetch.set_downloading(endpoint.clone(), content_type);

                let mut body = response.bytes_stream();
                loop {
                    match tokio::time::timeout(chunk_timeout, body.next()).await {
                        Ok(Some(Ok(chunk))) => {
                            received += chunk.len() as u64;
                            yield chunk;
                        }
                        Ok(Some(Err(e))) => {
                            tracing::warn!(origin = %endpoint, object_id = %object_id, received, error = %e, "download interrupted");
                            break;
                        }
                        Ok(None) => break,
                        Err(_) => {
                            tracing::warn!(origin = %endpoint, object_id = %object_id, received, "download stalled");
                            break;
                        }
                    }
                }
                if received >= record.size {
                    return;
                }
            }

            Err(StorageError::OriginUnavailable(format!(
                "all {candidates} origins failed for {object_id} after {received} bytes"
            )))?;
        };
        Box::pin(stream)
    }
}
