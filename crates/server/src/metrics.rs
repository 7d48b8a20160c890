//! Prometheus metrics for the depot edge node.
//!
//! Exposes cache hit ratios, fetch outcomes, ingestion throughput and the
//! current storage and in-flight fetch levels.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! It carries no object ids, only aggregate counts, but should still be
//! network-restricted to the scraper.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static CACHE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_cache_requests_total",
            "Asset requests by cache result (hit, pending, miss, proxied)",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static FETCHES_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_fetches_started_total",
        "Total number of origin fetches started",
    )
    .expect("metric creation failed")
});

pub static FETCHES_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("depot_fetches_failed_total", "Failed origin fetches by kind"),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static INGEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "depot_ingest_duration_seconds",
            "Time from fetch start until the object is fully on disk",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_bytes_ingested_total",
        "Total bytes of successfully ingested objects",
    )
    .expect("metric creation failed")
});

pub static ORIGIN_PROBE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_origin_probe_failures_total",
        "Total number of failed origin availability probes",
    )
    .expect("metric creation failed")
});

pub static STORAGE_USED_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "depot_storage_used_bytes",
        "Bytes currently reserved in the content store",
    )
    .expect("metric creation failed")
});

pub static PENDING_FETCHES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("depot_pending_fetches", "Current number of in-flight fetches")
        .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so several routers in one process (as in tests) are fine.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CACHE_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FETCHES_STARTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FETCHES_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGEST_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORIGIN_PROBE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORAGE_USED_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PENDING_FETCHES.clone()))
            .expect("metric registration failed");
    });
}

/// Count one asset request by how it was answered.
pub fn record_cache_result(result: &str) {
    CACHE_REQUESTS.with_label_values(&[result]).inc();
}

/// GET /metrics - Prometheus metrics endpoint.
///
/// Level gauges are sampled from the live state on every scrape.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    STORAGE_USED_BYTES.set(i64::try_from(state.content.used_space()).unwrap_or(i64::MAX));
    PENDING_FETCHES.set(i64::try_from(state.cache_state.pending_count()).unwrap_or(i64::MAX));
    ORIGIN_PROBE_FAILURES.inc_by(state.fetcher.take_probe_failures());

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        record_cache_result("hit");
        assert!(CACHE_REQUESTS.with_label_values(&["hit"]).get() >= 1);
    }
}
