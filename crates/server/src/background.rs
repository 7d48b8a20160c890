//! Startup preparation and the node's background loops.

use crate::state::AppState;
use anyhow::{Context, Result};
use depot_core::{ObjectId, PeriodicTask};
use depot_origin::LatencyProber;
use depot_state::CacheStateStore;
use depot_storage::ReconcileReport;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Load persisted cache state and reconcile the data directory with the
/// current assignment. Must finish before the server accepts requests.
pub async fn prepare(state: &AppState) -> Result<ReconcileReport> {
    match state.cache_state.load().await {
        Ok(true) => tracing::info!(
            entries = state.cache_state.entry_count(),
            "cache state loaded"
        ),
        Ok(false) => tracing::info!("no persisted cache state, starting cold"),
        // A corrupt snapshot is rebuilt from disk by reconciliation.
        Err(e) => tracing::warn!(error = %e, "failed to load cache state, rebuilding from disk"),
    }

    let assigned = state
        .catalog
        .assigned_objects(&state.node.assignment())
        .await
        .context("failed to list assigned objects")?;
    let expected: HashMap<ObjectId, u64> = assigned
        .into_iter()
        .map(|object| (object.object_id, object.size))
        .collect();

    let report = state
        .content
        .startup_reconciliation(&expected)
        .await
        .context("startup reconciliation failed")?;
    if report.is_noop() {
        tracing::info!(
            kept = report.kept,
            used_bytes = report.used_bytes,
            "startup reconciliation found disk and snapshot in agreement"
        );
    } else {
        tracing::info!(
            kept = report.kept,
            removed_unassigned = report.removed_unassigned,
            removed_size_mismatch = report.removed_size_mismatch,
            entries_added = report.entries_added,
            mime_filled = report.mime_filled,
            stale_entries_dropped = report.stale_entries_dropped,
            used_bytes = report.used_bytes,
            "startup reconciliation finished"
        );
    }
    Ok(report)
}

/// Delete cached objects that are no longer assigned to this node.
///
/// Returns the number of objects removed.
pub async fn run_cleanup(state: &AppState) -> Result<usize> {
    let _guard = state.node.cleanup_lock().lock().await;

    if let Err(e) = state.catalog.refresh().await {
        tracing::warn!(error = %e, "catalog refresh failed, using last known assignment");
    }
    let assigned: HashSet<ObjectId> = state
        .catalog
        .assigned_objects(&state.node.assignment())
        .await
        .context("failed to list assigned objects")?
        .into_iter()
        .map(|object| object.object_id)
        .collect();

    let removed = state
        .content
        .prune_unassigned(&assigned)
        .await
        .context("failed to prune unassigned objects")?;
    if removed > 0 {
        tracing::info!(removed, "assignment cleanup removed objects");
    }
    Ok(removed)
}

/// Run one cleanup in the background, as after an admin reassignment.
pub fn spawn_cleanup(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_cleanup(&state).await {
            tracing::warn!(error = %e, "assignment cleanup failed");
        }
    });
}

/// The periodic loops owned by a running node.
pub struct BackgroundTasks {
    cache_state: Arc<CacheStateStore>,
    tasks: Vec<PeriodicTask>,
}

impl BackgroundTasks {
    /// Start state persistence, latency probing and assignment cleanup.
    pub fn spawn(state: &AppState) -> Self {
        let config = &state.config;
        let persistence = state
            .cache_state
            .spawn_persistence(config.state.save_interval());

        let prober = Arc::new(LatencyProber::new(
            state.fetcher.client().clone(),
            state.cache_state.clone(),
            config.origin.probe_concurrency,
        ));
        let catalog = state.catalog.clone();
        let node = state.node.clone();
        let latency = prober.spawn(config.origin.latency_probe_interval(), move || {
            let catalog = catalog.clone();
            let assignment = node.assignment();
            async move {
                catalog
                    .known_origins(&assignment)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "failed to list origins for latency probe");
                        Vec::new()
                    })
            }
        });

        let cleanup_state = state.clone();
        let cleanup = PeriodicTask::spawn(
            "assignment-cleanup",
            config.storage.cleanup_interval(),
            move || {
                let state = cleanup_state.clone();
                async move {
                    if let Err(e) = run_cleanup(&state).await {
                        tracing::warn!(error = %e, "assignment cleanup failed");
                    }
                }
            },
        );

        Self {
            cache_state: state.cache_state.clone(),
            tasks: vec![persistence, latency, cleanup],
        }
    }

    /// Stop every loop, then persist cache state one last time.
    pub async fn shutdown(self) {
        for task in self.tasks {
            let name = task.name();
            task.shutdown().await;
            tracing::debug!(task = name, "background task stopped");
        }
        if let Err(e) = self.cache_state.persist().await {
            tracing::error!(error = %e, "final cache state persist failed");
        }
    }
}
