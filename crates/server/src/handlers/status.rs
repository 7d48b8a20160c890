//! Node status, bucket assignment and health endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use depot_core::Assignment;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /api/v1/health
///
/// Unauthenticated and served even while the public API is stopped, so
/// load balancers can tell a stopped node from a dead one.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Node status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub id: String,
    pub objects_in_cache: usize,
    pub storage_limit: u64,
    pub storage_used: u64,
    /// Seconds since the process started.
    pub uptime: u64,
    pub downloads_in_progress: usize,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        id: state.node.node_id().to_string(),
        objects_in_cache: state.cache_state.entry_count(),
        storage_limit: state.content.budget(),
        storage_used: state.content.used_space(),
        uptime: state.node.uptime().as_secs(),
        downloads_in_progress: state.cache_state.pending_count(),
    }))
}

/// Buckets distributed by this node.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BucketsResponse {
    #[serde(rename_all = "camelCase")]
    Explicit { bucket_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Worker { all_by_worker_id: u64 },
}

/// GET /api/v1/buckets
pub async fn get_buckets(State(state): State<AppState>) -> ApiResult<Json<BucketsResponse>> {
    let response = match state.node.assignment() {
        Assignment::Buckets(bucket_ids) => BucketsResponse::Explicit {
            bucket_ids: bucket_ids.into_iter().collect(),
        },
        Assignment::Worker(worker_id) => BucketsResponse::Worker {
            all_by_worker_id: worker_id,
        },
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_response_shapes() {
        let explicit = BucketsResponse::Explicit {
            bucket_ids: vec!["1:0".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&explicit).unwrap(),
            serde_json::json!({ "bucketIds": ["1:0"] })
        );
        let worker = BucketsResponse::Worker {
            all_by_worker_id: 4,
        };
        assert_eq!(
            serde_json::to_value(&worker).unwrap(),
            serde_json::json!({ "allByWorkerId": 4 })
        );
    }
}
