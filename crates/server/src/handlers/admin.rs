//! Administrative endpoints.
//!
//! All routes here sit behind [`crate::auth::admin_auth`].

use crate::background;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, AssignmentSettings};
use axum::Json;
use axum::extract::{Request, State};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Maximum request body size for admin endpoints (1 MiB).
const MAX_ADMIN_BODY_SIZE: usize = 1024 * 1024;

/// Acknowledgement returned by every admin action.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminResponse {
    pub ok: bool,
    pub public_api: bool,
    pub worker_id: Option<u64>,
    pub buckets: Option<Vec<String>>,
}

impl AdminResponse {
    fn from_state(state: &AppState) -> Self {
        let AssignmentSettings { worker_id, buckets } = state.node.settings();
        Self {
            ok: true,
            public_api: state.node.public_api_enabled(),
            worker_id,
            buckets,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetWorkerRequest {
    pub worker_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct SetBucketsRequest {
    pub buckets: Option<Vec<String>>,
}

async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// POST /api/v1/admin/stop-api
pub async fn stop_api(State(state): State<AppState>) -> ApiResult<Json<AdminResponse>> {
    state.node.set_public_api(false);
    tracing::warn!("public API stopped by admin");
    Ok(Json(AdminResponse::from_state(&state)))
}

/// POST /api/v1/admin/start-api
pub async fn start_api(State(state): State<AppState>) -> ApiResult<Json<AdminResponse>> {
    state.node.set_public_api(true);
    tracing::info!("public API started by admin");
    Ok(Json(AdminResponse::from_state(&state)))
}

/// POST /api/v1/admin/shutdown
///
/// Responds first; the server drains in-flight requests after the token
/// is cancelled.
pub async fn shutdown(State(state): State<AppState>) -> ApiResult<Json<AdminResponse>> {
    tracing::warn!("shutdown requested by admin");
    state.node.trigger_shutdown();
    Ok(Json(AdminResponse::from_state(&state)))
}

/// POST /api/v1/admin/set-worker
pub async fn set_worker(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<AdminResponse>> {
    let body: SetWorkerRequest = read_json(req).await?;
    state.node.set_worker_id(body.worker_id);
    tracing::info!(worker_id = body.worker_id, "worker id reassigned");
    background::spawn_cleanup(state.clone());
    Ok(Json(AdminResponse::from_state(&state)))
}

/// POST /api/v1/admin/set-buckets
///
/// `null` clears the explicit list and falls back to the worker id.
pub async fn set_buckets(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<AdminResponse>> {
    let body: SetBucketsRequest = read_json(req).await?;
    if let Some(buckets) = &body.buckets
        && buckets.iter().any(|b| b.trim().is_empty())
    {
        return Err(ApiError::BadRequest("bucket ids cannot be empty".to_string()));
    }
    tracing::info!(buckets = ?body.buckets, "bucket set reassigned");
    state.node.set_buckets(body.buckets);
    background::spawn_cleanup(state.clone());
    Ok(Json(AdminResponse::from_state(&state)))
}
