//! Route configuration.

use crate::auth::{admin_auth, public_api_gate, trace_id_middleware};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Switched off by the stop-api admin action.
    let public_routes = Router::new()
        .route(
            "/api/v1/assets/{object_id}",
            get(handlers::get_asset).head(handlers::head_asset),
        )
        .route("/api/v1/status", get(handlers::get_status))
        .route("/api/v1/buckets", get(handlers::get_buckets))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            public_api_gate,
        ));

    let admin_routes = Router::new()
        .route("/api/v1/admin/stop-api", post(handlers::stop_api))
        .route("/api/v1/admin/start-api", post(handlers::start_api))
        .route("/api/v1/admin/shutdown", post(handlers::shutdown))
        .route("/api/v1/admin/set-worker", post(handlers::set_worker))
        .route("/api/v1/admin/set-buckets", post(handlers::set_buckets))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    // Health check stays reachable while the public API is stopped.
    let mut router = Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .route("/api/v1/health", get(handlers::health_check));

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> trace id -> route layers -> Handler
    router
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
