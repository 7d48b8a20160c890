//! HTTP API tests for locally cached objects, node status and admin actions.

mod common;

use axum::http::StatusCode;
use common::*;
use depot_core::ObjectId;
use std::time::Duration;

fn id(s: &str) -> ObjectId {
    ObjectId::new(s).unwrap()
}

/// A node with `obj-1` (100 bytes) already on disk.
async fn server_with_cached_object() -> (TestServer, bytes::Bytes) {
    let data = seeded_bytes(1, 100);
    let document = catalog(&[], &[CatalogObject::new("obj-1", &data)]);
    let server = TestServer::with_objects(document, &[("obj-1", &data)]).await;
    (server, data)
}

#[tokio::test]
async fn hit_serves_full_object() {
    let (server, data) = server_with_cached_object().await;

    let response = server.get("/api/v1/assets/obj-1", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), "hit");
    assert_eq!(header(&response, "x-data-source"), "local");
    assert_eq!(header(&response, "cache-control"), "max-age=31536000");
    assert_eq!(header(&response, "accept-ranges"), "bytes");
    assert_eq!(header(&response, "content-length"), "100");
    assert_eq!(header(&response, "content-type"), "application/octet-stream");
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn hit_serves_requested_range() {
    let (server, data) = server_with_cached_object().await;

    let response = server
        .get("/api/v1/assets/obj-1", &[("range", "bytes=10-19")])
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), "bytes 10-19/100");
    assert_eq!(header(&response, "content-length"), "10");
    assert_eq!(body_bytes(response).await, data.slice(10..20));

    let response = server
        .get("/api/v1/assets/obj-1", &[("range", "bytes=-5")])
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), "bytes 95-99/100");
    assert_eq!(body_bytes(response).await, data.slice(95..));
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let (server, _) = server_with_cached_object().await;

    let response = server
        .get("/api/v1/assets/obj-1", &[("range", "bytes=100-")])
        .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header(&response, "content-range"), "bytes */100");
    let body = body_json(response).await;
    assert_eq!(body["type"], "range_not_satisfiable");
}

#[tokio::test]
async fn malformed_range_serves_full_object() {
    let (server, data) = server_with_cached_object().await;

    for range in ["bytes=0-1,5-6", "lines=1-2", "bytes=z-"] {
        let response = server.get("/api/v1/assets/obj-1", &[("range", range)]).await;
        assert_eq!(response.status(), StatusCode::OK, "range {range}");
        assert_eq!(body_bytes(response).await, data);
    }
}

#[tokio::test]
async fn head_returns_headers_only() {
    let (server, _) = server_with_cached_object().await;

    let response = server.head("/api/v1/assets/obj-1", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), "hit");
    assert_eq!(header(&response, "content-length"), "100");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn head_on_uncached_object_does_not_fetch() {
    let document = catalog(
        &["http://127.0.0.1:9".to_string()],
        &[CatalogObject::new("obj-1", &seeded_bytes(1, 64))],
    );
    let server = TestServer::new(document).await;

    let response = server.head("/api/v1/assets/obj-1", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), "miss");
    assert_eq!(header(&response, "content-length"), "64");
    assert_eq!(server.state.cache_state.pending_count(), 0);
    assert!(!server.state.content.exists(&id("obj-1")).await.unwrap());
}

#[tokio::test]
async fn unknown_and_invalid_ids_are_404() {
    let (server, _) = server_with_cached_object().await;

    let response = server.get("/api/v1/assets/missing", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["type"], "not_found");

    let response = server.get("/api/v1/assets/bad.id", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unassigned_object_is_421() {
    let (server, _) = server_with_cached_object().await;

    let response = server.get("/api/v1/assets/foreign-1", &[]).await;
    assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);
    assert_eq!(body_json(response).await["type"], "not_supported");
}

#[tokio::test]
async fn startup_drops_unassigned_and_mismatched_files() {
    let data = seeded_bytes(1, 100);
    let short = seeded_bytes(2, 40);
    let document = catalog(
        &[],
        &[
            CatalogObject::new("obj-1", &data),
            CatalogObject::new("obj-2", &seeded_bytes(2, 50)),
        ],
    );
    let server = TestServer::with_objects(
        document,
        &[("obj-1", &data), ("obj-2", &short), ("stray-1", b"leftover")],
    )
    .await;

    let content = &server.state.content;
    assert!(content.exists(&id("obj-1")).await.unwrap());
    assert!(!content.exists(&id("obj-2")).await.unwrap());
    assert!(!content.exists(&id("stray-1")).await.unwrap());
    assert_eq!(content.used_space(), 100);
    assert_eq!(server.state.cache_state.cached_ids(), vec![id("obj-1")]);
}

#[tokio::test]
async fn status_reports_node_state() {
    let (server, _) = server_with_cached_object().await;

    let response = server.get("/api/v1/status", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "test-node");
    assert_eq!(body["objectsInCache"], 1);
    assert_eq!(body["storageLimit"], 1024 * 1024);
    assert_eq!(body["storageUsed"], 100);
    assert_eq!(body["downloadsInProgress"], 0);
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn health_is_always_ok() {
    let (server, _) = server_with_cached_object().await;

    let response = server.get("/api/v1/health", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_exposes_counters() {
    depot_server::metrics::register_metrics();
    let (server, _) = server_with_cached_object().await;
    server.get("/api/v1/assets/obj-1", &[]).await;

    let response = server.get("/metrics", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(text.contains("depot_cache_requests_total"));
    assert!(text.contains("depot_storage_used_bytes"));
}

#[tokio::test]
async fn metrics_can_be_disabled() {
    let server = TestServer::with_config(catalog(&[], &[]), |config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let response = server.get("/metrics", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_requires_valid_token() {
    let (server, _) = server_with_cached_object().await;
    let path = "/api/v1/admin/start-api";

    let response = server.admin_post(path, None, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .admin_post(path, Some("wrong-token"), serde_json::json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server
        .admin_post(path, Some(ADMIN_TOKEN), serde_json::json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_is_disabled_without_token_hash() {
    let server = TestServer::with_config(catalog(&[], &[]), |config| {
        config.admin.token_hash = None;
    })
    .await;

    let response = server
        .admin_post("/api/v1/admin/stop-api", Some(ADMIN_TOKEN), serde_json::json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(server.state.node.public_api_enabled());
}

#[tokio::test]
async fn stop_api_blocks_public_surface_but_not_health() {
    let (server, _) = server_with_cached_object().await;

    let response = server
        .admin_post("/api/v1/admin/stop-api", Some(ADMIN_TOKEN), serde_json::json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["publicApi"], false);

    for path in ["/api/v1/assets/obj-1", "/api/v1/status", "/api/v1/buckets"] {
        let response = server.get(path, &[]).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{path}");
        assert_eq!(body_json(response).await["type"], "api_stopped");
    }
    let response = server.get("/api/v1/health", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .admin_post("/api/v1/admin/start-api", Some(ADMIN_TOKEN), serde_json::json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = server.get("/api/v1/assets/obj-1", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn shutdown_cancels_the_shutdown_token() {
    let (server, _) = server_with_cached_object().await;
    let token = server.state.node.shutdown_token();
    assert!(!token.is_cancelled());

    let response = server
        .admin_post("/api/v1/admin/shutdown", Some(ADMIN_TOKEN), serde_json::json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn buckets_reflect_worker_assignment() {
    let (server, _) = server_with_cached_object().await;

    let response = server.get("/api/v1/buckets", &[]).await;
    assert_eq!(body_json(response).await, serde_json::json!({ "allByWorkerId": 1 }));

    let response = server
        .admin_post(
            "/api/v1/admin/set-worker",
            Some(ADMIN_TOKEN),
            serde_json::json!({ "workerId": 1 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["workerId"], 1);
}

#[tokio::test]
async fn set_worker_rejects_malformed_body() {
    let (server, _) = server_with_cached_object().await;

    let response = server
        .admin_post(
            "/api/v1/admin/set-worker",
            Some(ADMIN_TOKEN),
            serde_json::json!({ "worker": "one" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["type"], "bad_request");
}

#[tokio::test]
async fn bucket_reassignment_applies_immediately_and_cleans_up() {
    let (server, _) = server_with_cached_object().await;

    let response = server
        .admin_post(
            "/api/v1/admin/set-buckets",
            Some(ADMIN_TOKEN),
            serde_json::json!({ "buckets": ["2:0"] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server.get("/api/v1/buckets", &[]).await;
    assert_eq!(body_json(response).await, serde_json::json!({ "bucketIds": ["2:0"] }));

    let response = server.get("/api/v1/assets/obj-1", &[]).await;
    assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);

    // The spawned cleanup removes the no longer assigned object.
    let content = server.state.content.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while content.exists(&id("obj-1")).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cleanup did not remove obj-1");
    assert_eq!(content.used_space(), 0);

    // Clearing the list falls back to the worker id.
    let response = server
        .admin_post(
            "/api/v1/admin/set-buckets",
            Some(ADMIN_TOKEN),
            serde_json::json!({ "buckets": null }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = server.get("/api/v1/buckets", &[]).await;
    assert_eq!(body_json(response).await, serde_json::json!({ "allByWorkerId": 1 }));
}

#[tokio::test]
async fn trace_id_is_accepted() {
    let (server, _) = server_with_cached_object().await;

    let response = server
        .get("/api/v1/health", &[("x-trace-id", "trace-123")])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
