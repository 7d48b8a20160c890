//! Server test utilities.

use axum::body::Body;
use axum::http::{Method, Request, Response};
use bytes::Bytes;
use depot_core::config::AppConfig;
use depot_origin::{CatalogDocument, CatalogFile};
use depot_server::{AppState, background, create_router};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server serving `document`.
    pub async fn new(document: CatalogDocument) -> Self {
        Self::build(document, &[], |_| {}).await
    }

    /// Create a test server whose data directory already holds `objects`
    /// when startup reconciliation runs.
    pub async fn with_objects(document: CatalogDocument, objects: &[(&str, &[u8])]) -> Self {
        Self::build(document, objects, |_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(document: CatalogDocument, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(document, &[], modifier).await
    }

    async fn build<F>(document: CatalogDocument, objects: &[(&str, &[u8])], modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("objects");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        for (id, data) in objects {
            std::fs::write(storage_path.join(id), data).expect("Failed to seed object");
        }

        let mut config = AppConfig::for_testing();
        config.storage.path = storage_path;
        config.state.path = temp_dir.path().join("state.json");
        config.catalog.path = temp_dir.path().join("catalog.json");
        modifier(&mut config);

        let catalog = Arc::new(CatalogFile::from_document(document));
        let state = AppState::new(config, catalog)
            .await
            .expect("Failed to create app state");
        background::prepare(&state)
            .await
            .expect("Failed to prepare state");

        let router = create_router(state.clone());

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// GET a path with optional extra headers.
    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.send(request(Method::GET, path, headers, Body::empty()))
            .await
    }

    /// HEAD a path with optional extra headers.
    pub async fn head(&self, path: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.send(request(Method::HEAD, path, headers, Body::empty()))
            .await
    }

    /// POST a JSON body to an admin endpoint with the given bearer token.
    pub async fn admin_post(
        &self,
        path: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        let auth = token.map(|t| format!("Bearer {t}"));
        let mut headers = vec![("content-type", "application/json")];
        if let Some(auth) = auth.as_deref() {
            headers.push(("authorization", auth));
        }
        self.send(request(
            Method::POST,
            path,
            &headers,
            Body::from(body.to_string()),
        ))
        .await
    }
}

/// Build a request.
#[allow(dead_code)]
pub fn request(method: Method, path: &str, headers: &[(&str, &str)], body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).expect("valid request")
}

/// Collect a response body.
#[allow(dead_code)]
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body")
}

/// Collect a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("Failed to parse JSON body")
}

/// Header value as a string, panicking when absent.
#[allow(dead_code)]
pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .expect("ascii header")
}
