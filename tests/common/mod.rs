//! Shared harness for the end-to-end tests: an in-process router over the
//! memory metadata engine and a temp-dir local storage backend.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bleepstore::auth::AuthCache;
use bleepstore::config::Config;
use bleepstore::metadata::memory::MemoryMetadataStore;
use bleepstore::storage::local::LocalBackend;
use bleepstore::AppState;
use tower::ServiceExt;

pub const ACCESS_KEY: &str = "bleepstore";
pub const SECRET_KEY: &str = "bleepstore-secret";

/// Build a router. `auth` toggles SigV4 enforcement; the default
/// credential is always seeded.
pub fn test_app(auth: bool) -> (Router, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");

    let metadata = MemoryMetadataStore::new();
    metadata
        .seed_credential(ACCESS_KEY, SECRET_KEY)
        .expect("seed credential");
    let storage = LocalBackend::new(tmp.path()).expect("local backend");

    let mut config = Config::default();
    config.auth.enabled = auth;
    config.observability.metrics = false;
    config.observability.health_check = true;

    let state = Arc::new(AppState {
        config,
        metadata: Arc::new(metadata),
        storage: Arc::new(storage),
        auth_cache: AuthCache::new(),
    });

    (bleepstore::server::app(state), tmp)
}

/// Fire one request at a clone of the router.
pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("infallible service")
}

/// Drain a response body.
pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("collect body")
        .to_vec()
}

/// Drain a response body as UTF-8.
pub async fn body_string(resp: Response<Body>) -> String {
    String::from_utf8(body_bytes(resp).await).expect("utf-8 body")
}

/// A PUT with a byte body and the Content-Length S3 requires.
pub fn put_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-length", body.len())
        .body(Body::from(body))
        .expect("request")
}

/// An empty-bodied request of the given method.
pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

/// Create a bucket and assert success.
pub async fn create_bucket(app: &Router, bucket: &str) {
    let resp = send(app, put_request(&format!("/{bucket}"), Vec::new())).await;
    assert!(
        resp.status().is_success(),
        "create bucket {bucket}: {}",
        resp.status()
    );
}
