//! Prometheus metrics.
//!
//! Installs a process-global recorder via `metrics-exporter-prometheus`,
//! provides the RED middleware (request count, duration, per-operation
//! counters), and serves the `/metrics` exposition endpoint. Path labels
//! are normalized to route templates so bucket and key names never become
//! label cardinality.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

/// Total HTTP requests. Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "bleepstore_http_requests_total";

/// Request duration in seconds. Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "bleepstore_http_request_duration_seconds";

/// S3 operations by name. Labels: operation, status.
pub const S3_OPERATIONS_TOTAL: &str = "bleepstore_s3_operations_total";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder. Idempotent, so tests can call it freely.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install Prometheus recorder")
    })
}

/// Register metric descriptions. Call once after [`init_metrics`].
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(S3_OPERATIONS_TOTAL, "Total S3 operations by type");
}

/// RED middleware. Outermost layer; skips `/metrics` itself.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    if raw_path == "/metrics" {
        return next.run(req).await;
    }
    let query = req.uri().query().map(str::to_string);
    let path = normalize_path(&raw_path);

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method.clone(), "path" => path.clone())
        .record(elapsed);

    if let Some(operation) = map_s3_operation(&method, &path, query.as_deref()) {
        let outcome = if response.status().is_success() {
            "success"
        } else {
            "error"
        };
        counter!(S3_OPERATIONS_TOTAL, "operation" => operation, "status" => outcome.to_string())
            .increment(1);
    }

    response
}

/// Map method + route template + query to an S3 operation name; `None`
/// for infrastructure endpoints.
fn map_s3_operation(method: &str, path: &str, query: Option<&str>) -> Option<&'static str> {
    let query = query.unwrap_or("");
    match (method, path) {
        ("GET", "/") => Some("ListBuckets"),
        ("GET", "/{bucket}") => Some(if query.contains("location") {
            "GetBucketLocation"
        } else if query.contains("acl") {
            "GetBucketAcl"
        } else if query.contains("uploads") {
            "ListMultipartUploads"
        } else {
            "ListObjects"
        }),
        ("PUT", "/{bucket}") => Some(if query.contains("acl") {
            "PutBucketAcl"
        } else {
            "CreateBucket"
        }),
        ("DELETE", "/{bucket}") => Some("DeleteBucket"),
        ("HEAD", "/{bucket}") => Some("HeadBucket"),
        ("POST", "/{bucket}") => query.contains("delete").then_some("DeleteObjects"),
        ("GET", "/{bucket}/{key}") => Some(if query.contains("acl") {
            "GetObjectAcl"
        } else if query.contains("uploadId") {
            "ListParts"
        } else {
            "GetObject"
        }),
        ("PUT", "/{bucket}/{key}") => Some(if query.contains("acl") {
            "PutObjectAcl"
        } else if query.contains("partNumber") {
            "UploadPart"
        } else {
            "PutObject"
        }),
        ("DELETE", "/{bucket}/{key}") => Some(if query.contains("uploadId") {
            "AbortMultipartUpload"
        } else {
            "DeleteObject"
        }),
        ("HEAD", "/{bucket}/{key}") => Some("HeadObject"),
        ("POST", "/{bucket}/{key}") => {
            if query.contains("uploads") {
                Some("CreateMultipartUpload")
            } else if query.contains("uploadId") {
                Some("CompleteMultipartUpload")
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Collapse a concrete path to its route template.
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/healthz" | "/readyz" | "/metrics" => path.to_string(),
        _ => {
            let trimmed = path.trim_start_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else if trimmed.contains('/') {
                "/{bucket}/{key}".to_string()
            } else {
                "/{bucket}".to_string()
            }
        }
    }
}

/// `GET /metrics` — Prometheus exposition format.
pub async fn metrics_handler() -> impl IntoResponse {
    let handle = init_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        handle.render(),
    )
}
