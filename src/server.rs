//! Axum router construction and S3 route dispatch.
//!
//! S3 tells operations apart by query parameters, not just method+path:
//! `GET /{bucket}` may be ListObjectsV1/V2, GetBucketLocation,
//! GetBucketAcl, or ListMultipartUploads. Each method+path pair gets one
//! handler that dispatches on the parsed query.
//!
//! Layer order (inner to outer): SigV4 auth, common S3 response headers,
//! then metrics so the full request lifecycle is measured.

use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, head, post, put},
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::auth;
use crate::errors::S3Error;
use crate::handlers;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::util;
use crate::AppState;

/// Build the router with every S3 route plus the infrastructure
/// endpoints, ready for `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;
    let health_check_enabled = state.config.observability.health_check;

    let mut routes = Router::new().route("/health", get(health_check));

    if metrics_enabled {
        routes = routes.route("/metrics", get(metrics_handler));
    }
    if health_check_enabled {
        routes = routes
            .route("/healthz", get(|| async { StatusCode::OK }))
            .route("/readyz", get(readyz));
    }

    routes = routes
        // Service level.
        .route("/", get(handle_get_service))
        // Bucket level.
        .route("/:bucket", get(handle_get_bucket))
        .route("/:bucket", put(handle_put_bucket))
        .route("/:bucket", delete(handle_delete_bucket))
        .route("/:bucket", head(handle_head_bucket))
        .route("/:bucket", post(handle_post_bucket))
        // Object level; the wildcard captures keys containing slashes.
        .route("/:bucket/*key", get(handle_get_object))
        .route("/:bucket/*key", put(handle_put_object))
        .route("/:bucket/*key", delete(handle_delete_object))
        .route("/:bucket/*key", head(handle_head_object))
        .route("/:bucket/*key", post(handle_post_object));

    let mut router = routes
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    if metrics_enabled {
        router = router.layer(middleware::from_fn(metrics_middleware));
    }

    // S3 objects are far larger than axum's default 2 MB cap.
    router.layer(DefaultBodyLimit::disable())
}

// -- Common headers ----------------------------------------------------------

/// Stamp the headers every S3 response carries: `x-amz-request-id`
/// (16 upper hex), `x-amz-id-2` (opaque, 40 chars), `Date`, `Server`.
async fn common_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-amz-request-id") {
        headers.insert(
            "x-amz-request-id",
            HeaderValue::from_str(&util::request_id()).unwrap(),
        );
    }
    if !headers.contains_key("x-amz-id-2") {
        headers.insert(
            "x-amz-id-2",
            HeaderValue::from_str(&util::extended_request_id()).unwrap(),
        );
    }
    headers.insert(
        "date",
        HeaderValue::from_str(&httpdate::fmt_http_date(std::time::SystemTime::now())).unwrap(),
    );
    headers.insert("server", HeaderValue::from_static("BleepStore"));
    response
}

// -- Authentication ----------------------------------------------------------

/// Paths exempt from SigV4.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/healthz", "/readyz", "/metrics"];

/// SigV4 verification middleware. With `auth.enabled: false` every
/// request proceeds as the configured default owner.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, S3Error> {
    let path = req.uri().path().to_string();
    if AUTH_SKIP_PATHS.contains(&path.as_str()) {
        return Ok(next.run(req).await);
    }
    if !state.config.auth.enabled {
        return Ok(next.run(req).await);
    }

    let authorization = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let query_string = req.uri().query().unwrap_or("").to_string();

    match auth::detect_auth_mode(authorization.as_deref(), &query_string)? {
        auth::AuthMode::Anonymous => Err(S3Error::AccessDenied {
            message: "Access Denied".to_string(),
        }),
        auth::AuthMode::Header(parsed) => {
            let credential = lookup_credential(&state, &parsed.access_key_id).await?;

            // Reject far-skewed clocks before doing any signature work.
            let amz_date = req
                .headers()
                .get("x-amz-date")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            if !amz_date.is_empty() {
                if !auth::within_clock_skew(&amz_date) {
                    warn!(access_key = %parsed.access_key_id, %amz_date, "request time skewed");
                    return Err(S3Error::RequestTimeTooSkewed);
                }
                if amz_date.len() >= 8 && parsed.date_stamp != amz_date[..8] {
                    return Err(S3Error::AccessDenied {
                        message: "Credential scope date does not match x-amz-date".to_string(),
                    });
                }
            }

            // The declared payload hash drives the canonical request; an
            // absent header means the client signed SHA-256 of the body.
            let declared = req
                .headers()
                .get("x-amz-content-sha256")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let payload_hash = match declared {
                Some(value) => value,
                None => {
                    let (parts, body) = req.into_parts();
                    let bytes = axum::body::to_bytes(body, usize::MAX)
                        .await
                        .map_err(|e| S3Error::InternalError(anyhow::anyhow!("read body: {e}")))?;
                    let hash = auth::resolve_payload_hash(None, Some(&bytes));
                    req = Request::from_parts(parts, axum::body::Body::from(bytes));
                    hash
                }
            };

            let headers = auth::signing_headers(req.headers());
            let canonical = auth::canonical_request(
                req.method().as_str(),
                req.uri().path(),
                &query_string,
                &headers,
                &parsed.signed_headers,
                &payload_hash,
            );
            let timestamp = auth::find_header(&headers, "x-amz-date")
                .or_else(|| auth::find_header(&headers, "date"))
                .unwrap_or_default();
            let string_to_sign =
                auth::string_to_sign(timestamp, &parsed.credential_scope, &canonical);

            let key = state.auth_cache.signing_key(
                &parsed.access_key_id,
                &credential.secret_key,
                &parsed.date_stamp,
                &parsed.region,
                &parsed.service,
            );
            let computed = auth::sign(&key, &string_to_sign);
            if !auth::signatures_match(&computed, &parsed.signature) {
                debug!(access_key = %parsed.access_key_id, "signature mismatch");
                return Err(S3Error::SignatureDoesNotMatch);
            }
            Ok(next.run(req).await)
        }
        auth::AuthMode::Presigned(parsed) => {
            let credential = lookup_credential(&state, &parsed.access_key_id).await?;

            if !auth::presigned_still_valid(&parsed.amz_date, parsed.expires) {
                return Err(S3Error::AccessDenied {
                    message: "Request has expired.".to_string(),
                });
            }

            let headers = auth::signing_headers(req.headers());
            let canonical = auth::canonical_request(
                req.method().as_str(),
                req.uri().path(),
                &query_string,
                &headers,
                &parsed.signed_headers,
                "UNSIGNED-PAYLOAD",
            );
            let string_to_sign =
                auth::string_to_sign(&parsed.amz_date, &parsed.credential_scope, &canonical);

            let key = state.auth_cache.signing_key(
                &parsed.access_key_id,
                &credential.secret_key,
                &parsed.date_stamp,
                &parsed.region,
                &parsed.service,
            );
            let computed = auth::sign(&key, &string_to_sign);
            if !auth::signatures_match(&computed, &parsed.signature) {
                debug!(access_key = %parsed.access_key_id, "presigned signature mismatch");
                return Err(S3Error::SignatureDoesNotMatch);
            }
            Ok(next.run(req).await)
        }
    }
}

/// Cache-first credential lookup.
async fn lookup_credential(
    state: &Arc<AppState>,
    access_key_id: &str,
) -> Result<crate::metadata::store::CredentialRecord, S3Error> {
    if let Some(cached) = state.auth_cache.credential(access_key_id) {
        return Ok(cached);
    }
    match state.metadata.get_credential(access_key_id).await? {
        Some(record) => {
            state.auth_cache.remember_credential(record.clone());
            Ok(record)
        }
        None => {
            debug!(access_key = %access_key_id, "unknown access key");
            Err(S3Error::InvalidAccessKeyId)
        }
    }
}

// -- Health ------------------------------------------------------------------

/// `GET /health` — deep JSON health check of both engines (when
/// `observability.health_check` is on), static `{"status":"ok"}` otherwise.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.config.observability.health_check {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"})));
    }

    let started = Instant::now();
    let metadata_ok = state.metadata.list_buckets().await.is_ok();
    let metadata_ms = started.elapsed().as_millis() as u64;

    let started = Instant::now();
    let storage_ok = state.storage.exists("__health__", "probe").await.is_ok();
    let storage_ms = started.elapsed().as_millis() as u64;

    let healthy = metadata_ok && storage_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let component = |ok: bool, ms: u64| {
        serde_json::json!({"status": if ok { "ok" } else { "error" }, "latency_ms": ms})
    };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "checks": {
                "metadata": component(metadata_ok, metadata_ms),
                "storage": component(storage_ok, storage_ms),
            }
        })),
    )
}

/// `GET /readyz` — readiness probe, body-less.
async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    let metadata_ok = state.metadata.list_buckets().await.is_ok();
    let storage_ok = state.storage.exists("__health__", "probe").await.is_ok();
    if metadata_ok && storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// -- Query parsing -----------------------------------------------------------

/// Decode the raw query string into a map. Parameters without values
/// (`?acl`, `?uploads`) map to empty strings.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(query) = raw else { return map };
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        map.insert(
            percent_encoding::percent_decode_str(k)
                .decode_utf8_lossy()
                .into_owned(),
            percent_encoding::percent_decode_str(v)
                .decode_utf8_lossy()
                .into_owned(),
        );
    }
    map
}

// -- Dispatch ----------------------------------------------------------------

/// `GET /` — ListBuckets.
async fn handle_get_service(State(state): State<Arc<AppState>>) -> Result<Response, S3Error> {
    handlers::bucket::list_buckets(state).await
}

/// `GET /{bucket}` — ?location, ?acl, ?uploads, ?list-type=2, or
/// ListObjectsV1.
async fn handle_get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("location") {
        handlers::bucket::get_bucket_location(state, &bucket).await
    } else if query.contains_key("acl") {
        handlers::bucket::get_bucket_acl(state, &bucket).await
    } else if query.contains_key("uploads") {
        handlers::multipart::list_multipart_uploads(state, &bucket, &query).await
    } else if query.get("list-type").is_some_and(|v| v == "2") {
        handlers::object::list_objects_v2(state, &bucket, &query).await
    } else {
        handlers::object::list_objects_v1(state, &bucket, &query).await
    }
}

/// `PUT /{bucket}` — ?acl or CreateBucket.
async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("acl") {
        handlers::bucket::put_bucket_acl(state, &bucket, &headers, &body).await
    } else {
        handlers::bucket::create_bucket(state, &bucket, &headers, &body).await
    }
}

/// `DELETE /{bucket}` — DeleteBucket.
async fn handle_delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    handlers::bucket::delete_bucket(state, &bucket).await
}

/// `HEAD /{bucket}` — HeadBucket.
async fn handle_head_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    handlers::bucket::head_bucket(state, &bucket).await
}

/// `POST /{bucket}` — ?delete (bulk DeleteObjects) only.
async fn handle_post_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("delete") {
        handlers::object::delete_objects(state, &bucket, &headers, &body).await
    } else {
        Err(S3Error::MethodNotAllowed)
    }
}

/// `GET /{bucket}/{key}` — ?acl, ?uploadId (ListParts), or GetObject.
async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("acl") {
        handlers::object::get_object_acl(state, &bucket, &key).await
    } else if query.contains_key("uploadId") {
        handlers::multipart::list_parts(state, &bucket, &key, &query).await
    } else {
        handlers::object::get_object(state, &bucket, &key, &headers).await
    }
}

/// `PUT /{bucket}/{key}` — ?acl, UploadPart[Copy], CopyObject, or
/// PutObject. The body stays streaming for the data paths.
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    request: Request,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    let headers = request.headers().clone();
    let body = request.into_body();

    if query.contains_key("acl") {
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| S3Error::InternalError(anyhow::anyhow!("read body: {e}")))?;
        handlers::object::put_object_acl(state, &bucket, &key, &headers, &bytes).await
    } else if query.contains_key("partNumber") && query.contains_key("uploadId") {
        if headers.contains_key("x-amz-copy-source") {
            handlers::multipart::upload_part_copy(state, &bucket, &key, &query, &headers).await
        } else {
            handlers::multipart::upload_part(state, &bucket, &key, &query, &headers, body).await
        }
    } else if headers.contains_key("x-amz-copy-source") {
        handlers::object::copy_object(state, &bucket, &key, &headers).await
    } else {
        handlers::object::put_object(state, &bucket, &key, &headers, body).await
    }
}

/// `DELETE /{bucket}/{key}` — ?uploadId (Abort) or DeleteObject.
async fn handle_delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("uploadId") {
        handlers::multipart::abort_multipart_upload(state, &bucket, &key, &query).await
    } else {
        handlers::object::delete_object(state, &bucket, &key).await
    }
}

/// `HEAD /{bucket}/{key}` — HeadObject.
async fn handle_head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    handlers::object::head_object(state, &bucket, &key, &headers).await
}

/// `POST /{bucket}/{key}` — ?uploads (Create) or ?uploadId (Complete).
async fn handle_post_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("uploads") {
        handlers::multipart::create_multipart_upload(state, &bucket, &key, &headers).await
    } else if query.contains_key("uploadId") {
        handlers::multipart::complete_multipart_upload(state, &bucket, &key, &query, &body).await
    } else {
        Err(S3Error::MethodNotAllowed)
    }
}

// -- Tests -------------------------------------------------------------------
