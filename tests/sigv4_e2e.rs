//! SigV4 end-to-end: signed requests, tampering, clock skew, and
//! presigned URLs against the full router with authentication enabled.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use common::*;

use bleepstore::auth;

const HOST: &str = "localhost:9012";
const REGION: &str = "us-east-1";
const UNSIGNED: &str = "UNSIGNED-PAYLOAD";

/// Build a header-signed request the way an SDK would: canonical request,
/// string-to-sign, HMAC chain, Authorization header.
fn signed_request(
    method: &str,
    path: &str,
    query: &str,
    body: Vec<u8>,
    timestamp: chrono::DateTime<Utc>,
) -> Request<Body> {
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = &amz_date[..8];

    let signing_headers = vec![
        ("host".to_string(), HOST.to_string()),
        ("x-amz-content-sha256".to_string(), UNSIGNED.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    let signed_names = "host;x-amz-content-sha256;x-amz-date";

    let canonical =
        auth::canonical_request(method, path, query, &signing_headers, signed_names, UNSIGNED);
    let scope = format!("{date_stamp}/{REGION}/s3/aws4_request");
    let sts = auth::string_to_sign(&amz_date, &scope, &canonical);
    let key = auth::derive_signing_key(SECRET_KEY, date_stamp, REGION, "s3");
    let signature = auth::sign(&key, &sts);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={ACCESS_KEY}/{scope}, SignedHeaders={signed_names}, Signature={signature}"
    );

    let uri = if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    };
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", HOST)
        .header("x-amz-content-sha256", UNSIGNED)
        .header("x-amz-date", amz_date)
        .header("authorization", authorization)
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap()
}

/// Build a presigned GET URL for `path`, dated `timestamp`, valid for
/// `expires` seconds.
fn presigned_uri(path: &str, timestamp: chrono::DateTime<Utc>, expires: u64) -> String {
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = &amz_date[..8];
    let credential = format!("{ACCESS_KEY}/{date_stamp}/{REGION}/s3/aws4_request");

    let query = format!(
        "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential={}&X-Amz-Date={amz_date}&X-Amz-Expires={expires}&X-Amz-SignedHeaders=host",
        auth::uri_encode(&credential, false)
    );

    let signing_headers = vec![("host".to_string(), HOST.to_string())];
    let canonical =
        auth::canonical_request("GET", path, &query, &signing_headers, "host", UNSIGNED);
    let scope = format!("{date_stamp}/{REGION}/s3/aws4_request");
    let sts = auth::string_to_sign(&amz_date, &scope, &canonical);
    let key = auth::derive_signing_key(SECRET_KEY, date_stamp, REGION, "s3");
    let signature = auth::sign(&key, &sts);

    format!("{path}?{query}&X-Amz-Signature={signature}")
}

async fn seed_object(app: &axum::Router) {
    let resp = send(app, signed_request("PUT", "/b1", "", Vec::new(), Utc::now())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(
        app,
        signed_request(
            "PUT",
            "/b1/hello.txt",
            "",
            b"Hello, World!".to_vec(),
            Utc::now(),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn signed_put_and_get_round_trip() {
    let (app, _tmp) = test_app(true);
    seed_object(&app).await;

    let resp = send(
        &app,
        signed_request("GET", "/b1/hello.txt", "", Vec::new(), Utc::now()),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"Hello, World!");
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let (app, _tmp) = test_app(true);
    seed_object(&app).await;

    let mut req = signed_request("GET", "/b1/hello.txt", "", Vec::new(), Utc::now());
    // Replace the signature with zeros, leaving everything else intact.
    let original = req
        .headers()
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let tampered = format!(
        "{}Signature={}",
        original.split("Signature=").next().unwrap(),
        "0".repeat(64)
    );
    req.headers_mut()
        .insert("authorization", tampered.parse().unwrap());

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>SignatureDoesNotMatch</Code>"));
}

#[tokio::test]
async fn mutated_canonical_request_is_rejected() {
    let (app, _tmp) = test_app(true);
    seed_object(&app).await;

    // Sign for one key, request another: the canonical request changes,
    // so the old signature cannot match.
    let signed = signed_request("GET", "/b1/hello.txt", "", Vec::new(), Utc::now());
    let authorization = signed
        .headers()
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let amz_date = signed
        .headers()
        .get("x-amz-date")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let req = Request::builder()
        .method("GET")
        .uri("/b1/other.txt")
        .header("host", HOST)
        .header("x-amz-content-sha256", UNSIGNED)
        .header("x-amz-date", amz_date)
        .header("authorization", authorization)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>SignatureDoesNotMatch</Code>"));
}

#[tokio::test]
async fn unknown_access_key_is_rejected() {
    let (app, _tmp) = test_app(true);

    let mut req = signed_request("GET", "/", "", Vec::new(), Utc::now());
    let authorization = req
        .headers()
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .replace(ACCESS_KEY, "AKIDOESNOTEXIST");
    req.headers_mut()
        .insert("authorization", authorization.parse().unwrap());

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>InvalidAccessKeyId</Code>"));
}

#[tokio::test]
async fn skewed_clock_is_rejected() {
    let (app, _tmp) = test_app(true);

    let stale = Utc::now() - Duration::minutes(20);
    let resp = send(&app, signed_request("GET", "/", "", Vec::new(), stale)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>RequestTimeTooSkewed</Code>"));
}

#[tokio::test]
async fn anonymous_request_is_denied() {
    let (app, _tmp) = test_app(true);
    let resp = send(&app, request("GET", "/")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>AccessDenied</Code>"));
}

#[tokio::test]
async fn health_endpoints_skip_auth() {
    let (app, _tmp) = test_app(true);
    let resp = send(&app, request("GET", "/healthz")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&app, request("GET", "/health")).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn presigned_get_works_until_it_expires() {
    let (app, _tmp) = test_app(true);
    seed_object(&app).await;

    let uri = presigned_uri("/b1/hello.txt", Utc::now(), 300);
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", HOST)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"Hello, World!");
}

#[tokio::test]
async fn expired_presigned_url_is_denied() {
    let (app, _tmp) = test_app(true);
    seed_object(&app).await;

    // Signed ten seconds ago with a one-second lifetime.
    let uri = presigned_uri("/b1/hello.txt", Utc::now() - Duration::seconds(10), 1);
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", HOST)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>AccessDenied</Code>"));
    assert!(xml.contains("<Message>Request has expired.</Message>"));
}

#[tokio::test]
async fn presigned_missing_parameter_is_400() {
    let (app, _tmp) = test_app(true);

    // No X-Amz-Expires.
    let uri = "/b1/hello.txt?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=bleepstore%2F20260222%2Fus-east-1%2Fs3%2Faws4_request&X-Amz-Date=20260222T120000Z&X-Amz-SignedHeaders=host&X-Amz-Signature=00";
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", HOST)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>AuthorizationQueryParametersError</Code>"));
}

#[tokio::test]
async fn tampered_presigned_signature_is_rejected() {
    let (app, _tmp) = test_app(true);
    seed_object(&app).await;

    let uri = presigned_uri("/b1/hello.txt", Utc::now(), 300);
    let tampered = format!(
        "{}{}",
        uri.split("X-Amz-Signature=").next().unwrap(),
        format!("X-Amz-Signature={}", "0".repeat(64))
    );
    let req = Request::builder()
        .method("GET")
        .uri(tampered)
        .header("host", HOST)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>SignatureDoesNotMatch</Code>"));
}
