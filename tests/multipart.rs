//! End-to-end multipart upload flows.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;

const MIB: usize = 1024 * 1024;

/// Initiate an upload and return its id.
async fn initiate(app: &axum::Router, bucket: &str, key: &str) -> String {
    let resp = send(app, request("POST", &format!("/{bucket}/{key}?uploads"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let xml = body_string(resp).await;
    xml.split("<UploadId>")
        .nth(1)
        .and_then(|s| s.split("</UploadId>").next())
        .expect("UploadId in response")
        .to_string()
}

/// Upload one part and return its ETag.
async fn upload_part(
    app: &axum::Router,
    bucket: &str,
    key: &str,
    upload_id: &str,
    number: u32,
    body: Vec<u8>,
) -> String {
    let uri = format!("/{bucket}/{key}?partNumber={number}&uploadId={upload_id}");
    let resp = send(app, put_request(&uri, body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    resp.headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn complete_body(parts: &[(u32, &str)]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>{etag}</ETag></Part>"
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

async fn complete(
    app: &axum::Router,
    bucket: &str,
    key: &str,
    upload_id: &str,
    parts: &[(u32, &str)],
) -> axum::http::Response<Body> {
    let body = complete_body(parts);
    let req = Request::builder()
        .method("POST")
        .uri(format!("/{bucket}/{key}?uploadId={upload_id}"))
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap();
    send(app, req).await
}

#[tokio::test]
async fn multipart_composite_round_trip() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;

    let upload_id = initiate(&app, "b1", "big").await;
    let part1 = vec![0x41u8; 5 * MIB];
    let part2 = vec![0x42u8; 1024];
    let etag1 = upload_part(&app, "b1", "big", &upload_id, 1, part1.clone()).await;
    let etag2 = upload_part(&app, "b1", "big", &upload_id, 2, part2.clone()).await;

    let resp = complete(&app, "b1", "big", &upload_id, &[(1, &etag1), (2, &etag2)]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let xml = body_string(resp).await;
    let etag = xml
        .split("<ETag>")
        .nth(1)
        .and_then(|s| s.split("</ETag>").next())
        .unwrap()
        .to_string();

    // Composite shape: quoted 32-hex digest, dash, part count.
    let inner = etag.trim_matches('"');
    let (digest, count) = inner.rsplit_once('-').unwrap();
    assert_eq!(digest.len(), 32);
    assert_eq!(count, "2");

    // GET returns the exact concatenation with the composite ETag.
    let resp = send(&app, request("GET", "/b1/big")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("etag").unwrap().to_str().unwrap(),
        etag
    );
    let body = body_bytes(resp).await;
    assert_eq!(body.len(), 5 * MIB + 1024);
    assert_eq!(&body[..5 * MIB], &part1[..]);
    assert_eq!(&body[5 * MIB..], &part2[..]);

    // The upload is gone after completion.
    let resp = send(
        &app,
        request("GET", &format!("/b1/big?uploadId={upload_id}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn complete_rejects_out_of_order_parts() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "k").await;
    let etag1 = upload_part(&app, "b1", "k", &upload_id, 1, vec![0x41; 5 * MIB]).await;
    let etag2 = upload_part(&app, "b1", "k", &upload_id, 2, vec![0x42; 1024]).await;

    let resp = complete(&app, "b1", "k", &upload_id, &[(2, &etag2), (1, &etag1)]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>InvalidPartOrder</Code>"));
}

#[tokio::test]
async fn complete_rejects_etag_mismatch() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "k").await;
    upload_part(&app, "b1", "k", &upload_id, 1, vec![0x41; 1024]).await;

    let resp = complete(
        &app,
        "b1",
        "k",
        &upload_id,
        &[(1, "\"00000000000000000000000000000000\"")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>InvalidPart</Code>"));
}

#[tokio::test]
async fn complete_rejects_small_non_final_part() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "k").await;
    // First part under 5 MiB, second after it: EntityTooSmall.
    let etag1 = upload_part(&app, "b1", "k", &upload_id, 1, vec![0x41; 1024]).await;
    let etag2 = upload_part(&app, "b1", "k", &upload_id, 2, vec![0x42; 1024]).await;

    let resp = complete(&app, "b1", "k", &upload_id, &[(1, &etag1), (2, &etag2)]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>EntityTooSmall</Code>"));
}

#[tokio::test]
async fn single_small_part_is_allowed() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "small").await;
    let etag1 = upload_part(&app, "b1", "small", &upload_id, 1, b"tiny".to_vec()).await;

    let resp = complete(&app, "b1", "small", &upload_id, &[(1, &etag1)]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&app, request("GET", "/b1/small")).await;
    assert_eq!(body_bytes(resp).await, b"tiny");
}

#[tokio::test]
async fn part_number_out_of_range() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "k").await;

    for bad in ["0", "10001"] {
        let uri = format!("/b1/k?partNumber={bad}&uploadId={upload_id}");
        let resp = send(&app, put_request(&uri, b"x".to_vec())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "partNumber={bad}");
    }
}

#[tokio::test]
async fn part_reupload_replaces() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "k").await;
    let first = upload_part(&app, "b1", "k", &upload_id, 1, b"v1".to_vec()).await;
    let second = upload_part(&app, "b1", "k", &upload_id, 1, b"v2".to_vec()).await;
    assert_ne!(first, second);

    let resp = complete(&app, "b1", "k", &upload_id, &[(1, &second)]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&app, request("GET", "/b1/k")).await;
    assert_eq!(body_bytes(resp).await, b"v2");
}

#[tokio::test]
async fn abort_discards_upload() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "k").await;
    upload_part(&app, "b1", "k", &upload_id, 1, b"data".to_vec()).await;

    let resp = send(
        &app,
        request("DELETE", &format!("/b1/k?uploadId={upload_id}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // The upload no longer exists.
    let resp = send(
        &app,
        request("GET", &format!("/b1/k?uploadId={upload_id}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>NoSuchUpload</Code>"));

    // And no object materialised.
    let resp = send(&app, request("GET", "/b1/k")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Bucket is deletable again.
    let resp = send(&app, request("DELETE", "/b1")).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn inflight_upload_blocks_bucket_delete() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let _upload_id = initiate(&app, "b1", "k").await;

    let resp = send(&app, request("DELETE", "/b1")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>BucketNotEmpty</Code>"));
}

#[tokio::test]
async fn list_uploads_and_parts() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let upload_id = initiate(&app, "b1", "folder/k").await;
    upload_part(&app, "b1", "folder/k", &upload_id, 1, b"one".to_vec()).await;
    upload_part(&app, "b1", "folder/k", &upload_id, 2, b"two".to_vec()).await;

    let resp = send(&app, request("GET", "/b1?uploads")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Key>folder/k</Key>"));
    assert!(xml.contains(&format!("<UploadId>{upload_id}</UploadId>")));

    let resp = send(
        &app,
        request("GET", &format!("/b1/folder/k?uploadId={upload_id}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let xml = body_string(resp).await;
    assert!(xml.contains("<PartNumber>1</PartNumber>"));
    assert!(xml.contains("<PartNumber>2</PartNumber>"));
    assert!(xml.contains("<IsTruncated>false</IsTruncated>"));
}

#[tokio::test]
async fn upload_part_copy_from_existing_object() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    send(&app, put_request("/b1/source", b"0123456789".to_vec())).await;

    let upload_id = initiate(&app, "b1", "dest").await;
    let mut req = put_request(
        &format!("/b1/dest?partNumber=1&uploadId={upload_id}"),
        Vec::new(),
    );
    req.headers_mut()
        .insert("x-amz-copy-source", "/b1/source".parse().unwrap());
    req.headers_mut()
        .insert("x-amz-copy-source-range", "bytes=2-5".parse().unwrap());
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let xml = body_string(resp).await;
    assert!(xml.contains("<CopyPartResult"));
    let etag = xml
        .split("<ETag>")
        .nth(1)
        .and_then(|s| s.split("</ETag>").next())
        .unwrap()
        .to_string();

    let resp = complete(&app, "b1", "dest", &upload_id, &[(1, &etag)]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&app, request("GET", "/b1/dest")).await;
    assert_eq!(body_bytes(resp).await, b"2345");
}

#[tokio::test]
async fn unknown_upload_id_is_404() {
    let (app, _tmp) = test_app(false);
    create_bucket(&app, "b1").await;
    let resp = send(&app, put_request("/b1/k?partNumber=1&uploadId=ghost", b"x".to_vec())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let xml = body_string(resp).await;
    assert!(xml.contains("<Code>NoSuchUpload</Code>"));
}
