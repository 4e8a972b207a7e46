//! Object-level S3 operations.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use md5::Digest;

use super::{acl, content_type_of, header_str, owner_identity, quote_etag, unquote_etag};
use crate::aws_chunked;
use crate::errors::S3Error;
use crate::metadata::store::{Acl, ObjectRecord};
use crate::storage::backend::{stream_of, ByteStream};
use crate::util::{iso8601_to_http_date, now_iso8601, parse_iso8601};
use crate::validation::{parse_max_keys, validate_bucket_name, validate_object_key};
use crate::xml;
use crate::AppState;

// -- Request body plumbing ---------------------------------------------------

/// Turn a request body into a storage [`ByteStream`], stripping aws-chunked
/// framing when the signature declared a streaming payload.
pub(crate) async fn request_body_stream(
    headers: &HeaderMap,
    body: Body,
) -> Result<ByteStream, S3Error> {
    if aws_chunked::is_aws_chunked(headers) {
        let framed = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| S3Error::InternalError(anyhow::anyhow!("read body: {e}")))?;
        let payload = aws_chunked::decode(&framed).ok_or_else(|| S3Error::InvalidArgument {
            message: "Malformed aws-chunked payload".to_string(),
        })?;
        Ok(stream_of(payload))
    } else {
        Ok(Box::pin(
            body.into_data_stream().map_err(std::io::Error::other),
        ))
    }
}

/// The payload length a PUT claims to carry: the decoded length for
/// aws-chunked bodies, the plain `Content-Length` otherwise. Absent
/// `Content-Length` is `MissingContentLength` (411).
fn declared_body_length(headers: &HeaderMap) -> Result<u64, S3Error> {
    if let Some(decoded) = aws_chunked::decoded_content_length(headers) {
        return Ok(decoded);
    }
    header_str(headers, "content-length")
        .and_then(|v| v.parse().ok())
        .ok_or(S3Error::MissingContentLength)
}

/// Decode a `Content-MD5` header into raw digest bytes. Not-base64 (or a
/// digest of the wrong width) is `InvalidDigest`; the value/content
/// comparison happens after the body has streamed through.
pub(crate) fn declared_content_md5(headers: &HeaderMap) -> Result<Option<[u8; 16]>, S3Error> {
    let Some(value) = header_str(headers, "content-md5") else {
        return Ok(None);
    };
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|_| S3Error::InvalidDigest)?;
    let digest: [u8; 16] = decoded.try_into().map_err(|_| S3Error::InvalidDigest)?;
    Ok(Some(digest))
}

// -- Range requests ----------------------------------------------------------

/// A parsed `Range: bytes=` header.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ByteRange {
    /// `bytes=a-b`, both inclusive.
    Span(u64, u64),
    /// `bytes=a-`.
    From(u64),
    /// `bytes=-n`, the last n bytes.
    Suffix(u64),
}

/// Parse a single-range `bytes=` header. Multi-range and malformed specs
/// return `None` (the header is then ignored, per RFC 9110).
fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(ByteRange::Suffix(n))
    } else if let Some(start) = spec.strip_suffix('-') {
        Some(ByteRange::From(start.parse().ok()?))
    } else {
        let (start, end) = spec.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        if start > end {
            return None;
        }
        Some(ByteRange::Span(start, end))
    }
}

/// Resolve a range against the object size to inclusive `(start, end)`.
/// `None` means unsatisfiable (416).
fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match *range {
        ByteRange::Span(start, end) => {
            (start < total).then(|| (start, end.min(total - 1)))
        }
        ByteRange::From(start) => (start < total).then(|| (start, total - 1)),
        ByteRange::Suffix(n) => Some((total.saturating_sub(n), total - 1)),
    }
}

// -- Conditional requests ----------------------------------------------------

/// Evaluate `If-Match` / `If-Unmodified-Since` / `If-None-Match` /
/// `If-Modified-Since` against the stored record, in that priority order.
/// `safe_method` selects the 304 (GET/HEAD) versus 412 behaviour of
/// `If-None-Match`.
fn evaluate_conditionals(
    headers: &HeaderMap,
    record: &ObjectRecord,
    safe_method: bool,
) -> Result<(), S3Error> {
    let stored_etag = unquote_etag(&record.etag);
    let modified_at = parse_iso8601(&record.last_modified);

    if let Some(if_match) = header_str(headers, "if-match") {
        let wanted = unquote_etag(&if_match);
        if wanted != "*" && wanted != stored_etag {
            return Err(S3Error::PreconditionFailed);
        }
    } else if let Some(if_unmodified) = header_str(headers, "if-unmodified-since") {
        if let (Some(at), Ok(threshold)) = (modified_at, httpdate::parse_http_date(&if_unmodified))
        {
            if at > threshold {
                return Err(S3Error::PreconditionFailed);
            }
        }
    }

    if let Some(if_none_match) = header_str(headers, "if-none-match") {
        let unwanted = unquote_etag(&if_none_match);
        if unwanted == "*" || unwanted == stored_etag {
            return Err(if safe_method {
                S3Error::NotModified {
                    etag: Some(record.etag.clone()),
                }
            } else {
                S3Error::PreconditionFailed
            });
        }
    } else if safe_method {
        if let Some(if_modified) = header_str(headers, "if-modified-since") {
            if let (Some(at), Ok(threshold)) = (modified_at, httpdate::parse_http_date(&if_modified))
            {
                if at <= threshold {
                    return Err(S3Error::NotModified {
                        etag: Some(record.etag.clone()),
                    });
                }
            }
        }
    }

    Ok(())
}

// -- Shared response assembly ------------------------------------------------

/// Copy the record's representation headers onto a response.
fn apply_object_headers(response: &mut Response, record: &ObjectRecord) {
    let headers = response.headers_mut();
    headers.insert(
        "content-type",
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(etag) = HeaderValue::from_str(&record.etag) {
        headers.insert("etag", etag);
    }
    if let Ok(date) = HeaderValue::from_str(&iso8601_to_http_date(&record.last_modified)) {
        headers.insert("last-modified", date);
    }
    headers.insert("accept-ranges", HeaderValue::from_static("bytes"));

    for (name, value) in [
        ("content-encoding", &record.content_encoding),
        ("content-language", &record.content_language),
        ("content-disposition", &record.content_disposition),
        ("cache-control", &record.cache_control),
        ("expires", &record.expires),
    ] {
        if let Some(value) = value {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        }
    }

    for (name, value) in &record.user_metadata {
        if let (Ok(n), Ok(v)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(n, v);
        }
    }
}

fn require_bucket(bucket: &str) -> S3Error {
    S3Error::NoSuchBucket {
        bucket: bucket.to_string(),
    }
}

fn no_such_key(key: &str) -> S3Error {
    S3Error::NoSuchKey {
        key: key.to_string(),
    }
}

// -- Handlers ----------------------------------------------------------------

/// `PUT /{bucket}/{key}` — PutObject.
///
/// Bytes go to storage first (single-pass MD5 while writing); the
/// metadata upsert follows. A metadata failure best-efforts a storage
/// delete — the object row is the system of record, so no partial object
/// is ever readable.
pub async fn put_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    validate_bucket_name(bucket)?;
    validate_object_key(key)?;

    // Resolve the ACL up front so a bad canned-ACL or mixed-header
    // request fails before any bytes move.
    let (owner_id, owner_display) = owner_identity(&state);
    let acl_json = acl::resolve_request_acl(headers, &owner_id, &owner_display)?;

    let declared_len = declared_body_length(headers)?;
    if declared_len > state.config.server.max_object_size {
        return Err(S3Error::EntityTooLarge);
    }

    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }

    let expected_md5 = declared_content_md5(headers)?;

    // Conditional create: fail before any bytes move.
    if header_str(headers, "if-none-match").as_deref() == Some("*")
        && state.metadata.object_exists(bucket, key).await?
    {
        return Err(S3Error::PreconditionFailed);
    }

    let stream = request_body_stream(headers, body).await?;
    let (md5_hex, size) = state.storage.put_stream(bucket, key, stream).await?;

    if size > state.config.server.max_object_size {
        let _ = state.storage.delete(bucket, key).await;
        return Err(S3Error::EntityTooLarge);
    }
    if let Some(expected) = expected_md5 {
        if hex::encode(expected) != md5_hex {
            let _ = state.storage.delete(bucket, key).await;
            return Err(S3Error::BadDigest);
        }
    }

    let etag = quote_etag(&md5_hex);
    let record = ObjectRecord {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size,
        etag: etag.clone(),
        content_type: content_type_of(headers),
        content_encoding: header_str(headers, "content-encoding"),
        content_language: header_str(headers, "content-language"),
        content_disposition: header_str(headers, "content-disposition"),
        cache_control: header_str(headers, "cache-control"),
        expires: header_str(headers, "expires"),
        storage_class: "STANDARD".to_string(),
        acl: acl_json,
        user_metadata: super::user_metadata_of(headers),
        last_modified: now_iso8601(),
        delete_marker: false,
    };

    if let Err(e) = state.metadata.put_object(record).await {
        let _ = state.storage.delete(bucket, key).await;
        return Err(S3Error::InternalError(e));
    }

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("etag", HeaderValue::from_str(&etag).unwrap());
    Ok(response)
}

/// `GET /{bucket}/{key}` — GetObject, streaming the body in 64 KiB
/// chunks. Honours conditional headers and single `Range` requests.
pub async fn get_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }
    let record = state
        .metadata
        .get_object(bucket, key)
        .await?
        .ok_or_else(|| no_such_key(key))?;

    evaluate_conditionals(headers, &record, true)?;

    let total = record.size;
    let range = header_str(headers, "range")
        .as_deref()
        .and_then(parse_range_header);

    let (status, offset, length, content_range) = match range {
        Some(range) => match resolve_range(&range, total) {
            Some((start, end)) => (
                StatusCode::PARTIAL_CONTENT,
                start,
                Some(end - start + 1),
                Some(format!("bytes {start}-{end}/{total}")),
            ),
            None => return Err(S3Error::InvalidRange),
        },
        // An unparseable Range header is ignored.
        None => (StatusCode::OK, 0, None, None),
    };

    let stream = state.storage.get_stream(bucket, key, offset, length).await?;

    let mut response = (status, Body::from_stream(stream)).into_response();
    apply_object_headers(&mut response, &record);
    let body_len = length.unwrap_or(total);
    response.headers_mut().insert(
        "content-length",
        HeaderValue::from_str(&body_len.to_string()).unwrap(),
    );
    if let Some(content_range) = content_range {
        response.headers_mut().insert(
            "content-range",
            HeaderValue::from_str(&content_range).unwrap(),
        );
    }
    Ok(response)
}

/// `HEAD /{bucket}/{key}` — HeadObject. Identical headers to GetObject,
/// no body; a miss is a body-less 404.
pub async fn head_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }
    let Some(record) = state.metadata.get_object(bucket, key).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    evaluate_conditionals(headers, &record, true)?;

    let mut response = StatusCode::OK.into_response();
    apply_object_headers(&mut response, &record);
    response.headers_mut().insert(
        "content-length",
        HeaderValue::from_str(&record.size.to_string()).unwrap(),
    );
    Ok(response)
}

/// `DELETE /{bucket}/{key}` — DeleteObject. Always 204; the metadata row
/// goes first (it is the system of record), bytes best-effort after.
pub async fn delete_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }

    state.metadata.delete_object(bucket, key).await?;
    if let Err(e) = state.storage.delete(bucket, key).await {
        tracing::warn!(bucket, key, error = %e, "storage delete failed after metadata delete");
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /{bucket}?delete` — DeleteObjects (bulk).
pub async fn delete_objects(
    state: Arc<AppState>,
    bucket: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }

    // The bulk-delete body is small and fully buffered; check its digest
    // directly when the client sent one.
    if let Some(expected) = declared_content_md5(headers)? {
        if expected[..] != md5::Md5::digest(body)[..] {
            return Err(S3Error::BadDigest);
        }
    }

    let (keys, quiet) = xml::parse_delete_objects(body)?;

    let mut outcomes = Vec::with_capacity(keys.len());
    for key in keys {
        let outcome = match state.metadata.delete_object(bucket, &key).await {
            Ok(()) => {
                if let Err(e) = state.storage.delete(bucket, &key).await {
                    tracing::warn!(bucket, key = %key, error = %e, "bulk delete: storage cleanup failed");
                }
                xml::DeleteOutcome { key, error: None }
            }
            Err(e) => xml::DeleteOutcome {
                key,
                error: Some(("InternalError".to_string(), e.to_string())),
            },
        };
        outcomes.push(outcome);
    }

    let body = xml::render_delete_result(&outcomes, quiet);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}/{key}` with `x-amz-copy-source` — CopyObject.
pub async fn copy_object(
    state: Arc<AppState>,
    dst_bucket: &str,
    dst_key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    validate_object_key(dst_key)?;
    if !state.metadata.bucket_exists(dst_bucket).await? {
        return Err(require_bucket(dst_bucket));
    }

    let (src_bucket, src_key) = parse_copy_source(headers)?;
    if !state.metadata.bucket_exists(&src_bucket).await? {
        return Err(require_bucket(&src_bucket));
    }
    let src_record = state
        .metadata
        .get_object(&src_bucket, &src_key)
        .await?
        .ok_or_else(|| no_such_key(&src_key))?;

    let md5_hex = state
        .storage
        .copy_object(&src_bucket, &src_key, dst_bucket, dst_key)
        .await?;
    let etag = quote_etag(&md5_hex);
    let now = now_iso8601();

    let replace = header_str(headers, "x-amz-metadata-directive")
        .map(|d| d.eq_ignore_ascii_case("REPLACE"))
        .unwrap_or(false);

    let record = if replace {
        let (owner_id, owner_display) = owner_identity(&state);
        ObjectRecord {
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            size: src_record.size,
            etag: etag.clone(),
            content_type: content_type_of(headers),
            content_encoding: header_str(headers, "content-encoding"),
            content_language: header_str(headers, "content-language"),
            content_disposition: header_str(headers, "content-disposition"),
            cache_control: header_str(headers, "cache-control"),
            expires: header_str(headers, "expires"),
            storage_class: "STANDARD".to_string(),
            acl: acl::resolve_request_acl(headers, &owner_id, &owner_display)?,
            user_metadata: super::user_metadata_of(headers),
            last_modified: now.clone(),
            delete_marker: false,
        }
    } else {
        ObjectRecord {
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            etag: etag.clone(),
            last_modified: now.clone(),
            ..src_record
        }
    };

    state.metadata.put_object(record).await?;

    let body = xml::render_copy_object_result(&etag, &now);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// Split a percent-encoded `x-amz-copy-source` into `(bucket, key)`.
pub(crate) fn parse_copy_source(headers: &HeaderMap) -> Result<(String, String), S3Error> {
    let raw = header_str(headers, "x-amz-copy-source").ok_or_else(|| S3Error::InvalidArgument {
        message: "Missing x-amz-copy-source header".to_string(),
    })?;
    let decoded = percent_encoding::percent_decode_str(&raw).decode_utf8_lossy();
    let trimmed = decoded.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(S3Error::InvalidArgument {
            message: format!("Invalid x-amz-copy-source: {raw}"),
        }),
    }
}

// -- Listing -----------------------------------------------------------------

/// `GET /{bucket}` — ListObjects (V1).
pub async fn list_objects_v1(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }

    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let delimiter = query.get("delimiter").map(String::as_str).unwrap_or("");
    let marker = query.get("marker").map(String::as_str).unwrap_or("");
    let max_keys = parse_max_keys(query.get("max-keys").map(String::as_str), "max-keys")?;

    let result = state
        .metadata
        .list_objects(bucket, prefix, delimiter, max_keys, marker)
        .await?;

    let entries: Vec<xml::ObjectEntry<'_>> = result
        .objects
        .iter()
        .map(|o| xml::ObjectEntry {
            key: &o.key,
            last_modified: &o.last_modified,
            etag: &o.etag,
            size: o.size,
            storage_class: &o.storage_class,
        })
        .collect();

    let body = xml::render_list_objects_v1(
        bucket,
        prefix,
        delimiter,
        marker,
        max_keys,
        result.is_truncated,
        &entries,
        &result.common_prefixes,
        result.next_cursor.as_deref(),
    );
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `GET /{bucket}?list-type=2` — ListObjects (V2). Continuation tokens
/// are base64-wrapped start-after keys; the token wins over `start-after`
/// when both are present.
pub async fn list_objects_v2(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }

    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let delimiter = query.get("delimiter").map(String::as_str).unwrap_or("");
    let max_keys = parse_max_keys(query.get("max-keys").map(String::as_str), "max-keys")?;
    let start_after = query.get("start-after").map(String::as_str).unwrap_or("");
    let continuation_token = query.get("continuation-token").map(String::as_str);

    let cursor = match continuation_token {
        Some(token) => decode_continuation_token(token)?,
        None => start_after.to_string(),
    };

    let result = state
        .metadata
        .list_objects(bucket, prefix, delimiter, max_keys, &cursor)
        .await?;

    let entries: Vec<xml::ObjectEntry<'_>> = result
        .objects
        .iter()
        .map(|o| xml::ObjectEntry {
            key: &o.key,
            last_modified: &o.last_modified,
            etag: &o.etag,
            size: o.size,
            storage_class: &o.storage_class,
        })
        .collect();

    let next_token = result.next_cursor.as_deref().map(encode_continuation_token);

    let body = xml::render_list_objects_v2(
        bucket,
        prefix,
        delimiter,
        max_keys,
        result.is_truncated,
        &entries,
        &result.common_prefixes,
        continuation_token,
        next_token.as_deref(),
        Some(start_after),
    );
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

fn encode_continuation_token(cursor: &str) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, cursor)
}

fn decode_continuation_token(token: &str) -> Result<String, S3Error> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "The continuation token provided is incorrect".to_string(),
        })
}

// -- Object ACLs -------------------------------------------------------------

/// `GET /{bucket}/{key}?acl` — GetObjectAcl.
pub async fn get_object_acl(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }
    let record = state
        .metadata
        .get_object(bucket, key)
        .await?
        .ok_or_else(|| no_such_key(key))?;

    let (owner_id, owner_display) = owner_identity(&state);
    let acl: Acl = serde_json::from_str(&record.acl)
        .unwrap_or_else(|_| Acl::full_control(&owner_id, &owner_display));

    let body = xml::render_access_control_policy(&acl);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}/{key}?acl` — PutObjectAcl.
pub async fn put_object_acl(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(require_bucket(bucket));
    }
    if !state.metadata.object_exists(bucket, key).await? {
        return Err(no_such_key(key));
    }

    acl::check_exclusive_acl_headers(headers)?;
    let (owner_id, owner_display) = owner_identity(&state);

    let acl_json = if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        acl::canned_acl(canned, &owner_id, &owner_display)?.to_json()
    } else if let Some(acl) = acl::acl_from_grant_headers(headers, &owner_id, &owner_display) {
        acl.to_json()
    } else if !body.is_empty() {
        xml::parse_access_control_policy(body, &owner_id, &owner_display)?.to_json()
    } else {
        Acl::full_control(&owner_id, &owner_display).to_json()
    };

    state
        .metadata
        .update_object_acl(bucket, key, &acl_json)
        .await?;
    Ok(StatusCode::OK.into_response())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(etag: &str, last_modified: &str) -> ObjectRecord {
        ObjectRecord {
            bucket: "b".to_string(),
            key: "k".to_string(),
            size: 100,
            etag: etag.to_string(),
            content_type: "text/plain".to_string(),
            content_encoding: None,
            content_language: None,
            content_disposition: None,
            cache_control: None,
            expires: None,
            storage_class: "STANDARD".to_string(),
            acl: "{}".to_string(),
            user_metadata: HashMap::new(),
            last_modified: last_modified.to_string(),
            delete_marker: false,
        }
    }

    // -- Range parsing --

    #[test]
    fn parse_range_forms() {
        assert_eq!(parse_range_header("bytes=0-4"), Some(ByteRange::Span(0, 4)));
        assert_eq!(parse_range_header("bytes=5-"), Some(ByteRange::From(5)));
        assert_eq!(parse_range_header("bytes=-3"), Some(ByteRange::Suffix(3)));
    }

    #[test]
    fn parse_range_rejects_malformed() {
        assert_eq!(parse_range_header("bytes=-0"), None);
        assert_eq!(parse_range_header("bytes=9-3"), None);
        assert_eq!(parse_range_header("bytes=0-4,8-9"), None);
        assert_eq!(parse_range_header("chars=0-4"), None);
        assert_eq!(parse_range_header(""), None);
    }

    #[test]
    fn resolve_range_clamps_and_rejects() {
        assert_eq!(resolve_range(&ByteRange::Span(0, 4), 16), Some((0, 4)));
        assert_eq!(resolve_range(&ByteRange::Span(0, 100), 16), Some((0, 15)));
        assert_eq!(resolve_range(&ByteRange::Span(20, 25), 16), None);
        assert_eq!(resolve_range(&ByteRange::From(5), 16), Some((5, 15)));
        assert_eq!(resolve_range(&ByteRange::From(16), 16), None);
        assert_eq!(resolve_range(&ByteRange::Suffix(5), 16), Some((11, 15)));
        assert_eq!(resolve_range(&ByteRange::Suffix(99), 16), Some((0, 15)));
        assert_eq!(resolve_range(&ByteRange::Span(0, 4), 0), None);
    }

    // -- Conditionals --

    #[test]
    fn if_match_behaviour() {
        let r = record("\"abc\"", "2026-01-15T10:00:00.000Z");
        let mut h = HeaderMap::new();
        h.insert("if-match", HeaderValue::from_static("\"abc\""));
        assert!(evaluate_conditionals(&h, &r, true).is_ok());

        h.insert("if-match", HeaderValue::from_static("\"other\""));
        assert!(matches!(
            evaluate_conditionals(&h, &r, true),
            Err(S3Error::PreconditionFailed)
        ));

        h.insert("if-match", HeaderValue::from_static("*"));
        assert!(evaluate_conditionals(&h, &r, true).is_ok());
    }

    #[test]
    fn if_none_match_304_carries_etag() {
        let r = record("\"abc\"", "2026-01-15T10:00:00.000Z");
        let mut h = HeaderMap::new();
        h.insert("if-none-match", HeaderValue::from_static("\"abc\""));
        match evaluate_conditionals(&h, &r, true) {
            Err(S3Error::NotModified { etag }) => assert_eq!(etag.as_deref(), Some("\"abc\"")),
            other => panic!("expected NotModified, got {other:?}"),
        }
        // Unsafe method: 412 instead.
        assert!(matches!(
            evaluate_conditionals(&h, &r, false),
            Err(S3Error::PreconditionFailed)
        ));
    }

    #[test]
    fn modified_since_pair() {
        let r = record("\"abc\"", "2026-01-15T10:00:00.000Z");

        let mut h = HeaderMap::new();
        h.insert(
            "if-modified-since",
            HeaderValue::from_static("Sun, 01 Feb 2026 00:00:00 GMT"),
        );
        assert!(matches!(
            evaluate_conditionals(&h, &r, true),
            Err(S3Error::NotModified { .. })
        ));

        let mut h = HeaderMap::new();
        h.insert(
            "if-unmodified-since",
            HeaderValue::from_static("Wed, 01 Jan 2025 00:00:00 GMT"),
        );
        assert!(matches!(
            evaluate_conditionals(&h, &r, true),
            Err(S3Error::PreconditionFailed)
        ));
    }

    // -- Content-MD5 --

    #[test]
    fn content_md5_syntax() {
        let mut h = HeaderMap::new();
        assert!(declared_content_md5(&h).unwrap().is_none());

        // base64(md5("Hello, World!"))
        h.insert(
            "content-md5",
            HeaderValue::from_static("ZajifYh5KDgxtmS9i38K1A=="),
        );
        let digest = declared_content_md5(&h).unwrap().unwrap();
        assert_eq!(hex::encode(digest), "65a8e27d8879283831b664bd8b7f0ad4");

        h.insert("content-md5", HeaderValue::from_static("!!!not-base64!!!"));
        assert!(matches!(
            declared_content_md5(&h),
            Err(S3Error::InvalidDigest)
        ));

        // Valid base64, wrong width.
        h.insert("content-md5", HeaderValue::from_static("c2hvcnQ="));
        assert!(matches!(
            declared_content_md5(&h),
            Err(S3Error::InvalidDigest)
        ));
    }

    // -- Copy source --

    #[test]
    fn copy_source_parsing() {
        let mut h = HeaderMap::new();
        h.insert(
            "x-amz-copy-source",
            HeaderValue::from_static("/src-bucket/path/to/key"),
        );
        assert_eq!(
            parse_copy_source(&h).unwrap(),
            ("src-bucket".to_string(), "path/to/key".to_string())
        );

        h.insert(
            "x-amz-copy-source",
            HeaderValue::from_static("src-bucket/with%20space"),
        );
        assert_eq!(
            parse_copy_source(&h).unwrap(),
            ("src-bucket".to_string(), "with space".to_string())
        );

        h.insert("x-amz-copy-source", HeaderValue::from_static("/just-bucket"));
        assert!(parse_copy_source(&h).is_err());
    }

    // -- Continuation tokens --

    #[test]
    fn continuation_token_round_trip() {
        let token = encode_continuation_token("some/key");
        assert_ne!(token, "some/key");
        assert_eq!(decode_continuation_token(&token).unwrap(), "some/key");
        assert!(decode_continuation_token("!!!").is_err());
    }

    // -- Declared body length --

    #[test]
    fn declared_length_sources() {
        let mut h = HeaderMap::new();
        assert!(matches!(
            declared_body_length(&h),
            Err(S3Error::MissingContentLength)
        ));

        h.insert("content-length", HeaderValue::from_static("42"));
        assert_eq!(declared_body_length(&h).unwrap(), 42);

        // aws-chunked: the decoded length wins over the framed one.
        h.insert(
            "x-amz-content-sha256",
            HeaderValue::from_static("STREAMING-AWS4-HMAC-SHA256-PAYLOAD"),
        );
        h.insert(
            "x-amz-decoded-content-length",
            HeaderValue::from_static("17"),
        );
        assert_eq!(declared_body_length(&h).unwrap(), 17);
    }
}
