//! Multipart-upload S3 operations.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use md5::{Digest, Md5};

use super::object::{declared_content_md5, parse_copy_source, request_body_stream};
use super::{content_type_of, header_str, owner_identity, quote_etag, unquote_etag};
use crate::errors::S3Error;
use crate::metadata::store::{MultipartUploadRecord, ObjectRecord, PartRecord};
use crate::storage::backend::collect_stream;
use crate::util::now_iso8601;
use crate::validation::{parse_max_keys, validate_object_key};
use crate::xml;
use crate::AppState;

/// Minimum size of every part except the last (5 MiB).
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Highest part number S3 accepts.
const MAX_PART_NUMBER: u32 = 10_000;

// -- Helpers -----------------------------------------------------------------

fn no_such_upload(upload_id: &str) -> S3Error {
    S3Error::NoSuchUpload {
        upload_id: upload_id.to_string(),
    }
}

fn upload_id_param<'a>(query: &'a HashMap<String, String>) -> Result<&'a str, S3Error> {
    query
        .get("uploadId")
        .map(String::as_str)
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing uploadId parameter".to_string(),
        })
}

fn part_number_param(query: &HashMap<String, String>) -> Result<u32, S3Error> {
    let n: u32 = query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing or invalid partNumber parameter".to_string(),
        })?;
    if !(1..=MAX_PART_NUMBER).contains(&n) {
        return Err(S3Error::InvalidArgument {
            message: format!("Part number must be an integer between 1 and {MAX_PART_NUMBER}"),
        });
    }
    Ok(n)
}

/// Look up the upload and confirm it belongs to this bucket/key pair. A
/// mismatch is indistinguishable from a missing upload to the caller.
async fn resolve_upload(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<MultipartUploadRecord, S3Error> {
    let upload = state
        .metadata
        .get_multipart_upload(upload_id)
        .await?
        .ok_or_else(|| no_such_upload(upload_id))?;
    if upload.bucket != bucket || upload.key != key {
        return Err(no_such_upload(upload_id));
    }
    Ok(upload)
}

/// The multipart composite ETag: MD5 over the concatenated raw part
/// digests, suffixed with the part count.
fn composite_etag(part_etags: &[String]) -> Result<String, S3Error> {
    let mut digests = Vec::with_capacity(part_etags.len() * 16);
    for etag in part_etags {
        let raw = hex::decode(unquote_etag(etag)).map_err(|_| S3Error::InvalidPart)?;
        if raw.len() != 16 {
            return Err(S3Error::InvalidPart);
        }
        digests.extend_from_slice(&raw);
    }
    let digest = Md5::digest(&digests);
    Ok(format!("\"{}-{}\"", hex::encode(digest), part_etags.len()))
}

// -- Handlers ----------------------------------------------------------------

/// `POST /{bucket}/{key}?uploads` — CreateMultipartUpload. The upload id
/// is a fresh UUIDv4 (128 bits of entropy), opaque to clients.
pub async fn create_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    validate_object_key(key)?;
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        });
    }

    let upload_id = uuid::Uuid::new_v4().to_string();
    let (owner_id, owner_display) = owner_identity(&state);

    let record = MultipartUploadRecord {
        upload_id: upload_id.clone(),
        bucket: bucket.to_string(),
        key: key.to_string(),
        content_type: content_type_of(headers),
        content_encoding: header_str(headers, "content-encoding"),
        content_language: header_str(headers, "content-language"),
        content_disposition: header_str(headers, "content-disposition"),
        cache_control: header_str(headers, "cache-control"),
        expires: header_str(headers, "expires"),
        storage_class: "STANDARD".to_string(),
        acl: super::acl::resolve_request_acl(headers, &owner_id, &owner_display)?,
        user_metadata: super::user_metadata_of(headers),
        owner_id,
        owner_display,
        initiated_at: now_iso8601(),
    };
    state.metadata.create_multipart_upload(record).await?;

    let body = xml::render_initiate_multipart_upload(bucket, key, &upload_id);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}/{key}?partNumber=N&uploadId=ID` — UploadPart.
/// Re-uploading a part number replaces it.
pub async fn upload_part(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    let upload_id = upload_id_param(query)?;
    let part_number = part_number_param(query)?;
    if header_str(headers, "content-length").is_none() {
        return Err(S3Error::MissingContentLength);
    }
    resolve_upload(&state, bucket, key, upload_id).await?;

    let expected_md5 = declared_content_md5(headers)?;
    let data = collect_stream(request_body_stream(headers, body).await?).await?;
    let size = data.len() as u64;

    if let Some(expected) = expected_md5 {
        if expected[..] != Md5::digest(&data)[..] {
            return Err(S3Error::BadDigest);
        }
    }

    let md5_hex = state
        .storage
        .put_part(bucket, key, upload_id, part_number, data)
        .await?;
    let etag = quote_etag(&md5_hex);

    state
        .metadata
        .put_part(
            upload_id,
            PartRecord {
                part_number,
                size,
                etag: etag.clone(),
                last_modified: now_iso8601(),
            },
        )
        .await?;

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("etag", HeaderValue::from_str(&etag).unwrap());
    Ok(response)
}

/// `PUT /{bucket}/{key}?partNumber=N&uploadId=ID` with
/// `x-amz-copy-source` — UploadPartCopy.
pub async fn upload_part_copy(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let upload_id = upload_id_param(query)?;
    let part_number = part_number_param(query)?;
    resolve_upload(&state, bucket, key, upload_id).await?;

    let (src_bucket, src_key) = parse_copy_source(headers)?;
    if !state.metadata.bucket_exists(&src_bucket).await? {
        return Err(S3Error::NoSuchBucket { bucket: src_bucket });
    }
    if state
        .metadata
        .get_object(&src_bucket, &src_key)
        .await?
        .is_none()
    {
        return Err(S3Error::NoSuchKey { key: src_key });
    }

    let full = state.storage.get(&src_bucket, &src_key).await?;
    let data = match header_str(headers, "x-amz-copy-source-range") {
        Some(range) => {
            let (start, end) = parse_copy_range(&range)?;
            if end >= full.len() as u64 {
                return Err(S3Error::InvalidRange);
            }
            full.slice(start as usize..=end as usize)
        }
        None => full,
    };
    let size = data.len() as u64;

    let md5_hex = state
        .storage
        .put_part(bucket, key, upload_id, part_number, data)
        .await?;
    let etag = quote_etag(&md5_hex);
    let now = now_iso8601();

    state
        .metadata
        .put_part(
            upload_id,
            PartRecord {
                part_number,
                size,
                etag: etag.clone(),
                last_modified: now.clone(),
            },
        )
        .await?;

    let body = xml::render_copy_part_result(&etag, &now);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// Parse `x-amz-copy-source-range: bytes=a-b` (both bounds required).
fn parse_copy_range(value: &str) -> Result<(u64, u64), S3Error> {
    let bad = || S3Error::InvalidArgument {
        message: format!("Invalid x-amz-copy-source-range: {value}"),
    };
    let spec = value.trim().strip_prefix("bytes=").ok_or_else(bad)?;
    let (start, end) = spec.split_once('-').ok_or_else(bad)?;
    let start: u64 = start.parse().map_err(|_| bad())?;
    let end: u64 = end.parse().map_err(|_| bad())?;
    if start > end {
        return Err(bad());
    }
    Ok((start, end))
}

/// `POST /{bucket}/{key}?uploadId=ID` — CompleteMultipartUpload.
///
/// Storage assembly runs before the metadata transaction: if assembly
/// fails nothing changes, and if the metadata commit fails the assembled
/// bytes are best-effort deleted.
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Response, S3Error> {
    let upload_id = upload_id_param(query)?;
    let upload = resolve_upload(&state, bucket, key, upload_id).await?;

    let requested = xml::parse_complete_multipart_upload(body)?;

    // Part numbers must strictly ascend.
    for pair in requested.windows(2) {
        if pair[1].0 <= pair[0].0 {
            return Err(S3Error::InvalidPartOrder);
        }
    }

    let stored = state.metadata.parts_for_completion(upload_id).await?;
    let by_number: HashMap<u32, &PartRecord> =
        stored.iter().map(|p| (p.part_number, p)).collect();

    let mut part_numbers = Vec::with_capacity(requested.len());
    let mut part_etags = Vec::with_capacity(requested.len());
    let mut total_size: u64 = 0;

    for (idx, (part_number, requested_etag)) in requested.iter().enumerate() {
        let part = by_number.get(part_number).ok_or(S3Error::InvalidPart)?;
        if unquote_etag(requested_etag) != unquote_etag(&part.etag) {
            return Err(S3Error::InvalidPart);
        }
        let last = idx == requested.len() - 1;
        if !last && part.size < MIN_PART_SIZE {
            return Err(S3Error::EntityTooSmall);
        }
        total_size += part.size;
        part_numbers.push(*part_number);
        part_etags.push(part.etag.clone());
    }

    // Byte plane first; a failure here leaves the upload intact.
    state
        .storage
        .assemble_parts(bucket, key, upload_id, &part_numbers)
        .await?;

    let etag = composite_etag(&part_etags)?;
    let final_object = ObjectRecord {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: total_size,
        etag: etag.clone(),
        content_type: upload.content_type,
        content_encoding: upload.content_encoding,
        content_language: upload.content_language,
        content_disposition: upload.content_disposition,
        cache_control: upload.cache_control,
        expires: upload.expires,
        storage_class: upload.storage_class,
        acl: upload.acl,
        user_metadata: upload.user_metadata,
        last_modified: now_iso8601(),
        delete_marker: false,
    };

    if let Err(e) = state
        .metadata
        .complete_multipart_upload(upload_id, final_object)
        .await
    {
        let _ = state.storage.delete(bucket, key).await;
        return Err(S3Error::InternalError(e));
    }

    // Part files are no longer reachable; reclaim them best-effort.
    if let Err(e) = state.storage.delete_parts(bucket, key, upload_id).await {
        tracing::warn!(upload_id, error = %e, "part cleanup failed after completion");
    }

    let location = format!("/{bucket}/{key}");
    let body = xml::render_complete_multipart_upload(&location, bucket, key, &etag);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `DELETE /{bucket}/{key}?uploadId=ID` — AbortMultipartUpload.
pub async fn abort_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = upload_id_param(query)?;
    resolve_upload(&state, bucket, key, upload_id).await?;

    state.metadata.abort_multipart_upload(upload_id).await?;
    if let Err(e) = state.storage.delete_parts(bucket, key, upload_id).await {
        tracing::warn!(upload_id, error = %e, "part cleanup failed after abort");
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}?uploads` — ListMultipartUploads, paginated by the
/// `(key, upload id)` pair.
pub async fn list_multipart_uploads(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        });
    }

    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let key_marker = query.get("key-marker").map(String::as_str).unwrap_or("");
    let upload_id_marker = query
        .get("upload-id-marker")
        .map(String::as_str)
        .unwrap_or("");
    let max_uploads = parse_max_keys(query.get("max-uploads").map(String::as_str), "max-uploads")?;

    let result = state
        .metadata
        .list_multipart_uploads(bucket, prefix, max_uploads, key_marker, upload_id_marker)
        .await?;

    let entries: Vec<xml::UploadEntry<'_>> = result
        .uploads
        .iter()
        .map(|u| xml::UploadEntry {
            key: &u.key,
            upload_id: &u.upload_id,
            initiated: &u.initiated_at,
            storage_class: &u.storage_class,
            owner_id: &u.owner_id,
            owner_display: &u.owner_display,
        })
        .collect();

    let body = xml::render_list_multipart_uploads(
        bucket,
        prefix,
        key_marker,
        upload_id_marker,
        max_uploads,
        result.is_truncated,
        &entries,
        result.next_key_marker.as_deref(),
        result.next_upload_id_marker.as_deref(),
    );
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `GET /{bucket}/{key}?uploadId=ID` — ListParts, paginated by part
/// number.
pub async fn list_parts(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = upload_id_param(query)?;
    let upload = resolve_upload(&state, bucket, key, upload_id).await?;

    let max_parts = parse_max_keys(query.get("max-parts").map(String::as_str), "max-parts")?;
    let marker: u32 = query
        .get("part-number-marker")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let result = state.metadata.list_parts(upload_id, max_parts, marker).await?;

    let entries: Vec<xml::PartEntry<'_>> = result
        .parts
        .iter()
        .map(|p| xml::PartEntry {
            part_number: p.part_number,
            last_modified: &p.last_modified,
            etag: &p.etag,
            size: p.size,
        })
        .collect();

    let body = xml::render_list_parts(
        bucket,
        key,
        upload_id,
        marker,
        max_parts,
        result.is_truncated,
        &entries,
        result.next_part_number_marker,
        &upload.storage_class,
        &upload.owner_id,
        &upload.owner_display,
    );
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_etag_two_parts() {
        // Digest of (md5("a") || md5("b")), dash, part count.
        let a = quote_etag(&hex::encode(Md5::digest(b"a")));
        let b = quote_etag(&hex::encode(Md5::digest(b"b")));
        let etag = composite_etag(&[a, b]).unwrap();

        let mut concat = Vec::new();
        concat.extend_from_slice(&Md5::digest(b"a"));
        concat.extend_from_slice(&Md5::digest(b"b"));
        let expected = format!("\"{}-2\"", hex::encode(Md5::digest(&concat)));
        assert_eq!(etag, expected);
    }

    #[test]
    fn composite_etag_shape() {
        let part = quote_etag("d41d8cd98f00b204e9800998ecf8427e");
        let etag = composite_etag(&[part.clone(), part]).unwrap();
        let inner = etag.trim_matches('"');
        let (digest, count) = inner.rsplit_once('-').unwrap();
        assert_eq!(digest.len(), 32);
        assert_eq!(count, "2");
    }

    #[test]
    fn composite_etag_rejects_non_md5_parts() {
        assert!(composite_etag(&["\"zz-not-hex\"".to_string()]).is_err());
        assert!(composite_etag(&["\"abcd\"".to_string()]).is_err());
    }

    #[test]
    fn part_number_bounds() {
        let mut query = HashMap::new();
        assert!(part_number_param(&query).is_err());

        query.insert("partNumber".to_string(), "0".to_string());
        assert!(part_number_param(&query).is_err());
        query.insert("partNumber".to_string(), "10001".to_string());
        assert!(part_number_param(&query).is_err());
        query.insert("partNumber".to_string(), "1".to_string());
        assert_eq!(part_number_param(&query).unwrap(), 1);
        query.insert("partNumber".to_string(), "10000".to_string());
        assert_eq!(part_number_param(&query).unwrap(), 10000);
    }

    #[test]
    fn copy_range_parsing() {
        assert_eq!(parse_copy_range("bytes=0-99").unwrap(), (0, 99));
        assert!(parse_copy_range("bytes=9-3").is_err());
        assert!(parse_copy_range("0-99").is_err());
        assert!(parse_copy_range("bytes=5-").is_err());
    }
}
