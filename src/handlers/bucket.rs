//! Bucket-level S3 operations.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{acl, owner_identity};
use crate::errors::S3Error;
use crate::metadata::store::{Acl, BucketDeletion, BucketRecord};
use crate::util::now_iso8601;
use crate::validation::validate_bucket_name;
use crate::xml;
use crate::AppState;

/// `GET /` — ListBuckets.
pub async fn list_buckets(state: Arc<AppState>) -> Result<Response, S3Error> {
    let buckets = state.metadata.list_buckets().await?;
    let (owner_id, owner_display) = owner_identity(&state);

    let entries: Vec<(&str, &str)> = buckets
        .iter()
        .map(|b| (b.name.as_str(), b.created_at.as_str()))
        .collect();
    let body = xml::render_list_buckets(&owner_id, &owner_display, &entries);

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}` — CreateBucket.
///
/// Re-creation by the same owner is idempotent success (200) in
/// us-east-1 and `BucketAlreadyOwnedByYou` (409) elsewhere; a name held
/// by another owner is `BucketAlreadyExists`.
pub async fn create_bucket(
    state: Arc<AppState>,
    bucket: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    validate_bucket_name(bucket)?;

    let (owner_id, owner_display) = owner_identity(&state);
    let acl_json = acl::resolve_request_acl(headers, &owner_id, &owner_display)?;

    let region = if body.is_empty() {
        state.config.server.region.clone()
    } else {
        xml::parse_location_constraint(body)
            .unwrap_or_else(|| state.config.server.region.clone())
    };

    let location = format!("/{bucket}");

    if let Some(existing) = state.metadata.get_bucket(bucket).await? {
        if existing.owner_id != owner_id {
            return Err(S3Error::BucketAlreadyExists {
                bucket: bucket.to_string(),
            });
        }
        if state.config.server.region == "us-east-1" {
            let mut response = StatusCode::OK.into_response();
            response
                .headers_mut()
                .insert("location", HeaderValue::from_str(&location).unwrap());
            return Ok(response);
        }
        return Err(S3Error::BucketAlreadyOwnedByYou {
            bucket: bucket.to_string(),
        });
    }

    state
        .metadata
        .create_bucket(BucketRecord {
            name: bucket.to_string(),
            region,
            owner_id,
            owner_display,
            acl: acl_json,
            created_at: now_iso8601(),
        })
        .await?;

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("location", HeaderValue::from_str(&location).unwrap());
    Ok(response)
}

/// `DELETE /{bucket}` — DeleteBucket. The emptiness check (objects and
/// in-progress uploads) runs inside the same metadata transaction that
/// removes the row.
pub async fn delete_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    match state.metadata.delete_bucket(bucket).await? {
        BucketDeletion::Removed => Ok(StatusCode::NO_CONTENT.into_response()),
        BucketDeletion::NotEmpty => Err(S3Error::BucketNotEmpty {
            bucket: bucket.to_string(),
        }),
        BucketDeletion::Missing => Err(S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        }),
    }
}

/// `HEAD /{bucket}` — HeadBucket. 404 must be body-less, so the error
/// taxonomy is bypassed for the missing case.
pub async fn head_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    match state.metadata.get_bucket(bucket).await? {
        Some(record) => {
            let mut response = StatusCode::OK.into_response();
            response.headers_mut().insert(
                "x-amz-bucket-region",
                HeaderValue::from_str(&record.region)
                    .unwrap_or_else(|_| HeaderValue::from_static("us-east-1")),
            );
            Ok(response)
        }
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// `GET /{bucket}?location` — GetBucketLocation.
pub async fn get_bucket_location(
    state: Arc<AppState>,
    bucket: &str,
) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        })?;
    let body = xml::render_location_constraint(&record.region);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `GET /{bucket}?acl` — GetBucketAcl.
pub async fn get_bucket_acl(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        })?;

    let acl: Acl = serde_json::from_str(&record.acl)
        .unwrap_or_else(|_| Acl::full_control(&record.owner_id, &record.owner_display));
    let body = xml::render_access_control_policy(&acl);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}?acl` — PutBucketAcl. Canned header, then grant headers,
/// then an XML body; bare requests reset to private.
pub async fn put_bucket_acl(
    state: Arc<AppState>,
    bucket: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        })?;

    acl::check_exclusive_acl_headers(headers)?;

    let acl_json = if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        acl::canned_acl(canned, &record.owner_id, &record.owner_display)?.to_json()
    } else if let Some(acl) =
        acl::acl_from_grant_headers(headers, &record.owner_id, &record.owner_display)
    {
        acl.to_json()
    } else if !body.is_empty() {
        xml::parse_access_control_policy(body, &record.owner_id, &record.owner_display)?.to_json()
    } else {
        Acl::full_control(&record.owner_id, &record.owner_display).to_json()
    };

    state.metadata.update_bucket_acl(bucket, &acl_json).await?;
    Ok(StatusCode::OK.into_response())
}
