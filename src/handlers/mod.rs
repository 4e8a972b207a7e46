//! S3 operation handlers.
//!
//! Each operation is a short function that calls metadata and storage
//! primitives in a disciplined order; the router in [`crate::server`]
//! dispatches into these modules after authentication.

pub mod acl;
pub mod bucket;
pub mod multipart;
pub mod object;

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;

/// The identity operations act as. SigV4 has already verified the caller
/// against the credential table; single-owner deployments map every
/// credential to the configured default owner.
pub(crate) fn owner_identity(state: &Arc<AppState>) -> (String, String) {
    (
        state.config.auth.access_key.clone(),
        state.config.auth.access_key.clone(),
    )
}

/// A header value as an owned string, if present and valid UTF-8.
pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `Content-Type`, defaulting to `application/octet-stream`.
pub(crate) fn content_type_of(headers: &HeaderMap) -> String {
    header_str(headers, "content-type").unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Collect `x-amz-meta-*` headers (lowercased full names) for persistence.
pub(crate) fn user_metadata_of(headers: &HeaderMap) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str().to_lowercase();
        if name.starts_with("x-amz-meta-") {
            if let Ok(v) = value.to_str() {
                meta.insert(name, v.to_string());
            }
        }
    }
    meta
}

/// Wrap an unquoted hex MD5 in the quoted ETag form.
pub(crate) fn quote_etag(md5_hex: &str) -> String {
    format!("\"{md5_hex}\"")
}

/// Strip surrounding quotes from an ETag for comparison.
pub(crate) fn unquote_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_metadata_filters_and_lowercases() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Amz-Meta-Author", HeaderValue::from_static("tester"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let meta = user_metadata_of(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["x-amz-meta-author"], "tester");
    }

    #[test]
    fn content_type_defaults() {
        assert_eq!(content_type_of(&HeaderMap::new()), "application/octet-stream");
    }

    #[test]
    fn etag_quoting() {
        assert_eq!(quote_etag("abc"), "\"abc\"");
        assert_eq!(unquote_etag("\"abc\""), "abc");
        assert_eq!(unquote_etag("abc"), "abc");
        assert_eq!(unquote_etag(" \"abc\" "), "abc");
    }
}
