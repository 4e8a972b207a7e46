//! aws-chunked payload decoding.
//!
//! When a client signs with `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` (or the
//! unsigned-trailer variant) the body arrives framed:
//!
//! ```text
//! <hex-size>;chunk-signature=<sig>\r\n
//! <data>\r\n
//! ...
//! 0;chunk-signature=<sig>\r\n
//! [trailer headers]
//! ```
//!
//! The per-chunk signatures chain off the seed signature already verified
//! in the Authorization header, so the frames are stripped without
//! re-verifying each chunk.

use axum::http::HeaderMap;
use bytes::Bytes;

/// Whether the declared payload hash implies aws-chunked framing.
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    matches!(
        headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok()),
        Some("STREAMING-AWS4-HMAC-SHA256-PAYLOAD")
            | Some("STREAMING-UNSIGNED-PAYLOAD-TRAILER")
    )
}

/// The real payload length declared alongside a chunked body.
pub fn decoded_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("x-amz-decoded-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Strip aws-chunked framing, returning the concatenated chunk payloads.
/// Returns `None` when the framing is malformed.
pub fn decode(body: &Bytes) -> Option<Bytes> {
    let mut out = Vec::with_capacity(body.len());
    let mut pos = 0;

    while pos < body.len() {
        let header_len = find_crlf(&body[pos..])?;
        let header = std::str::from_utf8(&body[pos..pos + header_len]).ok()?;
        pos += header_len + 2;

        let size_hex = header.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        if size == 0 {
            // Final chunk; anything after it is trailer material.
            break;
        }

        if pos + size > body.len() {
            return None;
        }
        out.extend_from_slice(&body[pos..pos + size]);
        pos += size;

        if body.len() >= pos + 2 && &body[pos..pos + 2] == b"\r\n" {
            pos += 2;
        }
    }

    Some(Bytes::from(out))
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
