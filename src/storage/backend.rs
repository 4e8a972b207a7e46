//! The storage backend contract.
//!
//! Backends move opaque bytes keyed by `(bucket, key)` and multipart parts
//! keyed by `(upload_id, part_number)`. They know nothing about metadata
//! rows, ACLs, or the HTTP surface; the operation engine composes the two
//! planes. Streaming reads hand back 64 KiB chunks; streaming writes
//! compute a single-pass MD5 so the ETag never requires a second read.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Chunk size for streaming reads.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A finite, non-restartable sequence of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Failures at the byte plane. `NotFound` is the only kind callers branch
/// on; everything else surfaces as an internal error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for crate::errors::S3Error {
    fn from(err: StorageError) -> Self {
        // The metadata row is the system of record; by the time a handler
        // touches storage the existence checks are done, so any failure
        // here (a missing file included) is an internal fault.
        crate::errors::S3Error::InternalError(anyhow::Error::new(err))
    }
}

/// Async object storage contract. All ETags returned are unquoted
/// lowercase hex MD5 of the stored bytes.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Prepare the backend for service. Crash-only: every startup doubles
    /// as recovery (e.g. sweeping interrupted temp files).
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Store a whole object, returning its MD5.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, StorageError>;

    /// Store an object from a chunk stream, hashing while writing.
    /// Returns `(md5_hex, total_bytes)`.
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<(String, u64), StorageError>;

    /// Read a whole object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Read a byte range lazily in 64 KiB chunks. `length` of `None`
    /// means "to the end".
    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, StorageError>;

    /// Delete an object. Missing is success.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Whether the object's bytes exist.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Store one part of a multipart upload, returning its MD5.
    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError>;

    /// Concatenate the named parts (in the given order) into the final
    /// object, returning the MD5 of the concatenation. The caller decides
    /// whether to expose that or the multipart composite ETag.
    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<String, StorageError>;

    /// Remove all stored parts of an upload. Idempotent.
    async fn delete_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;

    /// Copy an object, returning the MD5 of the copy.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<String, StorageError>;
}

/// Hex MD5 of a byte slice — the single-put ETag form, unquoted.
pub fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(data))
}

/// Wrap fully materialised bytes as a lazy 64 KiB chunk stream, honouring
/// an offset and optional length. Used by backends whose streaming is
/// logical only (SQLite blobs, memory, gateways).
pub fn chunked_stream(data: Bytes, offset: u64, length: Option<u64>) -> ByteStream {
    let start = (offset as usize).min(data.len());
    let end = match length {
        Some(len) => start.saturating_add(len as usize).min(data.len()),
        None => data.len(),
    };
    let window = data.slice(start..end);
    let chunks: Vec<std::io::Result<Bytes>> = window
        .chunks(STREAM_CHUNK_SIZE)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

/// Collect a [`ByteStream`] back into contiguous bytes (tests and the
/// buffering backends).
pub async fn collect_stream(mut stream: ByteStream) -> Result<Bytes, StorageError> {
    use futures::StreamExt;
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

/// Lift a `Bytes` value into a one-chunk [`ByteStream`].
pub fn stream_of(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_known_vector() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"Hello, World!"), "65a8e27d8879283831b664bd8b7f0ad4");
    }

    #[tokio::test]
    async fn chunked_stream_windows() {
        let data = Bytes::from(vec![7u8; 200_000]);
        let whole = collect_stream(chunked_stream(data.clone(), 0, None))
            .await
            .unwrap();
        assert_eq!(whole.len(), 200_000);

        let tail = collect_stream(chunked_stream(data.clone(), 199_990, None))
            .await
            .unwrap();
        assert_eq!(tail.len(), 10);

        let window = collect_stream(chunked_stream(data.clone(), 100, Some(50)))
            .await
            .unwrap();
        assert_eq!(window.len(), 50);

        // Past-the-end offset yields an empty stream, not a panic.
        let empty = collect_stream(chunked_stream(data, 300_000, Some(10)))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn stream_of_round_trips() {
        let out = collect_stream(stream_of(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"abc"));
    }
}
