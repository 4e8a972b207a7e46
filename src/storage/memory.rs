//! In-memory storage backend for tests and ephemeral deployments.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::backend::{chunked_stream, collect_stream, md5_hex, ByteStream, StorageBackend, StorageError};

#[derive(Default)]
struct Shelves {
    /// (bucket, key) -> bytes
    objects: HashMap<(String, String), Bytes>,
    /// upload_id -> part_number -> bytes
    parts: HashMap<String, BTreeMap<u32, Bytes>>,
}

/// Holds every object in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    shelves: RwLock<Shelves>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, StorageError> {
        let etag = md5_hex(&data);
        self.shelves
            .write()
            .await
            .objects
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(etag)
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<(String, u64), StorageError> {
        let data = collect_stream(body).await?;
        let size = data.len() as u64;
        let etag = self.put(bucket, key, data).await?;
        Ok((etag, size))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.shelves
            .read()
            .await
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))
    }

    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, StorageError> {
        let data = self.get(bucket, key).await?;
        Ok(chunked_stream(data, offset, length))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.shelves
            .write()
            .await
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .shelves
            .read()
            .await
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let etag = md5_hex(&data);
        self.shelves
            .write()
            .await
            .parts
            .entry(upload_id.to_string())
            .or_default()
            .insert(part_number, data);
        Ok(etag)
    }

    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<String, StorageError> {
        let mut shelves = self.shelves.write().await;
        let mut joined = Vec::new();
        {
            let parts = shelves.parts.get(upload_id);
            for &part_number in part_numbers {
                let data = parts.and_then(|m| m.get(&part_number)).ok_or_else(|| {
                    StorageError::NotFound(format!("part {part_number} of upload {upload_id}"))
                })?;
                joined.extend_from_slice(data);
            }
        }
        let data = Bytes::from(joined);
        let etag = md5_hex(&data);
        shelves
            .objects
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(etag)
    }

    async fn delete_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.shelves.write().await.parts.remove(upload_id);
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<String, StorageError> {
        let data = self.get(src_bucket, src_key).await?;
        self.put(dst_bucket, dst_key, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_idempotent_delete() {
        let b = MemoryBackend::new();
        let etag = b.put("bkt", "k", Bytes::from("Hello, World!")).await.unwrap();
        assert_eq!(etag, "65a8e27d8879283831b664bd8b7f0ad4");
        assert!(b.exists("bkt", "k").await.unwrap());
        b.delete("bkt", "k").await.unwrap();
        b.delete("bkt", "k").await.unwrap();
        assert!(matches!(
            b.get("bkt", "k").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn multipart_assembly_and_cleanup() {
        let b = MemoryBackend::new();
        b.put_part("bkt", "k", "u", 1, Bytes::from("ab")).await.unwrap();
        b.put_part("bkt", "k", "u", 2, Bytes::from("cd")).await.unwrap();
        let etag = b.assemble_parts("bkt", "k", "u", &[1, 2]).await.unwrap();
        assert_eq!(etag, md5_hex(b"abcd"));
        b.delete_parts("bkt", "k", "u").await.unwrap();
        assert!(b.assemble_parts("bkt", "k2", "u", &[1]).await.is_err());
    }

    #[tokio::test]
    async fn ranged_stream() {
        let b = MemoryBackend::new();
        b.put("bkt", "k", Bytes::from("0123456789")).await.unwrap();
        let window = collect_stream(b.get_stream("bkt", "k", 2, Some(4)).await.unwrap())
            .await
            .unwrap();
        assert_eq!(window, Bytes::from("2345"));
    }
}
