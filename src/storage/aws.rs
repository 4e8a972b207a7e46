//! AWS S3 gateway storage backend.
//!
//! Proxies the byte plane to one backing S3 bucket, namespaced by an
//! optional key prefix:
//!
//! ```text
//! objects:  {prefix}{bucket}/{key}
//! parts:    {prefix}.parts/{upload_id}/{part_number}
//! ```
//!
//! ETags are computed locally (MD5 of the bytes that passed through) so
//! the wire semantics match the other backends regardless of what the
//! upstream does with encryption or multipart. The core certifies the
//! contract, not the upstream.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::backend::{
    chunked_stream, collect_stream, md5_hex, ByteStream, StorageBackend, StorageError,
};
use crate::config::AwsStorageConfig;

/// Gateway backend forwarding to a backing S3 bucket.
pub struct AwsGatewayBackend {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl AwsGatewayBackend {
    /// Build the SDK client from the gateway config. Explicit credentials
    /// win; otherwise the ambient chain (env, profile, IMDS) applies.
    pub async fn new(cfg: &AwsStorageConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()));

        if let Some(endpoint) = &cfg.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(ak), Some(sk)) = (&cfg.access_key_id, &cfg.secret_access_key) {
            let creds = aws_sdk_s3::config::Credentials::new(ak, sk, None, None, "bleepstore");
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(cfg.use_path_style)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);

        info!(bucket = %cfg.bucket, prefix = %cfg.prefix, "aws gateway backend ready");
        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
        })
    }

    fn object_key(&self, bucket: &str, key: &str) -> String {
        format!("{}{}/{}", self.prefix, bucket, key)
    }

    fn part_key(&self, upload_id: &str, part_number: u32) -> String {
        format!("{}.parts/{}/{}", self.prefix, upload_id, part_number)
    }

    async fn fetch(&self, upstream_key: &str) -> Result<Bytes, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(upstream_key)
            .send()
            .await
            .map_err(|err| {
                let svc = err.into_service_error();
                if svc.is_no_such_key() {
                    StorageError::NotFound(upstream_key.to_string())
                } else {
                    StorageError::Backend(format!("get_object: {svc}"))
                }
            })?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("get_object body: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn store(&self, upstream_key: &str, data: Bytes) -> Result<String, StorageError> {
        let etag = md5_hex(&data);
        debug!(key = %upstream_key, bytes = data.len(), "gateway put");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(upstream_key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("put_object: {}", e.into_service_error())))?;
        Ok(etag)
    }

    async fn remove(&self, upstream_key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(upstream_key)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!("delete_object: {}", e.into_service_error()))
            })?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for AwsGatewayBackend {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, StorageError> {
        self.store(&self.object_key(bucket, key), data).await
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<(String, u64), StorageError> {
        // The SDK wants a known length; buffer the stream before upload.
        let data = collect_stream(body).await?;
        let size = data.len() as u64;
        let etag = self.put(bucket, key, data).await?;
        Ok((etag, size))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.fetch(&self.object_key(bucket, key)).await
    }

    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, StorageError> {
        // Streaming is logical: one upstream fetch, then 64 KiB slices.
        let data = self.fetch(&self.object_key(bucket, key)).await?;
        Ok(chunked_stream(data, offset, length))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.remove(&self.object_key(bucket, key)).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(bucket, key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let svc = err.into_service_error();
                if svc.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!("head_object: {svc}")))
                }
            }
        }
    }

    async fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        self.store(&self.part_key(upload_id, part_number), data).await
    }

    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<String, StorageError> {
        use md5::{Digest, Md5};
        let mut joined = Vec::new();
        let mut hasher = Md5::new();
        for &part_number in part_numbers {
            let data = self.fetch(&self.part_key(upload_id, part_number)).await?;
            hasher.update(&data);
            joined.extend_from_slice(&data);
        }
        let etag = hex::encode(hasher.finalize());
        self.store(&self.object_key(bucket, key), Bytes::from(joined))
            .await?;
        Ok(etag)
    }

    async fn delete_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let prefix = format!("{}.parts/{}/", self.prefix, upload_id);
        let mut continuation: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.clone())
                .send()
                .await
                .map_err(|e| {
                    StorageError::Backend(format!("list_objects_v2: {}", e.into_service_error()))
                })?;

            for object in resp.contents() {
                if let Some(key) = object.key() {
                    self.remove(key).await?;
                }
            }

            match resp.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<String, StorageError> {
        // Round-trip through the gateway so the returned ETag is the local
        // MD5 convention rather than whatever the upstream reports.
        let data = self.fetch(&self.object_key(src_bucket, src_key)).await?;
        self.store(&self.object_key(dst_bucket, dst_key), data).await
    }
}
