//! Local filesystem storage backend.
//!
//! Objects live at `{root}/{bucket}/{key}`; multipart parts live under
//! `{root}/.parts/{upload_id}/{part_number}`.
//!
//! Crash-only design:
//! - every write goes through a sibling temp file (`<name>.tmp.<rand>`),
//!   is fsync'd, then atomically renamed over the destination;
//! - nothing is acknowledged before the fsync;
//! - startup sweeps orphan `*.tmp.*` files left by interrupted writes;
//! - deletes collapse empty parent directories up to the bucket directory.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use md5::{Digest, Md5};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::backend::{ByteStream, StorageBackend, StorageError, STREAM_CHUNK_SIZE};

/// Directory under the root reserved for in-flight multipart parts.
const PARTS_DIR: &str = ".parts";

/// Stores objects as plain files under a root directory.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`. The directory is created if
    /// missing; call [`StorageBackend::init`] before serving requests.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve `{root}/{bucket}/{key}`, rejecting traversal components.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        check_relative(bucket)?;
        check_relative(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> Result<PathBuf, StorageError> {
        check_relative(upload_id)?;
        Ok(self
            .root
            .join(PARTS_DIR)
            .join(upload_id)
            .join(part_number.to_string()))
    }

    /// Sibling temp path for an atomic write of `dest`.
    fn temp_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = uuid::Uuid::new_v4().simple().to_string();
        dest.with_file_name(format!("{name}.tmp.{}", &id[..8]))
    }

    /// Write a chunk stream to `dest` via temp-fsync-rename, returning
    /// `(md5_hex, total_bytes)`.
    async fn write_atomic(
        dest: &Path,
        mut body: ByteStream,
    ) -> Result<(String, u64), StorageError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = Self::temp_path(dest);

        let result: Result<(String, u64), StorageError> = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut hasher = Md5::new();
            let mut total: u64 = 0;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                total += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, dest).await?;
            Ok((hex::encode(hasher.finalize()), total))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }

    /// Remove now-empty directories between `path`'s parent and `stop`
    /// (exclusive).
    async fn collapse_empty_dirs(&self, path: &Path, stop: &Path) {
        let mut parent = path.parent().map(Path::to_path_buf);
        while let Some(dir) = parent {
            if dir == *stop || dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir refuses non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            parent = dir.parent().map(Path::to_path_buf);
        }
    }
}

/// Reject absolute paths and `..` components in externally supplied names.
fn check_relative(name: &str) -> Result<(), StorageError> {
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(StorageError::Backend(format!("absolute path: {name}")));
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(StorageError::Backend(format!("path traversal: {name}")));
        }
    }
    Ok(())
}

/// Walk `root` removing files whose name carries a `.tmp.` marker.
fn sweep_temp_files(root: &Path) -> usize {
    let mut removed = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .map(|n| n.to_string_lossy().contains(".tmp."))
                .unwrap_or(false)
                && std::fs::remove_file(&path).is_ok()
            {
                removed += 1;
            }
        }
    }
    removed
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn init(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let root = self.root.clone();
        let removed = tokio::task::spawn_blocking(move || sweep_temp_files(&root))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if removed > 0 {
            info!(removed, "swept orphan temp files on startup");
        }
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, StorageError> {
        let dest = self.object_path(bucket, key)?;
        let (md5, _) = Self::write_atomic(&dest, super::backend::stream_of(data)).await?;
        Ok(md5)
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<(String, u64), StorageError> {
        let dest = self.object_path(bucket, key)?;
        Self::write_atomic(&dest, body).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{bucket}/{key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, StorageError> {
        let path = self.object_path(bucket, key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("{bucket}/{key}")))
            }
            Err(e) => return Err(e.into()),
        };
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }
        let stream: ByteStream = match length {
            Some(len) => Box::pin(ReaderStream::with_capacity(
                file.take(len),
                STREAM_CHUNK_SIZE,
            )),
            None => Box::pin(ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)),
        };
        Ok(stream)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.collapse_empty_dirs(&path, &self.root.join(bucket)).await;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
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
        let dest = self.part_path(upload_id, part_number)?;
        let (md5, _) = Self::write_atomic(&dest, super::backend::stream_of(data)).await?;
        Ok(md5)
    }

    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<String, StorageError> {
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = Self::temp_path(&dest);

        let result: Result<String, StorageError> = async {
            let mut out = tokio::fs::File::create(&tmp).await?;
            let mut hasher = Md5::new();
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            for &part_number in part_numbers {
                let part_path = self.part_path(upload_id, part_number)?;
                let mut part = match tokio::fs::File::open(&part_path).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StorageError::NotFound(format!(
                            "part {part_number} of upload {upload_id}"
                        )))
                    }
                    Err(e) => return Err(e.into()),
                };
                loop {
                    let n = part.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    out.write_all(&buf[..n]).await?;
                }
            }
            out.sync_all().await?;
            drop(out);
            tokio::fs::rename(&tmp, &dest).await?;
            Ok(hex::encode(hasher.finalize()))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }

    async fn delete_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        check_relative(upload_id)?;
        let dir = self.root.join(PARTS_DIR).join(upload_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<String, StorageError> {
        debug!(%src_bucket, %src_key, %dst_bucket, %dst_key, "copy object");
        let data = self.get(src_bucket, src_key).await?;
        self.put(dst_bucket, dst_key, data).await
    }
}

// -- Tests -------------------------------------------------------------------
