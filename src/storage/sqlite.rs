//! SQLite blob storage backend.
//!
//! Object bytes and multipart parts live as BLOBs in a single database
//! file — useful when one file should hold the whole deployment. Each
//! write is a single upsert inside a write transaction. Streaming reads
//! are logical only: the blob is materialised, then sliced into 64 KiB
//! chunks.

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use super::backend::{
    chunked_stream, collect_stream, md5_hex, ByteStream, StorageBackend, StorageError,
};

/// Object and part blobs in one SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and initialise both tables.
    /// `":memory:"` works for tests.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;

             CREATE TABLE IF NOT EXISTS object_data (
                 bucket TEXT NOT NULL,
                 key    TEXT NOT NULL,
                 data   BLOB NOT NULL,
                 etag   TEXT NOT NULL,
                 PRIMARY KEY (bucket, key)
             );

             CREATE TABLE IF NOT EXISTS part_data (
                 upload_id   TEXT NOT NULL,
                 part_number INTEGER NOT NULL,
                 data        BLOB NOT NULL,
                 etag        TEXT NOT NULL,
                 PRIMARY KEY (upload_id, part_number)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("storage mutex poisoned")
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, StorageError> {
        let etag = md5_hex(&data);
        let conn = self.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO object_data (bucket, key, data, etag)
             VALUES (?1, ?2, ?3, ?4)",
            params![bucket, key, data.as_ref(), etag],
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        tx.commit().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(etag)
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<(String, u64), StorageError> {
        // Blobs are written whole; gather the stream first.
        let data = collect_stream(body).await?;
        let size = data.len() as u64;
        let etag = self.put(bucket, key, data).await?;
        Ok((etag, size))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let conn = self.lock();
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM object_data WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        data.map(Bytes::from)
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
        let conn = self.lock();
        conn.execute(
            "DELETE FROM object_data WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM object_data WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(found.is_some())
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
        let conn = self.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO part_data (upload_id, part_number, data, etag)
             VALUES (?1, ?2, ?3, ?4)",
            params![upload_id, part_number, data.as_ref(), etag],
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        tx.commit().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(etag)
    }

    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<String, StorageError> {
        let conn = self.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut joined: Vec<u8> = Vec::new();
        let mut hasher = Md5::new();
        for &part_number in part_numbers {
            let data: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT data FROM part_data
                     WHERE upload_id = ?1 AND part_number = ?2",
                    params![upload_id, part_number],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let data = data.ok_or_else(|| {
                StorageError::NotFound(format!("part {part_number} of upload {upload_id}"))
            })?;
            hasher.update(&data);
            joined.extend_from_slice(&data);
        }

        let etag = hex::encode(hasher.finalize());
        tx.execute(
            "INSERT OR REPLACE INTO object_data (bucket, key, data, etag)
             VALUES (?1, ?2, ?3, ?4)",
            params![bucket, key, joined, etag],
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        tx.commit().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(etag)
    }

    async fn delete_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM part_data WHERE upload_id = ?1",
            params![upload_id],
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
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
