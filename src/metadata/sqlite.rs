//! SQLite-backed metadata store — the reference engine.
//!
//! Uses `rusqlite` with the `bundled` feature so no system library is
//! needed. WAL keeps readers concurrent with the single writer; a 5-second
//! busy timeout makes a second writer block rather than fail. The
//! connection lives behind a `Mutex` and every method completes its SQL
//! without awaiting, so no suspension happens inside a transaction.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::list::{collapse, ListParams};
use super::store::{
    BucketDeletion, BucketRecord, CredentialRecord, ListObjectsResult, ListPartsResult,
    ListUploadsResult, MetadataStore, MultipartUploadRecord, ObjectRecord, PartRecord,
};
use crate::util::now_iso8601;

/// Current schema version; bump alongside a migration.
const SCHEMA_VERSION: i64 = 1;

const OBJECT_COLUMNS: &str = "bucket, key, size, etag, content_type, content_encoding, \
     content_language, content_disposition, cache_control, expires, \
     storage_class, acl, user_metadata, last_modified, delete_marker";

const UPLOAD_COLUMNS: &str = "upload_id, bucket, key, content_type, content_encoding, \
     content_language, content_disposition, cache_control, expires, \
     storage_class, acl, user_metadata, owner_id, owner_display, initiated_at";

/// Metadata store backed by one SQLite database file.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialise the schema.
    /// `":memory:"` gives an in-memory database for tests.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create tables and indexes if missing. Idempotent: every startup is
    /// a recovery.
    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS buckets (
                name           TEXT PRIMARY KEY,
                region         TEXT NOT NULL DEFAULT 'us-east-1',
                owner_id       TEXT NOT NULL,
                owner_display  TEXT NOT NULL DEFAULT '',
                acl            TEXT NOT NULL DEFAULT '{}',
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS objects (
                bucket              TEXT NOT NULL,
                key                 TEXT NOT NULL,
                size                INTEGER NOT NULL,
                etag                TEXT NOT NULL,
                content_type        TEXT NOT NULL DEFAULT 'application/octet-stream',
                content_encoding    TEXT,
                content_language    TEXT,
                content_disposition TEXT,
                cache_control       TEXT,
                expires             TEXT,
                storage_class       TEXT NOT NULL DEFAULT 'STANDARD',
                acl                 TEXT NOT NULL DEFAULT '{}',
                user_metadata       TEXT NOT NULL DEFAULT '{}',
                last_modified       TEXT NOT NULL,
                delete_marker       INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (bucket, key),
                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_objects_bucket_key ON objects(bucket, key);

            CREATE TABLE IF NOT EXISTS multipart_uploads (
                upload_id           TEXT PRIMARY KEY,
                bucket              TEXT NOT NULL,
                key                 TEXT NOT NULL,
                content_type        TEXT NOT NULL DEFAULT 'application/octet-stream',
                content_encoding    TEXT,
                content_language    TEXT,
                content_disposition TEXT,
                cache_control       TEXT,
                expires             TEXT,
                storage_class       TEXT NOT NULL DEFAULT 'STANDARD',
                acl                 TEXT NOT NULL DEFAULT '{}',
                user_metadata       TEXT NOT NULL DEFAULT '{}',
                owner_id            TEXT NOT NULL,
                owner_display       TEXT NOT NULL DEFAULT '',
                initiated_at        TEXT NOT NULL,
                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_uploads_bucket_key
                ON multipart_uploads(bucket, key, upload_id);

            CREATE TABLE IF NOT EXISTS multipart_parts (
                upload_id      TEXT NOT NULL,
                part_number    INTEGER NOT NULL,
                size           INTEGER NOT NULL,
                etag           TEXT NOT NULL,
                last_modified  TEXT NOT NULL,
                PRIMARY KEY (upload_id, part_number),
                FOREIGN KEY (upload_id) REFERENCES multipart_uploads(upload_id)
                    ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS credentials (
                access_key_id  TEXT PRIMARY KEY,
                secret_key     TEXT NOT NULL,
                owner_id       TEXT NOT NULL,
                display_name   TEXT NOT NULL DEFAULT '',
                active         INTEGER NOT NULL DEFAULT 1,
                created_at     TEXT NOT NULL
            );",
        )?;

        let current: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();
        if current.unwrap_or(0) < SCHEMA_VERSION {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_iso8601()],
            )?;
        }
        Ok(())
    }

    /// Seed the configured default credential. Idempotent: an existing row
    /// for the access key is left untouched.
    pub fn seed_credential(&self, access_key: &str, secret_key: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO credentials
                (access_key_id, secret_key, owner_id, display_name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![access_key, secret_key, access_key, access_key, now_iso8601()],
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("metadata mutex poisoned")
    }
}

fn meta_to_json(meta: &HashMap<String, String>) -> String {
    serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string())
}

fn meta_from_json(json: &str) -> HashMap<String, String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let size: i64 = row.get(2)?;
    let user_metadata: String = row.get(12)?;
    let delete_marker: i64 = row.get(14)?;
    Ok(ObjectRecord {
        bucket: row.get(0)?,
        key: row.get(1)?,
        size: size as u64,
        etag: row.get(3)?,
        content_type: row.get(4)?,
        content_encoding: row.get(5)?,
        content_language: row.get(6)?,
        content_disposition: row.get(7)?,
        cache_control: row.get(8)?,
        expires: row.get(9)?,
        storage_class: row.get(10)?,
        acl: row.get(11)?,
        user_metadata: meta_from_json(&user_metadata),
        last_modified: row.get(13)?,
        delete_marker: delete_marker != 0,
    })
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<MultipartUploadRecord> {
    let user_metadata: String = row.get(11)?;
    Ok(MultipartUploadRecord {
        upload_id: row.get(0)?,
        bucket: row.get(1)?,
        key: row.get(2)?,
        content_type: row.get(3)?,
        content_encoding: row.get(4)?,
        content_language: row.get(5)?,
        content_disposition: row.get(6)?,
        cache_control: row.get(7)?,
        expires: row.get(8)?,
        storage_class: row.get(9)?,
        acl: row.get(10)?,
        user_metadata: meta_from_json(&user_metadata),
        owner_id: row.get(12)?,
        owner_display: row.get(13)?,
        initiated_at: row.get(14)?,
    })
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<PartRecord> {
    let size: i64 = row.get(1)?;
    Ok(PartRecord {
        part_number: row.get(0)?,
        size: size as u64,
        etag: row.get(2)?,
        last_modified: row.get(3)?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    // -- Buckets --

    async fn create_bucket(&self, record: BucketRecord) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO buckets (name, region, owner_id, owner_display, acl, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.name,
                record.region,
                record.owner_id,
                record.owner_display,
                record.acl,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    async fn get_bucket(&self, name: &str) -> anyhow::Result<Option<BucketRecord>> {
        let conn = self.lock();
        let bucket = conn
            .query_row(
                "SELECT name, region, owner_id, owner_display, acl, created_at
                 FROM buckets WHERE name = ?1",
                params![name],
                |row| {
                    Ok(BucketRecord {
                        name: row.get(0)?,
                        region: row.get(1)?,
                        owner_id: row.get(2)?,
                        owner_display: row.get(3)?,
                        acl: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(bucket)
    }

    async fn bucket_exists(&self, name: &str) -> anyhow::Result<bool> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM buckets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name, region, owner_id, owner_display, acl, created_at
             FROM buckets ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BucketRecord {
                name: row.get(0)?,
                region: row.get(1)?,
                owner_id: row.get(2)?,
                owner_display: row.get(3)?,
                acl: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn delete_bucket(&self, name: &str) -> anyhow::Result<BucketDeletion> {
        let conn = self.lock();
        // Emptiness check and row removal share one transaction so a
        // concurrent PUT cannot slip between them.
        let tx = conn.unchecked_transaction()?;

        let objects: i64 = tx.query_row(
            "SELECT COUNT(*) FROM objects WHERE bucket = ?1",
            params![name],
            |row| row.get(0),
        )?;
        let uploads: i64 = tx.query_row(
            "SELECT COUNT(*) FROM multipart_uploads WHERE bucket = ?1",
            params![name],
            |row| row.get(0),
        )?;
        if objects > 0 || uploads > 0 {
            tx.rollback()?;
            return Ok(BucketDeletion::NotEmpty);
        }

        let removed = tx.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(if removed == 0 {
            BucketDeletion::Missing
        } else {
            BucketDeletion::Removed
        })
    }

    async fn update_bucket_acl(&self, name: &str, acl: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE buckets SET acl = ?1 WHERE name = ?2",
            params![acl, name],
        )?;
        Ok(())
    }

    // -- Objects --

    async fn put_object(&self, record: ObjectRecord) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO objects ({OBJECT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                record.bucket,
                record.key,
                record.size as i64,
                record.etag,
                record.content_type,
                record.content_encoding,
                record.content_language,
                record.content_disposition,
                record.cache_control,
                record.expires,
                record.storage_class,
                record.acl,
                meta_to_json(&record.user_metadata),
                record.last_modified,
                record.delete_marker as i64,
            ],
        )?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Option<ObjectRecord>> {
        let conn = self.lock();
        let object = conn
            .query_row(
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket = ?1 AND key = ?2"),
                params![bucket, key],
                object_from_row,
            )
            .optional()?;
        Ok(object)
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> anyhow::Result<bool> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        cursor: &str,
    ) -> anyhow::Result<ListObjectsResult> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE bucket = ?1 AND key > ?2 AND key >= ?3
             ORDER BY key LIMIT ?4"
        ))?;

        let list_params = ListParams {
            prefix,
            delimiter,
            max_keys,
            cursor,
        };
        let collapsed = collapse(&list_params, |after, limit| {
            let rows = stmt.query_map(
                params![bucket, after, prefix, limit as i64],
                |row| {
                    let record = object_from_row(row)?;
                    Ok((record.key.clone(), record))
                },
            )?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        Ok(ListObjectsResult {
            objects: collapsed.records,
            common_prefixes: collapsed.common_prefixes,
            is_truncated: collapsed.is_truncated,
            next_cursor: collapsed.next_cursor,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM objects WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
        )?;
        Ok(())
    }

    async fn update_object_acl(&self, bucket: &str, key: &str, acl: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE objects SET acl = ?1 WHERE bucket = ?2 AND key = ?3",
            params![acl, bucket, key],
        )?;
        Ok(())
    }

    // -- Multipart uploads --

    async fn create_multipart_upload(&self, record: MultipartUploadRecord) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO multipart_uploads ({UPLOAD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                record.upload_id,
                record.bucket,
                record.key,
                record.content_type,
                record.content_encoding,
                record.content_language,
                record.content_disposition,
                record.cache_control,
                record.expires,
                record.storage_class,
                record.acl,
                meta_to_json(&record.user_metadata),
                record.owner_id,
                record.owner_display,
                record.initiated_at,
            ],
        )?;
        Ok(())
    }

    async fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> anyhow::Result<Option<MultipartUploadRecord>> {
        let conn = self.lock();
        let upload = conn
            .query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM multipart_uploads WHERE upload_id = ?1"),
                params![upload_id],
                upload_from_row,
            )
            .optional()?;
        Ok(upload)
    }

    async fn put_part(&self, upload_id: &str, part: PartRecord) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO multipart_parts
                (upload_id, part_number, size, etag, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                upload_id,
                part.part_number,
                part.size as i64,
                part.etag,
                part.last_modified,
            ],
        )?;
        Ok(())
    }

    async fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> anyhow::Result<ListPartsResult> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT part_number, size, etag, last_modified FROM multipart_parts
             WHERE upload_id = ?1 AND part_number > ?2
             ORDER BY part_number LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![upload_id, part_number_marker, max_parts as i64 + 1],
            part_from_row,
        )?;
        let mut parts = rows.collect::<Result<Vec<_>, _>>()?;

        let is_truncated = parts.len() > max_parts as usize;
        parts.truncate(max_parts as usize);
        let next_part_number_marker = if is_truncated {
            parts.last().map(|p| p.part_number)
        } else {
            None
        };
        Ok(ListPartsResult {
            parts,
            is_truncated,
            next_part_number_marker,
        })
    }

    async fn parts_for_completion(&self, upload_id: &str) -> anyhow::Result<Vec<PartRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT part_number, size, etag, last_modified FROM multipart_parts
             WHERE upload_id = ?1 ORDER BY part_number",
        )?;
        let rows = stmt.query_map(params![upload_id], part_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> anyhow::Result<()> {
        let conn = self.lock();
        // All three effects or none: the completed object appears exactly
        // when the upload and its parts disappear.
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO objects ({OBJECT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                final_object.bucket,
                final_object.key,
                final_object.size as i64,
                final_object.etag,
                final_object.content_type,
                final_object.content_encoding,
                final_object.content_language,
                final_object.content_disposition,
                final_object.cache_control,
                final_object.expires,
                final_object.storage_class,
                final_object.acl,
                meta_to_json(&final_object.user_metadata),
                final_object.last_modified,
                final_object.delete_marker as i64,
            ],
        )?;
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> anyhow::Result<ListUploadsResult> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
             WHERE bucket = ?1 AND key >= ?2
               AND (key > ?3 OR (key = ?3 AND upload_id > ?4))
             ORDER BY key, upload_id LIMIT ?5"
        ))?;
        let rows = stmt.query_map(
            params![
                bucket,
                prefix,
                key_marker,
                upload_id_marker,
                max_uploads as i64 + 1
            ],
            upload_from_row,
        )?;

        let mut uploads = Vec::new();
        for row in rows {
            let upload = row?;
            // Keys >= prefix that no longer share it are past the range.
            if !upload.key.starts_with(prefix) {
                break;
            }
            uploads.push(upload);
        }

        let is_truncated = uploads.len() > max_uploads as usize;
        uploads.truncate(max_uploads as usize);
        let (next_key_marker, next_upload_id_marker) = if is_truncated {
            match uploads.last() {
                Some(last) => (Some(last.key.clone()), Some(last.upload_id.clone())),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        Ok(ListUploadsResult {
            uploads,
            is_truncated,
            next_key_marker,
            next_upload_id_marker,
        })
    }

    async fn reap_expired_uploads(
        &self,
        ttl_seconds: u64,
    ) -> anyhow::Result<Vec<(String, String, String)>> {
        // The cutoff is rendered in the same ISO-8601 shape as
        // `initiated_at`, so string comparison is chronological.
        let cutoff = (Utc::now() - Duration::seconds(ttl_seconds as i64))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let expired: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT upload_id, bucket, key FROM multipart_uploads
                 WHERE initiated_at < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for (upload_id, _, _) in &expired {
            tx.execute(
                "DELETE FROM multipart_parts WHERE upload_id = ?1",
                params![upload_id],
            )?;
            tx.execute(
                "DELETE FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
            )?;
        }
        tx.commit()?;
        Ok(expired)
    }

    // -- Credentials --

    async fn get_credential(
        &self,
        access_key_id: &str,
    ) -> anyhow::Result<Option<CredentialRecord>> {
        let conn = self.lock();
        let credential = conn
            .query_row(
                "SELECT access_key_id, secret_key, owner_id, display_name, active, created_at
                 FROM credentials WHERE access_key_id = ?1 AND active = 1",
                params![access_key_id],
                |row| {
                    let active: i64 = row.get(4)?;
                    Ok(CredentialRecord {
                        access_key_id: row.get(0)?,
                        secret_key: row.get(1)?,
                        owner_id: row.get(2)?,
                        display_name: row.get(3)?,
                        active: active != 0,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(credential)
    }

    async fn put_credential(&self, record: CredentialRecord) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO credentials
                (access_key_id, secret_key, owner_id, display_name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.access_key_id,
                record.secret_key,
                record.owner_id,
                record.display_name,
                record.active as i64,
                record.created_at,
            ],
        )?;
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
