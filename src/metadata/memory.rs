//! In-memory metadata store.
//!
//! No persistence; everything lives in `RwLock`-guarded maps. Backs tests
//! and ephemeral deployments. Objects sit in per-bucket `BTreeMap`s so the
//! listing walk shares the lexicographic-order contract with the SQLite
//! engine for free.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};

use super::list::{collapse, ListParams};
use super::store::{
    BucketDeletion, BucketRecord, CredentialRecord, ListObjectsResult, ListPartsResult,
    ListUploadsResult, MetadataStore, MultipartUploadRecord, ObjectRecord, PartRecord,
};
use crate::util::now_iso8601;

#[derive(Default)]
struct Tables {
    buckets: BTreeMap<String, BucketRecord>,
    /// bucket -> key -> record
    objects: HashMap<String, BTreeMap<String, ObjectRecord>>,
    uploads: HashMap<String, MultipartUploadRecord>,
    /// upload_id -> part_number -> record
    parts: HashMap<String, BTreeMap<u32, PartRecord>>,
    credentials: HashMap<String, CredentialRecord>,
}

/// Metadata engine holding everything in process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the configured default credential; a prior row wins.
    pub fn seed_credential(&self, access_key: &str, secret_key: &str) -> anyhow::Result<()> {
        let mut t = self.write();
        t.credentials
            .entry(access_key.to_string())
            .or_insert_with(|| CredentialRecord {
                access_key_id: access_key.to_string(),
                secret_key: secret_key.to_string(),
                owner_id: access_key.to_string(),
                display_name: access_key.to_string(),
                active: true,
                created_at: now_iso8601(),
            });
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("metadata lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("metadata lock poisoned")
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_bucket(&self, record: BucketRecord) -> anyhow::Result<()> {
        let mut t = self.write();
        if t.buckets.contains_key(&record.name) {
            anyhow::bail!("bucket {} already exists", record.name);
        }
        t.buckets.insert(record.name.clone(), record);
        Ok(())
    }

    async fn get_bucket(&self, name: &str) -> anyhow::Result<Option<BucketRecord>> {
        Ok(self.read().buckets.get(name).cloned())
    }

    async fn bucket_exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.read().buckets.contains_key(name))
    }

    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketRecord>> {
        Ok(self.read().buckets.values().cloned().collect())
    }

    async fn delete_bucket(&self, name: &str) -> anyhow::Result<BucketDeletion> {
        let mut t = self.write();
        if !t.buckets.contains_key(name) {
            return Ok(BucketDeletion::Missing);
        }
        let has_objects = t.objects.get(name).map(|m| !m.is_empty()).unwrap_or(false);
        let has_uploads = t.uploads.values().any(|u| u.bucket == name);
        if has_objects || has_uploads {
            return Ok(BucketDeletion::NotEmpty);
        }
        t.buckets.remove(name);
        t.objects.remove(name);
        Ok(BucketDeletion::Removed)
    }

    async fn update_bucket_acl(&self, name: &str, acl: &str) -> anyhow::Result<()> {
        if let Some(bucket) = self.write().buckets.get_mut(name) {
            bucket.acl = acl.to_string();
        }
        Ok(())
    }

    async fn put_object(&self, record: ObjectRecord) -> anyhow::Result<()> {
        let mut t = self.write();
        t.objects
            .entry(record.bucket.clone())
            .or_default()
            .insert(record.key.clone(), record);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Option<ObjectRecord>> {
        Ok(self
            .read()
            .objects
            .get(bucket)
            .and_then(|m| m.get(key))
            .cloned())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> anyhow::Result<bool> {
        Ok(self
            .read()
            .objects
            .get(bucket)
            .map(|m| m.contains_key(key))
            .unwrap_or(false))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        cursor: &str,
    ) -> anyhow::Result<ListObjectsResult> {
        let t = self.read();
        let empty = BTreeMap::new();
        let keys = t.objects.get(bucket).unwrap_or(&empty);

        let list_params = ListParams {
            prefix,
            delimiter,
            max_keys,
            cursor,
        };
        let collapsed = collapse(&list_params, |after, limit| {
            let floor = if after.as_bytes() < prefix.as_bytes() {
                // Jump straight to the prefix range; the collapse still
                // requires key > after, which holds for every prefixed key.
                Bound::Included(prefix.to_string())
            } else {
                Bound::Excluded(after.to_string())
            };
            Ok::<_, std::convert::Infallible>(
                keys.range((floor, Bound::Unbounded))
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        })
        .expect("infallible");

        Ok(ListObjectsResult {
            objects: collapsed.records,
            common_prefixes: collapsed.common_prefixes,
            is_truncated: collapsed.is_truncated,
            next_cursor: collapsed.next_cursor,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        if let Some(m) = self.write().objects.get_mut(bucket) {
            m.remove(key);
        }
        Ok(())
    }

    async fn update_object_acl(&self, bucket: &str, key: &str, acl: &str) -> anyhow::Result<()> {
        if let Some(record) = self
            .write()
            .objects
            .get_mut(bucket)
            .and_then(|m| m.get_mut(key))
        {
            record.acl = acl.to_string();
        }
        Ok(())
    }

    async fn create_multipart_upload(&self, record: MultipartUploadRecord) -> anyhow::Result<()> {
        self.write()
            .uploads
            .insert(record.upload_id.clone(), record);
        Ok(())
    }

    async fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> anyhow::Result<Option<MultipartUploadRecord>> {
        Ok(self.read().uploads.get(upload_id).cloned())
    }

    async fn put_part(&self, upload_id: &str, part: PartRecord) -> anyhow::Result<()> {
        self.write()
            .parts
            .entry(upload_id.to_string())
            .or_default()
            .insert(part.part_number, part);
        Ok(())
    }

    async fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> anyhow::Result<ListPartsResult> {
        let t = self.read();
        let empty = BTreeMap::new();
        let all = t.parts.get(upload_id).unwrap_or(&empty);
        let mut parts: Vec<PartRecord> = all
            .range((Bound::Excluded(part_number_marker), Bound::Unbounded))
            .take(max_parts as usize + 1)
            .map(|(_, p)| p.clone())
            .collect();

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
        Ok(self
            .read()
            .parts
            .get(upload_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> anyhow::Result<()> {
        // A single write lock makes the three effects atomic.
        let mut t = self.write();
        t.objects
            .entry(final_object.bucket.clone())
            .or_default()
            .insert(final_object.key.clone(), final_object);
        t.parts.remove(upload_id);
        t.uploads.remove(upload_id);
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> anyhow::Result<()> {
        let mut t = self.write();
        t.parts.remove(upload_id);
        t.uploads.remove(upload_id);
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
        let t = self.read();
        let mut uploads: Vec<MultipartUploadRecord> = t
            .uploads
            .values()
            .filter(|u| u.bucket == bucket && u.key.starts_with(prefix))
            .filter(|u| {
                u.key.as_str() > key_marker
                    || (u.key == key_marker && u.upload_id.as_str() > upload_id_marker)
            })
            .cloned()
            .collect();
        uploads.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

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
        let cutoff = (Utc::now() - Duration::seconds(ttl_seconds as i64))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut t = self.write();
        let expired: Vec<(String, String, String)> = t
            .uploads
            .values()
            .filter(|u| u.initiated_at < cutoff)
            .map(|u| (u.upload_id.clone(), u.bucket.clone(), u.key.clone()))
            .collect();
        for (upload_id, _, _) in &expired {
            t.uploads.remove(upload_id);
            t.parts.remove(upload_id);
        }
        Ok(expired)
    }

    async fn get_credential(
        &self,
        access_key_id: &str,
    ) -> anyhow::Result<Option<CredentialRecord>> {
        Ok(self
            .read()
            .credentials
            .get(access_key_id)
            .filter(|c| c.active)
            .cloned())
    }

    async fn put_credential(&self, record: CredentialRecord) -> anyhow::Result<()> {
        self.write()
            .credentials
            .insert(record.access_key_id.clone(), record);
        Ok(())
    }
}
