//! Record types and the metadata store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// -- ACL model ---------------------------------------------------------------

/// An S3 access control list, persisted as JSON inside bucket and object
/// rows.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Acl {
    #[serde(default)]
    pub owner: AclOwner,
    #[serde(default)]
    pub grants: Vec<AclGrant>,
}

/// Owner portion of an ACL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclOwner {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

/// A single grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclGrant {
    pub grantee: AclGrantee,
    pub permission: String,
}

/// The receiving side of a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AclGrantee {
    CanonicalUser {
        id: String,
        #[serde(default)]
        display_name: String,
    },
    Group {
        uri: String,
    },
}

impl Acl {
    /// The default ACL: owner with FULL_CONTROL and nothing else.
    pub fn full_control(owner_id: &str, display_name: &str) -> Self {
        Acl {
            owner: AclOwner {
                id: owner_id.to_string(),
                display_name: display_name.to_string(),
            },
            grants: vec![AclGrant {
                grantee: AclGrantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: display_name.to_string(),
                },
                permission: "FULL_CONTROL".to_string(),
            }],
        }
    }

    /// Serialize for storage; an ACL that fails to serialize becomes `{}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// -- Records -----------------------------------------------------------------

/// A stored credential for SigV4 verification.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub access_key_id: String,
    pub secret_key: String,
    pub owner_id: String,
    pub display_name: String,
    pub active: bool,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

/// A bucket row.
#[derive(Debug, Clone)]
pub struct BucketRecord {
    pub name: String,
    pub region: String,
    pub owner_id: String,
    pub owner_display: String,
    /// JSON-serialized [`Acl`].
    pub acl: String,
    pub created_at: String,
}

/// An object row. The row, not the bytes on disk, is the system of record.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Quoted ETag, e.g. `"d41d8cd98f00b204e9800998ecf8427e"` or the
    /// multipart composite `"<hex>-<N>"`.
    pub etag: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub storage_class: String,
    pub acl: String,
    pub user_metadata: HashMap<String, String>,
    pub last_modified: String,
    pub delete_marker: bool,
}

/// An in-progress multipart upload, carrying the headers destined for the
/// final object.
#[derive(Debug, Clone)]
pub struct MultipartUploadRecord {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub storage_class: String,
    pub acl: String,
    pub user_metadata: HashMap<String, String>,
    pub owner_id: String,
    pub owner_display: String,
    pub initiated_at: String,
}

/// One uploaded part of a multipart upload.
#[derive(Debug, Clone)]
pub struct PartRecord {
    /// 1-based part number, at most 10000.
    pub part_number: u32,
    pub size: u64,
    /// Quoted hex-MD5 ETag of the part body.
    pub etag: String,
    pub last_modified: String,
}

// -- Results -----------------------------------------------------------------

/// Outcome of `delete_bucket`: the emptiness check and the row removal
/// happen in one transaction, so the caller learns which way it went
/// without a second racey query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketDeletion {
    Removed,
    NotEmpty,
    Missing,
}

/// Result of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectRecord>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// The last emitted entry (key or common prefix); the handler turns it
    /// into `NextMarker` / `NextContinuationToken`.
    pub next_cursor: Option<String>,
}

/// Result of listing in-progress multipart uploads.
#[derive(Debug, Clone, Default)]
pub struct ListUploadsResult {
    pub uploads: Vec<MultipartUploadRecord>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Result of listing parts of one upload.
#[derive(Debug, Clone, Default)]
pub struct ListPartsResult {
    pub parts: Vec<PartRecord>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

// -- Contract ----------------------------------------------------------------

/// The metadata store contract.
///
/// All multi-row mutations are transactional in every implementation;
/// `complete_multipart_upload` in particular either applies all three of
/// its effects (object upsert, part deletion, upload deletion) or none.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    // -- Buckets --

    async fn create_bucket(&self, record: BucketRecord) -> anyhow::Result<()>;

    async fn get_bucket(&self, name: &str) -> anyhow::Result<Option<BucketRecord>>;

    async fn bucket_exists(&self, name: &str) -> anyhow::Result<bool>;

    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketRecord>>;

    /// Remove a bucket iff it holds no objects and no in-progress uploads.
    async fn delete_bucket(&self, name: &str) -> anyhow::Result<BucketDeletion>;

    async fn update_bucket_acl(&self, name: &str, acl: &str) -> anyhow::Result<()>;

    // -- Objects --

    /// Insert or replace an object row (PUT is upsert).
    async fn put_object(&self, record: ObjectRecord) -> anyhow::Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Option<ObjectRecord>>;

    async fn object_exists(&self, bucket: &str, key: &str) -> anyhow::Result<bool>;

    /// Shared prefix/delimiter listing; `cursor` is the raw start-after
    /// entry (a key or a previously emitted common prefix).
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        cursor: &str,
    ) -> anyhow::Result<ListObjectsResult>;

    /// Idempotent: deleting an absent row succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()>;

    async fn update_object_acl(&self, bucket: &str, key: &str, acl: &str) -> anyhow::Result<()>;

    // -- Multipart uploads --

    async fn create_multipart_upload(&self, record: MultipartUploadRecord) -> anyhow::Result<()>;

    async fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> anyhow::Result<Option<MultipartUploadRecord>>;

    /// Insert or replace a part row (re-upload of a part number is upsert).
    async fn put_part(&self, upload_id: &str, part: PartRecord) -> anyhow::Result<()>;

    async fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> anyhow::Result<ListPartsResult>;

    /// All parts of an upload in ascending part-number order, for
    /// completion validation.
    async fn parts_for_completion(&self, upload_id: &str) -> anyhow::Result<Vec<PartRecord>>;

    /// Atomically: upsert the final object row, delete all part rows,
    /// delete the upload row.
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> anyhow::Result<()>;

    /// Remove an upload and its parts (abort). Idempotent.
    async fn abort_multipart_upload(&self, upload_id: &str) -> anyhow::Result<()>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> anyhow::Result<ListUploadsResult>;

    /// Delete uploads (and their parts) whose `initiated_at` is older than
    /// `ttl_seconds`, returning `(upload_id, bucket, key)` for each so the
    /// caller can clean the byte plane.
    async fn reap_expired_uploads(
        &self,
        ttl_seconds: u64,
    ) -> anyhow::Result<Vec<(String, String, String)>>;

    // -- Credentials --

    async fn get_credential(
        &self,
        access_key_id: &str,
    ) -> anyhow::Result<Option<CredentialRecord>>;

    async fn put_credential(&self, record: CredentialRecord) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_control_acl_shape() {
        let acl = Acl::full_control("owner-1", "Owner One");
        assert_eq!(acl.owner.id, "owner-1");
        assert_eq!(acl.grants.len(), 1);
        assert_eq!(acl.grants[0].permission, "FULL_CONTROL");
    }

    #[test]
    fn acl_json_round_trip() {
        let acl = Acl::full_control("owner-1", "Owner One");
        let json = acl.to_json();
        let back: Acl = serde_json::from_str(&json).unwrap();
        assert_eq!(back.owner.id, "owner-1");
        match &back.grants[0].grantee {
            AclGrantee::CanonicalUser { id, .. } => assert_eq!(id, "owner-1"),
            other => panic!("unexpected grantee {other:?}"),
        }
    }

    #[test]
    fn grantee_json_tags() {
        let group = AclGrantee::Group {
            uri: "http://acs.amazonaws.com/groups/global/AllUsers".into(),
        };
        let json = serde_json::to_string(&group).unwrap();
        assert!(json.contains("\"type\":\"Group\""));
    }
}
