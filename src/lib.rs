//! BleepStore library — S3-compatible object storage engine.
//!
//! The crate is layered leaves-first: a byte-plane [`storage`] backend and a
//! relation-plane [`metadata`] store, composed by the operation [`handlers`]
//! behind a SigV4 [`auth`] gate, all wired into an axum router by [`server`].

use std::sync::Arc;

pub mod auth;
pub mod aws_chunked;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod serialization;
pub mod server;
pub mod storage;
pub mod util;
pub mod validation;
pub mod xml;

use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::storage::backend::StorageBackend;

/// Shared application state handed to every handler via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Metadata store (buckets, objects, uploads, parts, credentials).
    pub metadata: Arc<dyn MetadataStore>,
    /// Object byte storage backend.
    pub storage: Arc<dyn StorageBackend>,
    /// Credential and signing-key cache for SigV4 verification.
    pub auth_cache: auth::AuthCache,
}
