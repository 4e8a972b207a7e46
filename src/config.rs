//! Configuration loading and types.
//!
//! Configuration is read from a YAML file and deserialized into [`Config`].
//! Each subsection governs one part of the system: networking, SigV4
//! authentication, metadata persistence, object storage, logging, and
//! observability.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// AWS region to present (e.g. `us-east-1`).
    #[serde(default = "default_region")]
    pub region: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum object size in bytes (default 5 GiB).
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Age in seconds after which an in-progress multipart upload is
    /// reaped, parts and all (default 7 days).
    #[serde(default = "default_multipart_ttl")]
    pub multipart_ttl: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            shutdown_timeout: default_shutdown_timeout(),
            max_object_size: default_max_object_size(),
            multipart_ttl: default_multipart_ttl(),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Access key ID of the default credential (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default = "default_access_key")]
    pub access_key: String,

    /// Secret key of the default credential (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default = "default_secret_key")]
    pub secret_key: String,

    /// When false, every request is accepted as the default owner.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            enabled: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings. Both surfaces are on by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable `/healthz` and `/readyz` probes and deep `/health` checks.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Engine name: `sqlite` or `memory`. Other engine names from the
    /// wider family (`dynamodb`, `firestore`, `cosmos`) parse but fail at
    /// construction with a clear error.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteMetaConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteMetaConfig::default(),
        }
    }
}

/// SQLite metadata engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteMetaConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteMetaConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend name: `local`, `memory`, `sqlite`, or `aws`. `gcp` and
    /// `azure` parse but fail at construction.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local filesystem backend configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// SQLite blob backend configuration.
    #[serde(default)]
    pub sqlite: SqliteStorageConfig,

    /// AWS S3 gateway configuration.
    #[serde(default)]
    pub aws: Option<AwsStorageConfig>,

    /// GCP gateway configuration (recognised, not built).
    #[serde(default)]
    pub gcp: Option<serde_yaml::Value>,

    /// Azure gateway configuration (recognised, not built).
    #[serde(default)]
    pub azure: Option<serde_yaml::Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            sqlite: SqliteStorageConfig::default(),
            aws: None,
            gcp: None,
            azure: None,
        }
    }
}

/// Local filesystem backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// SQLite blob backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStorageConfig {
    /// Path to the SQLite database file holding object and part blobs.
    #[serde(default = "default_blob_path")]
    pub path: String,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: default_blob_path(),
        }
    }
}

/// AWS S3 gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsStorageConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region of the backing bucket.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix inside the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit access key (falls back to the ambient credential chain).
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Explicit secret key (falls back to the ambient credential chain).
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_access_key() -> String {
    "bleepstore".to_string()
}

fn default_secret_key() -> String {
    "bleepstore-secret".to_string()
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_blob_path() -> String {
    "./data/objects.db".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_object_size() -> u64 {
    5_368_709_120 // 5 GiB
}

fn default_multipart_ttl() -> u64 {
    604_800 // 7 days
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9012);
        assert_eq!(cfg.server.region, "us-east-1");
        assert_eq!(cfg.server.max_object_size, 5 * 1024 * 1024 * 1024);
        assert!(cfg.auth.enabled);
        assert_eq!(cfg.metadata.engine, "sqlite");
        assert_eq!(cfg.storage.backend, "local");
        assert!(cfg.observability.metrics);
        assert!(cfg.observability.health_check);
    }

    #[test]
    fn auth_aliases_accepted() {
        let cfg: Config = serde_yaml::from_str(
            "auth:\n  access_key_id: AKID\n  secret_access_key: sekrit\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(cfg.auth.access_key, "AKID");
        assert_eq!(cfg.auth.secret_key, "sekrit");
        assert!(!cfg.auth.enabled);
    }

    #[test]
    fn storage_backend_sections_parse() {
        let yaml = r#"
storage:
  backend: aws
  aws:
    bucket: upstream
    region: eu-west-1
    prefix: "bleep/"
    use_path_style: true
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.storage.backend, "aws");
        let aws = cfg.storage.aws.unwrap();
        assert_eq!(aws.bucket, "upstream");
        assert_eq!(aws.region, "eu-west-1");
        assert!(aws.use_path_style);
    }

    #[test]
    fn unknown_gateway_sections_are_tolerated() {
        let yaml = "storage:\n  backend: gcp\n  gcp:\n    bucket: g\n    project: p\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.storage.backend, "gcp");
        assert!(cfg.storage.gcp.is_some());
    }

    #[test]
    fn multipart_ttl_override() {
        let cfg: Config = serde_yaml::from_str("server:\n  multipart_ttl: 3600\n").unwrap();
        assert_eq!(cfg.server.multipart_ttl, 3600);
    }
}
