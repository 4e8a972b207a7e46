//! BleepStore — S3-compatible object storage server.
//!
//! Crash-only design: every startup is a recovery. The storage backend
//! sweeps interrupted writes, the metadata engine re-applies its schema,
//! and the default credential is re-seeded. Shutdown stops accepting
//! connections and drains in-flight requests; there is no cleanup pass.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use bleepstore::config::Config;
use bleepstore::metadata::store::MetadataStore;
use bleepstore::storage::backend::StorageBackend;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "bleepstore", version, about = "S3-compatible object storage server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bleepstore.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = bleepstore::config::load_config(&cli.config)?;

    init_tracing(&config);
    info!(config = %cli.config, "configuration loaded");

    if config.observability.metrics {
        bleepstore::metrics::init_metrics();
        bleepstore::metrics::describe_metrics();
        info!("prometheus metrics recorder installed");
    }

    let metadata = build_metadata(&config)?;
    let storage = build_storage(&config).await?;
    storage.init().await?;

    let state = Arc::new(bleepstore::AppState {
        config: config.clone(),
        metadata,
        storage,
        auth_cache: bleepstore::auth::AuthCache::new(),
    });

    spawn_upload_reaper(state.clone());

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "bleepstore listening");

    axum::serve(listener, bleepstore::server::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bleepstore shut down");
    Ok(())
}

/// Install the tracing subscriber per `logging.{level,format}`.
/// `RUST_LOG` wins when set.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Construct the configured metadata engine and seed the default
/// credential (idempotent).
fn build_metadata(config: &Config) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.metadata.engine.as_str() {
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = bleepstore::metadata::sqlite::SqliteMetadataStore::new(path)?;
            store.seed_credential(&config.auth.access_key, &config.auth.secret_key)?;
            info!(path = %path, "sqlite metadata engine ready");
            Ok(Arc::new(store))
        }
        "memory" => {
            let store = bleepstore::metadata::memory::MemoryMetadataStore::new();
            store.seed_credential(&config.auth.access_key, &config.auth.secret_key)?;
            info!("memory metadata engine ready");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("metadata engine '{other}' is not built into this binary"),
    }
}

/// Construct the configured storage backend.
async fn build_storage(config: &Config) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.storage.backend.as_str() {
        "local" => {
            let root = &config.storage.local.root_dir;
            let backend = bleepstore::storage::local::LocalBackend::new(root)?;
            info!(root = %root, "local storage backend ready");
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!("memory storage backend ready");
            Ok(Arc::new(bleepstore::storage::memory::MemoryBackend::new()))
        }
        "sqlite" => {
            let path = &config.storage.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let backend = bleepstore::storage::sqlite::SqliteBackend::new(path)?;
            info!(path = %path, "sqlite storage backend ready");
            Ok(Arc::new(backend))
        }
        "aws" => {
            let aws = config.storage.aws.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 'aws' but storage.aws is missing")
            })?;
            let backend = bleepstore::storage::aws::AwsGatewayBackend::new(aws).await?;
            Ok(Arc::new(backend))
        }
        other => anyhow::bail!("storage backend '{other}' is not built into this binary"),
    }
}

/// Hourly sweep of expired multipart uploads: the metadata engine deletes
/// the rows transactionally and reports what it removed; the storage
/// backend then drops the orphaned part bytes. The first sweep runs at
/// startup — recovery, like everything else.
fn spawn_upload_reaper(state: Arc<bleepstore::AppState>) {
    let ttl = state.config.server.multipart_ttl;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            match state.metadata.reap_expired_uploads(ttl).await {
                Ok(reaped) => {
                    if !reaped.is_empty() {
                        info!(count = reaped.len(), "reaped expired multipart uploads");
                    }
                    for (upload_id, bucket, key) in reaped {
                        if let Err(e) =
                            state.storage.delete_parts(&bucket, &key, &upload_id).await
                        {
                            warn!(%upload_id, error = %e, "failed to drop reaped parts");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "upload reap failed"),
            }
        }
    });
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
