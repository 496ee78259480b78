//! s3proxy server - read-only HTTP gateway in front of an S3 bucket.
//!
//! Objects are addressed by path (`GET /path/to/key`) and streamed to the
//! client chunk by chunk, with single-range `Range` support.
//!
//! # Usage
//!
//! ```text
//! S3_ENDPOINT=localhost:9000 S3_BUCKET=media s3proxy-server
//! ```
//!
//! # Configuration
//!
//! Settings are read from a YAML file first (see
//! [`s3proxy_core::config`] for its layout) and any environment variable
//! below that is set and non-empty overrides the file. The file is named by
//! `S3_HTTP_PROXY_CONFIG_FILE`; when that is unset, `config.yml` in the
//! working directory is read if it exists.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `S3_HTTP_PROXY_CONFIG_FILE` | `config.yml` | YAML configuration file |
//! | `S3_ENDPOINT` | `localhost:9000` | Backend `host[:port]`, or `memory://` |
//! | `S3_REGION` | `us-east-1` | Signing region |
//! | `S3_BUCKET` | *(required)* | Bucket to serve |
//! | `S3_TLS` | `false` | Reach the backend over https |
//! | `S3_ACCESS_KEY` / `S3_SECRET_KEY` | *(unset)* | Backend credentials |
//! | `SERVER_ADDRESS` | `0.0.0.0` | Bind address |
//! | `SERVER_PORT` | `8080` | Bind port |
//! | `BASIC_AUTH_FILE` | *(unset)* | YAML `user: password` map (JSON also accepted) |
//! | `TLS_CERTIFICATE` / `TLS_KEY` | *(unset)* | PEM files for the listener |
//! | `READ_BUFFER_SIZE` | `262144` | Bytes per backend read |
//! | `DEBUG_MODE` | `false` | Force debug logging |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::sync::Arc;

use anyhow::{Context, Result};
use s3proxy_auth::BasicAuthAccounts;
use s3proxy_client::{S3ClientConfig, S3ObjectStore};
use s3proxy_core::{InMemoryObjectStore, ObjectStore, ProxyConfig};
use s3proxy_http::{ProxyService, Server, ServerConfig, ShutdownTrigger, StreamHandler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the configured level.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Build the object store the gateway reads from.
fn build_store(config: &ProxyConfig) -> Result<Arc<dyn ObjectStore>> {
    if config.uses_memory_backend() {
        warn!(
            bucket = %config.s3_bucket,
            "serving an empty in-memory bucket; set S3_ENDPOINT to reach a real backend"
        );
        return Ok(Arc::new(InMemoryObjectStore::new(config.s3_bucket.clone())));
    }

    let store = S3ObjectStore::new(S3ClientConfig::from_proxy_config(config))
        .context("failed to build S3 backend client")?;
    Ok(Arc::new(store))
}

/// Build the HTTP service, with basic auth when an accounts file is configured.
fn build_service(config: &ProxyConfig, store: Arc<dyn ObjectStore>) -> Result<ProxyService> {
    let service = ProxyService::new(StreamHandler::new(store, config.read_buffer_size));
    let Some(path) = &config.basic_auth_file else {
        return Ok(service);
    };

    let accounts = BasicAuthAccounts::from_file(path)
        .with_context(|| format!("failed to load basic auth accounts from {path}"))?;
    if accounts.is_empty() {
        warn!(path = %path, "basic auth file has no accounts; authentication disabled");
    } else {
        info!(users = accounts.len(), "basic authentication enabled");
    }
    Ok(service.with_basic_auth(accounts))
}

/// Trigger a graceful shutdown on SIGTERM or SIGINT.
async fn watch_signals(trigger: ShutdownTrigger) {
    let name = wait_for_signal().await;
    info!("Caught signal {name}. Terminating.");
    trigger.trigger();
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("failed to install signal handlers, falling back to ctrl-c");
        tokio::signal::ctrl_c().await.ok();
        return "SIGINT";
    };

    tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    tokio::signal::ctrl_c().await.ok();
    "SIGINT"
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProxyConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    init_tracing(config.effective_log_level())?;

    info!(
        s3_endpoint = %config.s3_endpoint,
        s3_bucket = %config.s3_bucket,
        s3_tls = config.s3_tls,
        signed = config.s3_access_key.is_some(),
        server_address = %config.server_address,
        server_port = config.server_port,
        tls = config.tls_certificate.is_some(),
        version = VERSION,
        "starting s3proxy server",
    );

    let store = build_store(&config)?;
    let service = build_service(&config, store)?;
    let handle = Server::new(ServerConfig::from_proxy_config(&config), service)
        .start()
        .await
        .context("failed to start server")?;

    tokio::spawn(watch_signals(handle.shutdown_trigger()));

    handle.wait().await.context("server stopped with an error")?;
    info!("server stopped");
    Ok(())
}
