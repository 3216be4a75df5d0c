//! # Bastion - verification-challenge service
//!
//! Issues and validates challenges backed by a short-lived cache entry per
//! challenge. Configuration is hot-reloadable: a file change or a pushed
//! update re-rates the limiter, re-levels logging, and swaps the cache
//! backend without a restart.
//!
//! ## Architecture
//! ```text
//! config file ──► ConfigWatcher ─┐
//! manage API ────────────────────┼─► ConfigStore ──► hooks ─┬─► RateLimiter
//!                                                           ├─► CacheManager (swap)
//!                                                           └─► log filter
//! request ──► RateLimiter ──► handler ──► CircuitBreaker ──► active backend
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use bastion_common::constants::{DEFAULT_LOG_LEVEL, SHUTDOWN_GRACE_SECS};

use bastion::config::{AppConfig, CacheType, ConfigOverrides};
use bastion::logging::{self, LogLevelHook};
use bastion::reload::ConfigWatcher;
use bastion::routes;
use bastion::state::{AppState, hook_keys};
use bastion::store::{ConfigStore, ReloadSource};

/// Bastion - verification-challenge service
#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long, default_value = "config.json", env = "CONFIG")]
    config: PathBuf,

    #[arg(long, env = "SERVICE_NAME")]
    service_name: Option<String>,

    #[arg(long, env = "HTTP_PORT")]
    http_port: Option<String>,

    #[arg(long, env = "GRPC_PORT")]
    grpc_port: Option<String>,

    /// Cache backend (memory, redis)
    #[arg(long, env = "CACHE_TYPE")]
    cache_type: Option<CacheType>,

    /// Comma separated cache addresses
    #[arg(long, env = "CACHE_ADDRS")]
    cache_addrs: Option<String>,

    #[arg(long, env = "CACHE_USERNAME")]
    cache_username: Option<String>,

    #[arg(long, env = "CACHE_PASSWORD", hide_env_values = true)]
    cache_password: Option<String>,

    /// Cache entry TTL in seconds
    #[arg(long, env = "CACHE_TTL")]
    cache_ttl: Option<i64>,

    #[arg(long, env = "CACHE_KEY_PREFIX")]
    cache_key_prefix: Option<String>,

    #[arg(long, env = "RATE_LIMIT_QPS")]
    rate_limit_qps: Option<i64>,

    #[arg(long, env = "RATE_LIMIT_BURST")]
    rate_limit_burst: Option<i64>,

    /// Comma separated API keys for management endpoints
    #[arg(long, env = "API_KEYS", hide_env_values = true)]
    api_keys: Option<String>,

    /// Log level (error, warn, info, debug, trace, none)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "ENABLE_CORS")]
    enable_cors: bool,

    #[arg(long, env = "ENABLE_DYNAMIC_CONFIG")]
    enable_dynamic_config: bool,

    #[arg(long, env = "ENABLE_SERVICE_DISCOVERY")]
    enable_service_discovery: bool,

    /// Enable JSON logging output
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Probe the configured HTTP port and exit 0 (up) or 1 (down)
    #[arg(long)]
    health_check: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            service_name: self.service_name.clone(),
            http_port: self.http_port.clone(),
            grpc_port: self.grpc_port.clone(),
            cache_type: self.cache_type,
            cache_addrs: self.cache_addrs.clone(),
            cache_username: self.cache_username.clone(),
            cache_password: self.cache_password.clone(),
            cache_ttl: self.cache_ttl,
            cache_key_prefix: self.cache_key_prefix.clone(),
            rate_limit_qps: self.rate_limit_qps,
            rate_limit_burst: self.rate_limit_burst,
            api_keys: self.api_keys.clone(),
            log_level: self.log_level.clone(),
            enable_cors: self.enable_cors,
            enable_dynamic_config: self.enable_dynamic_config,
            enable_service_discovery: self.enable_service_discovery,
        }
    }

    fn load_config(&self) -> AppConfig {
        let mut config = AppConfig::load_or_default(&self.config);
        config.apply_overrides(&self.overrides());
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    if args.health_check {
        let healthy = health_probe(&args.load_config().http_port).await;
        std::process::exit(if healthy { 0 } else { 1 });
    }

    // Initialize logging; the configured level is applied by the first update
    let log_handle = init_logging(&args)?;

    info!("🛡️ Starting Bastion v{}", env!("CARGO_PKG_VERSION"));

    let config = args.load_config();
    let store = Arc::new(ConfigStore::new(AppConfig::default()).context("Invalid default configuration")?);

    if let Some(handle) = log_handle {
        let initial = args.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
        store.register_hook(hook_keys::LOG_LEVEL, Arc::new(LogLevelHook::new(handle, initial)));
    }

    store
        .update(config, ReloadSource::LocalFile)
        .await
        .context("Invalid configuration")?;
    let config = store.get();
    info!(path = %args.config.display(), version = config.config_version, "📋 Configuration loaded");

    if config.enable_service_discovery {
        warn!("Service discovery is enabled but not supported by this build, ignoring");
    }

    // Cache backend and resilience layer; failing here aborts startup
    let state = AppState::new(store.clone()).await?;
    info!(cache_type = %config.cache_type, "✅ Cache backend ready");

    let watcher = if args.config.exists() {
        Some(ConfigWatcher::new(&args.config).spawn(store.clone())?)
    } else {
        warn!(path = %args.config.display(), "Config file not found, hot reload from file disabled");
        None
    };

    // Build router
    let app = routes::create_router(state.clone(), config.enable_cors);

    // Start server
    let listen_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!("🚀 Bastion listening on {}", listen_addr);

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = drain_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result.context("Server task failed")?.context("Server error")?;
        }
        _ = shutdown_signal() => {
            info!("🛑 Shutdown signal received");
            let _ = drain_tx.send(());

            match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), &mut server).await {
                Ok(result) => result.context("Server task failed")?.context("Server error")?,
                Err(_) => {
                    warn!("Connections still open after grace period, forcing shutdown");
                    server.abort();
                }
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    state.shutdown().await;

    info!("👋 Bastion shutdown complete");
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<logging::FilterHandle>> {
    let level = args.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    logging::init_logging(level, args.json_logs)
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// TCP connect to the local HTTP port
async fn health_probe(port: &str) -> bool {
    let addr = format!("127.0.0.1:{port}");
    matches!(
        tokio::time::timeout(Duration::from_secs(3), tokio::net::TcpStream::connect(&addr)).await,
        Ok(Ok(_))
    )
}
