//! lcat-catalog - label catalog relationship resolution service
//!
//! Serves artists, releases, tracks and labels from a read-only SQL store,
//! falling back to a PostgREST-style proxy when the store cannot answer.

use anyhow::{Context, Result};
use clap::Parser;
use lcat_catalog::db::{self, Backend, QueryExecutor, RestBackend, SchemaInspector, SchemaProbe, SqlBackend};
use lcat_catalog::health::HealthReporter;
use lcat_catalog::resolve::CatalogResolver;
use lcat_catalog::{build_router, AppState};
use lcat_common::config::{load_toml_config, CatalogConfig, ConfigOverrides};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "lcat-catalog")]
#[command(about = "Label catalog relationship resolution service")]
#[command(version)]
struct Args {
    /// Primary store URL (sqlite:// or postgres://)
    #[arg(long, env = "LCAT_DATABASE_URL")]
    database_url: Option<String>,

    /// Base URL of the REST proxy (secondary backend)
    #[arg(long, env = "LCAT_REST_URL")]
    rest_url: Option<String>,

    /// API key for the REST proxy
    #[arg(long, env = "LCAT_REST_KEY", hide_env_values = true)]
    rest_key: Option<String>,

    /// Address to listen on
    #[arg(short, long, env = "LCAT_BIND")]
    bind: Option<String>,

    /// Per backend call timeout in milliseconds
    #[arg(long, env = "LCAT_QUERY_TIMEOUT_MS")]
    query_timeout_ms: Option<u64>,

    /// Primary pool size
    #[arg(long, env = "LCAT_MAX_CONNECTIONS")]
    max_connections: Option<u32>,

    /// Enable title/label/recent-sample fallbacks for artist releases
    #[arg(long, env = "LCAT_HEURISTIC_FALLBACKS")]
    heuristic_fallbacks: Option<bool>,

    /// TOML config file (default: <config_dir>/lcat/config.toml)
    #[arg(short, long, env = "LCAT_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_url: self.database_url.clone(),
            rest_url: self.rest_url.clone(),
            rest_key: self.rest_key.clone(),
            bind_addr: self.bind.clone(),
            query_timeout_ms: self.query_timeout_ms,
            max_connections: self.max_connections,
            heuristic_fallbacks: self.heuristic_fallbacks,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = load_toml_config(args.config.as_deref()).context("Failed to load config file")?;
    let config = CatalogConfig::resolve(args.overrides(), toml).context("Invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    // Build identification first, before any backend delays
    info!(
        "Starting lcat-catalog v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let pool = match db::connect_pool(&config.database_url, config.max_connections, config.query_timeout).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to configure primary store: {}", e);
            return Err(e.into());
        }
    };
    let primary = Arc::new(SqlBackend::new(pool.clone()));

    let secondary = match &config.rest {
        Some(rest) => {
            let backend = RestBackend::new(rest, config.query_timeout)
                .map_err(|e| anyhow::anyhow!("Failed to build REST client: {}", e))?;
            info!("Secondary backend: {}", rest.url);
            Some(Arc::new(backend))
        }
        None => {
            warn!("No REST proxy configured, running without a secondary backend");
            None
        }
    };

    let executor = QueryExecutor::new(
        primary.clone(),
        secondary.clone().map(|s| s as Arc<dyn Backend>),
        config.query_timeout,
    );
    let probe_secondary = secondary.map(|s| s as Arc<dyn SchemaProbe>);
    let inspector = SchemaInspector::new(primary.clone(), probe_secondary.clone(), config.query_timeout);
    let reporter = HealthReporter::new(primary, probe_secondary, executor.clone(), config.query_timeout);
    let resolver = CatalogResolver::new(executor, inspector, config.heuristic_fallbacks);
    if !config.heuristic_fallbacks {
        info!("Heuristic fallbacks disabled");
    }

    let shutdown = CancellationToken::new();
    let app = build_router(AppState::new(resolver, reporter, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("lcat-catalog listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel in-flight resolutions
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
