//! Depot edge node binary.

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::config::AppConfig;
use depot_origin::{CatalogFile, ChainOfRecord};
use depot_server::{AppState, BackgroundTasks, background, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - a content-addressed edge cache node
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    if config.admin.normalized_hash().is_none() {
        tracing::warn!("No admin token hash configured, admin endpoints are disabled");
    }

    depot_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let catalog: Arc<dyn ChainOfRecord> = Arc::new(
        CatalogFile::load(&config.catalog.path)
            .await
            .with_context(|| {
                format!("failed to load catalog from {}", config.catalog.path.display())
            })?,
    );
    tracing::info!(path = %config.catalog.path.display(), "Catalog loaded");

    let state = AppState::new(config.clone(), catalog)
        .await
        .context("failed to initialize application state")?;
    background::prepare(&state).await?;
    let tasks = BackgroundTasks::spawn(&state);
    tracing::info!("Background tasks spawned");

    let shutdown = state.node.shutdown_token();
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped, shutting down background tasks");
    tasks.shutdown().await;
    Ok(())
}

/// Load configuration from the file (if present) and `DEPOT_` variables.
fn load_config(args: &Args) -> Result<AppConfig> {
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();

    let has_config_file = config_path.exists();
    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    // DEPOT_CONFIG only names the file.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("DEPOT_") && key != "DEPOT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: depotd --config /path/to/depot.toml\n  \
             2. Environment variables: DEPOT_NODE__ID=edge-1 DEPOT_NODE__WORKER_ID=1 \
             DEPOT_STORAGE__PATH=/var/cache/depot depotd\n\n\
             See config/depot.example.toml for example configuration.\n\
             Set DEPOT_CONFIG env var to specify a default config file path."
        );
    }

    figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Resolve when an admin requests shutdown or the process receives Ctrl-C.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => tracing::info!("Shutdown requested via admin API"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                token.cancelled().await;
            }
        },
    }
}
