//! formsync-server: response reconciliation and progress synchronization service
//!
//! Serves the assessment write endpoints, bulk operations, progress snapshots
//! and the SSE change feed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use formsync_common::config::{load_or_default, resolve_config_path};
use formsync_common::CatalogSet;
use formsync_server::config::{ConfigOverrides, ServerConfig};
use formsync_server::{build_router, db, AppState};

/// Command-line arguments for formsync-server
#[derive(Parser, Debug)]
#[command(name = "formsync-server")]
#[command(about = "Form response reconciliation and progress synchronization service")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "FORMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FORMSYNC_PORT")]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long, env = "FORMSYNC_BIND_ADDR")]
    bind_addr: Option<String>,

    /// SQLite database file
    #[arg(long, env = "FORMSYNC_DATABASE")]
    database: Option<PathBuf>,

    /// JSON field catalog replacing the built-in catalogs
    #[arg(long, env = "FORMSYNC_CATALOG")]
    catalog: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "FORMSYNC_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_path: self.database.clone(),
            bind_addr: self.bind_addr.clone(),
            port: self.port,
            catalog_path: self.catalog.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config file path is needed before logging; errors are reported after init
    let config_path = resolve_config_path(args.config.as_deref(), "FORMSYNC_CONFIG", "server.toml");
    let loaded: formsync_common::Result<ServerConfig> = load_or_default(config_path.as_deref());
    let level = args.log_level.clone().unwrap_or_else(|| {
        loaded
            .as_ref()
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("formsync_server={level},formsync_common={level},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = loaded
        .context("Failed to load configuration")?
        .with_overrides(args.overrides());

    info!(
        "Starting formsync-server v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let catalogs = match &config.catalog_path {
        Some(path) => {
            let catalogs = CatalogSet::from_json_file(path)
                .with_context(|| format!("Failed to load catalog {}", path.display()))?;
            info!("Field catalog: {}", path.display());
            catalogs
        }
        None => {
            info!("Field catalog: built-in");
            CatalogSet::builtin()
        }
    };

    info!("Database: {}", config.database_path.display());
    let pool = db::init_database_pool(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::from_config(pool, catalogs, &config);
    let app = build_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
}
