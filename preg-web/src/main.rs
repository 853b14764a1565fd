//! preg-web - People registration service
//!
//! Serves the registration form, dashboard listing and CSV export over HTTP,
//! and runs the outbox worker that moves queued submissions into storage.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use preg_common::config::{resolve_config_path, TomlConfig};
use preg_common::db::init_database;
use preg_web::listing::PageSize;
use preg_web::location::{LocationClient, LocationSource};
use preg_web::outbox::{Outbox, OutboxWorker, RetryPolicy};
use preg_web::session::{LocalIdentityProvider, SessionGate, WorkspaceFactory};
use preg_web::store::{RecordStore, SqliteRecordStore};
use preg_web::{build_router, AppState};

/// Command-line arguments for preg-web
#[derive(Parser, Debug)]
#[command(name = "preg-web")]
#[command(about = "People registration service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "PREG_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read first because it carries the default log level
    let mut config = TomlConfig::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting preg-web v{}", env!("CARGO_PKG_VERSION"));

    match resolve_config_path(args.config.as_deref()) {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => info!("No configuration file, using defaults"),
    }

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    if config.location_api.api_key.is_empty() {
        warn!("Location API key is not set; location lookups will fail");
    }

    let location: Arc<dyn LocationSource> = Arc::new(
        LocationClient::new(&config.location_api).context("Invalid location API settings")?,
    );
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.clone()));

    let outbox = Outbox::new(pool.clone(), RetryPolicy::from_config(&config.outbox));
    let backlog = outbox
        .summary()
        .await
        .context("Failed to read outbox")?;
    info!(
        pending = backlog.pending,
        failed = backlog.failed,
        "Outbox backlog at startup"
    );

    let cancel = CancellationToken::new();
    let worker = OutboxWorker::from_config(outbox.clone(), store.clone(), &config.outbox);
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    let gate = Arc::new(SessionGate::new(
        Arc::new(LocalIdentityProvider::new(pool.clone())),
        WorkspaceFactory {
            location,
            store,
            outbox: outbox.clone(),
            page_size: PageSize::from_config(config.listing.page_size),
        },
        config.session.ttl_minutes,
    ));

    let state = AppState::new(pool, gate, outbox);
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("preg-web listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Entries still queued stay on disk for the next start
    cancel.cancel();
    if let Err(e) = worker_handle.await {
        warn!("Outbox worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
