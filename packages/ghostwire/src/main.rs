use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod error;
mod handlers;
mod hub;
mod metrics;
mod models;
mod store;
mod ws;

#[cfg(test)]
mod test_helpers;

use crate::config::{HubPaths, ServerConfig};
use crate::hub::Hub;
use crate::metrics::HubMetrics;
use crate::store::DocumentStore;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "ghostwire")]
#[command(about = "Realtime chat relay and shared document hub")]
struct Cli {
    /// Data directory (default: ~/.ghostwire)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub hub: Arc<Hub>,
    /// Hub metrics for observability
    pub metrics: Arc<HubMetrics>,
    pub server_config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(server_config: ServerConfig, paths: &HubPaths) -> Self {
        let metrics = Arc::new(HubMetrics::new());
        let store = DocumentStore::new(&paths.database_path, server_config.store.lock_timeout);
        let hub = Arc::new(Hub::new(store, &paths.datasets_dir, metrics.clone()));
        Self {
            hub,
            metrics,
            server_config: Arc::new(server_config),
        }
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        // Shared document
        .route(
            "/api/db",
            get(handlers::get_document).put(handlers::replace_document),
        )
        .route("/api/db/list", get(handlers::list_datasets))
        .route("/api/db/switch", post(handlers::switch_dataset))
        .route("/api/db/save", post(handlers::save_dataset))
        // Profiles
        .route("/api/profiles", post(handlers::create_profile))
        .route("/api/activity/log", post(handlers::log_activity))
        // Realtime
        .route("/api/ws", get(handlers::websocket_handler))
        // Health and metrics
        .route("/api/status", get(handlers::status_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn init_logging(debug: bool, paths: &HubPaths) {
    let default_directive = if debug {
        "ghostwire=debug,tower_http=debug,info"
    } else {
        "ghostwire=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // Plain-text copy of everything to <data_dir>/logs/ghostwire.log
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.log_path());
    let (file_layer, file_error) = match log_file {
        Ok(file) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(env_filter)
        .init();

    if let Some(e) = file_error {
        warn!("Log file unavailable, logging to stderr only: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = HubPaths::resolve_data_dir(cli.data_dir)?;
    let file_config: config::FileConfig = config::load_config(&data_dir)
        .extract()
        .context("Invalid configuration")?;
    let server_config = ServerConfig::from_file(&file_config).with_overrides(cli.host, cli.port);
    let paths = HubPaths::new(data_dir, &server_config.store.database_file)?;

    init_logging(cli.debug, &paths);

    info!("Starting Ghostwire hub");
    info!("Data directory: {}", paths.data_dir.display());
    info!("Config file: {}", paths.config_toml_path().display());
    info!("Active document: {}", paths.database_path.display());

    let addr = server_config.bind_addr()?;
    let state = AppState::new(server_config, &paths);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Ghostwire listening on http://{}", actual_addr);
    info!("WebSocket: ws://{}/api/ws", actual_addr);

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing connections...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
