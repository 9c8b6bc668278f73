//! Ledger backend - retail/wholesale bookkeeping REST API
//!
//! Items, suppliers, customers, purchases, sales, payments, receipts,
//! bank accounts and reports over PostgreSQL.

mod api;
mod config;
mod db;
mod ledger;
mod settings;
mod types;

use crate::api::create_router;
use crate::config::AppConfig;
use crate::db::Database;
use crate::settings::SettingsCache;

use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Application state shared across all handlers
pub struct AppState {
    pub db: Database,
    pub settings: SettingsCache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Ledger Backend - Bookkeeping REST API v{}      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = AppConfig::from_env();

    // Initialize database
    info!("Connecting to database...");
    let db = Database::new(&config).await?;
    info!("Database connected");

    let settings = match db.get_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Could not load settings, using defaults: {}", e);
            db::Settings::default()
        }
    };

    // Create application state
    let state = Arc::new(AppState {
        db,
        settings: SettingsCache::new(settings),
    });

    // Create router with all API endpoints
    let app = create_router(state);

    // Start server
    let addr = config.socket_addr();
    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
