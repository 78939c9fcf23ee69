//! Dualstore Backend Store
//!
//! Long-running HTTP server that persists records in SQLite and serves
//! static assets from its working directory.
//!
//! # Configuration
//!
//! Environment variables:
//! - `PORT`: Port to listen on (default: 3000)
//! - `DUALSTORE_DB_PATH`: SQLite file (default: ~/.local/share/dualstore/dualstore.db)
//! - `DUALSTORE_STATIC_DIR`: Directory served outside `/api` (default: current directory)
//!
//! # Endpoints
//!
//! - `GET /api/health`
//! - `GET /api/data`, `POST /api/data`
//! - `PUT /api/data/{id}`, `DELETE /api/data/{id}`
//! - `POST /api/register`, `POST /api/login`
//! - `POST /api/file`

use dualstore::server::{init_db, router, AppState};
use dualstore_core::DEFAULT_BACKEND_PORT;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// SQLite database file
    db_path: PathBuf,
    /// Directory for static assets
    static_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_BACKEND_PORT);

        let db_path = std::env::var("DUALSTORE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("dualstore")
                    .join("dualstore.db")
            });

        let static_dir = std::env::var("DUALSTORE_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            port,
            db_path,
            static_dir,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dualstore_server=info,dualstore=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let pool = match init_db(&config.db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Static assets: {}", config.static_dir.display());

    let app = router(AppState::new(pool), Some(config.static_dir));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
