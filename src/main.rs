mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::{
    EncryptionEngine, FileService, FileStore, ShareService, SystemClock, UploadValidator,
};
use crate::storage::LocalStorage;

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_SLACK: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub files: Arc<FileService>,
    pub shares: Arc<ShareService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secure_share=debug,audit=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting secure-share...");

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Arc::new(Database::new(&config.database.path).await?);
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Encrypted blob store
    let provider = Arc::new(LocalStorage::new(&config.storage.local_path).await?);
    let engine = EncryptionEngine::new(&config.encryption_key()?);
    let blobs = Arc::new(FileStore::new(
        provider,
        engine,
        config.storage.write_retries,
        Duration::from_millis(config.storage.retry_backoff_ms),
    ));

    let validator = Arc::new(UploadValidator::new(config.upload.clone()));
    let files = Arc::new(FileService::new(db.clone(), blobs.clone(), validator));
    let shares = Arc::new(ShareService::new(
        db,
        blobs,
        Arc::new(SystemClock),
        config.server.public_base_url.clone(),
        &config.share,
    ));

    let state = AppState {
        config: config.clone(),
        files,
        shares,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(state.config.upload.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/public/share/:token/info", get(handlers::share::get_public_share))
        .route("/public/share/:token/access", post(handlers::share::access_share));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // Files
        .route("/files", get(handlers::file::list_files))
        .route("/files/upload", post(handlers::file::upload_file))
        .route("/files/search", get(handlers::file::search_files))
        .route("/files/:id", delete(handlers::file::delete_file))
        .route("/files/:id/download", get(handlers::file::download_file))
        // Shares
        .route("/shares", get(handlers::share::list_my_shares))
        .route("/shares/:id", post(handlers::share::create_share).delete(handlers::share::revoke_share))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
