//! DocSync Server - HTTP service for incremental document sync.
//!
//! Callers post freshly computed records for a collection; the server diffs
//! them against what PostgreSQL already holds, using the docsync-engine, and
//! writes only what changed.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod locks;
mod routes;

use crate::config::Config;
use crate::db::PgDocumentStore;
use crate::locks::CollectionLocks;
use axum::Router;
use docsync_engine::{ProfileRegistry, SyncEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: PgDocumentStore,
    pub engine: Arc<SyncEngine>,
    pub config: Arc<Config>,
    pub locks: Arc<CollectionLocks>,
    /// Cancelled on shutdown; running syncs stop issuing batches
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "docsync_server=debug,docsync_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting DocSync Server on {}:{}", config.host, config.port);

    let registry = load_profiles(&config).await?;
    tracing::info!(kinds = ?registry.kinds(), "kind profiles loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Build application state
    let shutdown = CancellationToken::new();
    let state = AppState {
        store: PgDocumentStore::new(pool, config.sync_page_size),
        engine: Arc::new(SyncEngine::new(registry)),
        config: Arc::new(config.clone()),
        locks: CollectionLocks::new_shared(),
        shutdown: shutdown.clone(),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Built-in profiles, overlaid with the profiles file if one is configured.
async fn load_profiles(config: &Config) -> Result<ProfileRegistry, Box<dyn std::error::Error>> {
    let mut registry = ProfileRegistry::builtin();

    if let Some(path) = &config.profiles_path {
        let json = tokio::fs::read_to_string(path).await?;
        let custom = ProfileRegistry::from_json(&json)?;
        tracing::info!(path = %path.display(), kinds = ?custom.kinds(), "custom profiles loaded");
        registry.merge(custom);
    }

    Ok(registry)
}

/// Resolve on Ctrl-C, cancelling running syncs first.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, cancelling running syncs");
    shutdown.cancel();
}
