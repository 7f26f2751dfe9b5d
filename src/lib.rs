pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::routes;
pub use api::{Blueprint, RequestContext, RouteOptions, ServerError, Signature};

// Export all model types
pub use model::*;

// Export store types
pub use store::{Database, MemoryDatabase, UnitOfWork, WorkflowStore};

use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::state::{AppState, DispatchSettings, SharedState};
use crate::config::{AppConfig, WorkflowBackend};
use crate::store::{CachedWorkflowStore, MemoryWorkflowStore, PostgresWorkflowStore};

/// Build the workflow store selected by the configuration
pub async fn workflow_store(config: &AppConfig) -> anyhow::Result<Arc<dyn WorkflowStore>> {
    match config.workflow.backend {
        WorkflowBackend::Memory => Ok(Arc::new(MemoryWorkflowStore::new())),
        WorkflowBackend::Postgres => {
            let database_url = config.database_url()?;
            let store = PostgresWorkflowStore::new(
                &database_url,
                config.database.max_connections.unwrap_or(20),
            )
            .await?;
            store.migrate().await?;
            let ttl = std::time::Duration::from_secs(config.workflow.cache_ttl_seconds);
            Ok(Arc::new(CachedWorkflowStore::new(store, ttl)))
        }
    }
}

/// Whether `LOAD_SEED_DATA=true` asks for the demonstration data set
pub fn seed_requested() -> bool {
    std::env::var("LOAD_SEED_DATA").map(|v| v == "true").unwrap_or(false)
}

/// Assemble the shared dispatch state for `config`, optionally seeded
pub async fn build_state(config: &AppConfig, load_seed: bool) -> anyhow::Result<SharedState> {
    let settings = DispatchSettings::from_config(config)?;
    let workflows = workflow_store(config).await?;

    let db = Arc::new(MemoryDatabase::new());
    if load_seed {
        seed::load_seed_data(&db)?;
        log::info!("Seed data loaded");
    }

    Ok(AppState::new(db, workflows, settings).shared())
}

/// Build the full router for `config`
pub async fn build_app(config: &AppConfig, load_seed: bool) -> anyhow::Result<axum::Router> {
    let state = build_state(config, load_seed).await?;
    Ok(api::routes::create_router(state, &config.server.static_folder)?)
}

/// Serve `app` on the configured address until the listener fails
pub async fn serve(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    log::info!("Listening on http://{}", bind_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Load configuration and serve until the listener fails
pub async fn run_server() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Info by default, overridable with RUST_LOG
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = AppConfig::load()?;

    let app = build_app(&config, seed_requested()).await?;
    serve(app, &config).await
}
