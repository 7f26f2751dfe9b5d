use axum::{routing::get, Router};
use tower_http::services::ServeDir;

use crate::api::dispatch::{Blueprint, RouteOptions};
use crate::api::error::RouteError;
use crate::api::params::Signature;
use crate::api::state::SharedState;
use crate::api::{handlers, workflow_handlers};

/// Assemble every blueprint; a misdeclared handler aborts startup
pub fn create_router(state: SharedState, static_folder: &str) -> Result<Router, RouteError> {
    let mut htmx = Blueprint::new("/htmx");
    htmx.add(
        Signature::new("flashes"),
        RouteOptions::htmx().login_required(false).without_db(),
        handlers::flashes,
    )?;

    let router = Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .merge(htmx.into_router())
        .merge(workflow_handlers::reindex_blueprint()?.into_router())
        .nest_service("/static", ServeDir::new(static_folder))
        .with_state(state);

    Ok(router)
}
