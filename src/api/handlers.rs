use axum::response::{Html, Json};
use serde::Serialize;

use crate::api::context::{CallArgs, RequestContext};
use crate::api::error::ServerError;
use crate::api::render;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Flash messages left over from earlier requests of this browser session
pub async fn flashes(ctx: RequestContext, _args: CallArgs) -> Result<Html<String>, ServerError> {
    let pending = match ctx.request().session_id() {
        Some(sid) => ctx.state().flash_cache.take(&sid),
        None => Vec::new(),
    };
    Ok(Html(render::alert_fragment(&pending)))
}
