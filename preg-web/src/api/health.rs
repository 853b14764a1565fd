//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::outbox::OutboxSummary;
use crate::AppState;

/// Health check response
///
/// `status` is `degraded` when the database cannot be read. The outbox
/// backlog is left out in that case.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub database: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox: Option<OutboxSummary>,
}

/// GET /health
///
/// Does not require a session.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check database probe failed: {}", e);
            false
        }
    };

    let outbox = if database {
        state.outbox.summary().await.ok()
    } else {
        None
    };

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        module: "preg-web".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        outbox,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
