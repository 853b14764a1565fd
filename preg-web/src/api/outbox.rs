//! Outbox status and manual retry

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::outbox::{OutboxError, OutboxSummary};
use crate::AppState;

/// GET /api/outbox
pub async fn summary(State(state): State<AppState>) -> Result<Json<OutboxSummary>, OutboxError> {
    Ok(Json(state.outbox.summary().await?))
}

/// POST /api/outbox/retry
///
/// Requeues every submission that ran out of attempts.
pub async fn retry_failed(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, OutboxError> {
    let requeued = state.outbox.retry_failed().await?;
    let summary = state.outbox.summary().await?;

    Ok(Json(json!({
        "requeued": requeued,
        "summary": summary,
    })))
}

impl IntoResponse for OutboxError {
    fn into_response(self) -> Response {
        error!(error = %self, "Outbox request failed");

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
