//! preg-web library - People registration service
//!
//! Signed-in users fill a registration form whose location fields cascade
//! district → sector → cell → village, and browse, search and export the
//! registered people from a dashboard.

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod export;
pub mod listing;
pub mod location;
pub mod outbox;
pub mod selector;
pub mod session;
pub mod store;
pub mod submission;

use crate::outbox::Outbox;
use crate::session::SessionGate;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Live sessions and their workspaces
    pub gate: Arc<SessionGate>,
    /// Submission queue, shared with the background worker
    pub outbox: Outbox,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, gate: Arc<SessionGate>, outbox: Outbox) -> Self {
        Self { db, gate, outbox }
    }
}

/// Build application router
///
/// `/health`, signup and login are public; everything else passes the
/// session gate first. CORS is open because the browser UI is served from
/// its own origin and authenticates with a bearer token.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post, put};

    // Protected routes (require a session)
    let protected = Router::new()
        .route("/api/auth/logout", post(api::auth::logout))
        .route("/api/auth/session", get(api::auth::current_session))
        .route("/api/form", get(api::form::get_form))
        .route("/api/form/mount", post(api::form::mount))
        .route("/api/form/locations/:level", put(api::form::set_location))
        .route("/api/form/fields/:name", put(api::form::set_field))
        .route("/api/form/submit", post(api::form::submit))
        .route("/api/people", get(api::people::list))
        .route("/api/people/load", post(api::people::load))
        .route("/api/people/more", post(api::people::load_more))
        .route("/api/people/export", get(api::people::export))
        .route("/api/outbox", get(api::outbox::summary))
        .route("/api/outbox/retry", post(api::outbox::retry_failed))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_session,
        ));

    // Public routes (no session)
    let public = Router::new()
        .merge(api::health_routes())
        .route("/api/auth/signup", post(api::auth::signup))
        .route("/api/auth/login", post(api::auth::login));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
