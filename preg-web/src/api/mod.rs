//! HTTP API handlers for preg-web

pub mod auth;
pub mod form;
pub mod health;
pub mod outbox;
pub mod people;

pub use auth::require_session;
pub use health::health_routes;
