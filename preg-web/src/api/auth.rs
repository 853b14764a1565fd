//! Sign-up, sign-in and the session gate middleware
//!
//! Protected routes carry `Authorization: Bearer <token>`. The token is
//! handed out by `POST /api/auth/login` and destroyed by
//! `POST /api/auth/logout`.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::session::{Session, SessionError, SessionInfo};
use crate::AppState;

/// Where unauthenticated callers are sent
pub const LOGIN_PATH: &str = "/login";

/// Landing view after sign-in
pub const DASHBOARD_PATH: &str = "/dashboard";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Session gate for protected routes
///
/// Resolves the bearer token and attaches the `Arc<Session>` to the request.
/// Missing, unknown and expired tokens get 401 with a redirect to the login view.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, SessionError> {
    let token = bearer_token(request.headers())
        .ok_or(SessionError::Unauthenticated)?
        .to_string();
    let session = state.gate.authenticate(&token).await?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Signup form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Login form
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub redirect: &'static str,
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(form): Json<SignupRequest>,
) -> Result<impl IntoResponse, SessionError> {
    let identity = state
        .gate
        .sign_up(&form.email, &form.password, &form.confirm_password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user_id": identity.user_id,
            "email": identity.email,
            "redirect": LOGIN_PATH,
        })),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, SessionError> {
    let session = state.gate.sign_in(&form.email, &form.password).await?;

    Ok(Json(LoginResponse {
        token: session.token.clone(),
        user_id: session.identity.user_id.clone(),
        email: session.identity.email.clone(),
        expires_at: session.expires_at,
        redirect: DASHBOARD_PATH,
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Json<serde_json::Value> {
    state.gate.sign_out(&session.token).await;
    Json(json!({ "signed_out": true, "redirect": LOGIN_PATH }))
}

/// GET /api/auth/session
pub async fn current_session(Extension(session): Extension<Arc<Session>>) -> Json<SessionInfo> {
    Json(SessionInfo::from(session.as_ref()))
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SessionError::Unauthenticated | SessionError::Expired => {
                let body = Json(json!({
                    "error": self.to_string(),
                    "redirect": LOGIN_PATH,
                }));
                return (StatusCode::UNAUTHORIZED, body).into_response();
            }
            SessionError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            SessionError::InvalidEmail
            | SessionError::PasswordTooShort
            | SessionError::PasswordMismatch => StatusCode::BAD_REQUEST,
            SessionError::EmailTaken => StatusCode::CONFLICT,
            SessionError::Database(e) => {
                error!(error = %e, "Account database error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            SessionError::Credentials(e) => {
                error!(error = %e, "Password hashing failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
