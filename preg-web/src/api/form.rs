//! Registration form endpoints
//!
//! The form state lives in the caller's session workspace; every endpoint
//! returns the full form view so a client can re-render from one response.

use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::selector::{Level, SelectorError, SelectorSnapshot};
use crate::session::{Session, Workspace};
use crate::submission::{
    FieldValue, FormError, FormField, IdNumberVerdict, RegistrationForm, SubmitOutcome,
};

/// Shown after a successful submit
pub const SUCCESS_PATH: &str = "/registration-success";

/// Everything needed to render the form
#[derive(Debug, Serialize)]
pub struct FormView {
    pub locations: SelectorSnapshot,
    pub fields: RegistrationForm,
    pub id_number: IdNumberVerdict,
}

async fn form_view(workspace: &Workspace) -> FormView {
    let form = workspace.form.lock().await;
    FormView {
        locations: workspace.selector.snapshot(),
        fields: form.form().clone(),
        id_number: IdNumberVerdict {
            valid: form.id_number_error().is_none(),
            reason: form.id_number_error(),
        },
    }
}

/// Body of a field or location update
#[derive(Debug, Deserialize)]
pub struct UpdateRequest<T> {
    pub value: T,
}

/// POST /api/form/mount
///
/// Loads district options the first time; later calls just return the view.
pub async fn mount(Extension(session): Extension<Arc<Session>>) -> Json<FormView> {
    session.workspace.selector.mount().await;
    Json(form_view(&session.workspace).await)
}

/// GET /api/form
pub async fn get_form(Extension(session): Extension<Arc<Session>>) -> Json<FormView> {
    Json(form_view(&session.workspace).await)
}

/// PUT /api/form/locations/:level
pub async fn set_location(
    Extension(session): Extension<Arc<Session>>,
    Path(level): Path<String>,
    Json(update): Json<UpdateRequest<String>>,
) -> Result<Json<FormView>, SelectorError> {
    let level: Level = level.parse()?;
    session.workspace.selector.select(level, update.value).await?;
    Ok(Json(form_view(&session.workspace).await))
}

/// PUT /api/form/fields/:name
pub async fn set_field(
    Extension(session): Extension<Arc<Session>>,
    Path(name): Path<String>,
    Json(update): Json<UpdateRequest<FieldValue>>,
) -> Result<Json<FormView>, FormError> {
    let field: FormField = name.parse()?;
    session
        .workspace
        .form
        .lock()
        .await
        .update_field(field, update.value)?;
    Ok(Json(form_view(&session.workspace).await))
}

/// POST /api/form/submit
///
/// Answers 202 as soon as the record is queued.
pub async fn submit(
    Extension(session): Extension<Arc<Session>>,
) -> Result<impl IntoResponse, FormError> {
    let SubmitOutcome::Submitted { outbox_id } = session.workspace.submit().await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "state": "submitted",
            "outbox_id": outbox_id,
            "redirect": SUCCESS_PATH,
        })),
    ))
}

impl IntoResponse for FormError {
    fn into_response(self) -> Response {
        let (status, field) = match &self {
            FormError::UnknownField(_) => (StatusCode::NOT_FOUND, None),
            FormError::InvalidValue { field, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, Some(field.name()))
            }
            FormError::IdentityNumber(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Some(FormField::IdNumber.name()))
            }
            FormError::MissingField(name) => (StatusCode::UNPROCESSABLE_ENTITY, Some(*name)),
            FormError::Outbox(e) => {
                error!(error = %e, "Failed to queue submission");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "field": field,
        }));

        (status, body).into_response()
    }
}

impl IntoResponse for SelectorError {
    fn into_response(self) -> Response {
        let status = match &self {
            SelectorError::UnknownLevel(_) => StatusCode::NOT_FOUND,
            SelectorError::ParentNotSelected { .. } => StatusCode::CONFLICT,
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
