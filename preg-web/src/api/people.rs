//! Dashboard listing, search and CSV export
//!
//! Loading is explicit: `load` starts a fresh listing, `more` appends the
//! next page. Search and export only ever see what has been loaded, and say
//! so through the `complete` flag.

use axum::{
    extract::Query,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use preg_common::RegisteredPerson;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::export::export_csv_today;
use crate::listing::{ListingController, ListingError, ListingStatus};
use crate::session::Session;

/// Result of a load or load-more
#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub fetched: usize,
    pub total: usize,
    pub has_more: bool,
    pub complete: bool,
    pub status: ListingStatus,
}

impl LoadResponse {
    fn new(fetched: usize, listing: &ListingController) -> Self {
        Self {
            fetched,
            total: listing.records().len(),
            has_more: listing.has_more(),
            complete: listing.is_complete(),
            status: listing.status().clone(),
        }
    }
}

/// Search query
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct PeopleResponse<'a> {
    pub records: Vec<&'a RegisteredPerson>,
    pub count: usize,
    pub complete: bool,
    pub has_more: bool,
    pub status: &'a ListingStatus,
}

/// POST /api/people/load
pub async fn load(
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<LoadResponse>, ListingError> {
    let mut listing = session.workspace.listing.lock().await;
    let fetched = listing.load_initial().await?;
    Ok(Json(LoadResponse::new(fetched, &listing)))
}

/// POST /api/people/more
pub async fn load_more(
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<LoadResponse>, ListingError> {
    let mut listing = session.workspace.listing.lock().await;
    let fetched = listing.load_more().await?;
    Ok(Json(LoadResponse::new(fetched, &listing)))
}

/// GET /api/people?q=
pub async fn list(
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let listing = session.workspace.listing.lock().await;
    let view = listing.search(&query.q);

    Json(PeopleResponse {
        count: view.records.len(),
        records: view.records,
        complete: view.complete,
        has_more: listing.has_more(),
        status: listing.status(),
    })
    .into_response()
}

/// GET /api/people/export?q=
///
/// Downloads the current search view as CSV.
pub async fn export(
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let listing = session.workspace.listing.lock().await;
    let view = listing.search(&query.q);
    let export = export_csv_today(view.records);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv;charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.file_name),
            ),
        ],
        export.contents,
    )
        .into_response()
}

impl IntoResponse for ListingError {
    fn into_response(self) -> Response {
        let status = match &self {
            ListingError::Fetch(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
