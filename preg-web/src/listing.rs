//! Dashboard record listing
//!
//! Keeps a locally accumulated, append-only copy of the remote collection,
//! paged in by name order. Search runs over that local copy only, so every
//! search result reports whether it covered the whole collection.

use preg_common::RegisteredPerson;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{Cursor, RecordStore, StoreError};

/// Default page size for the dashboard
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// How much the listing fetches per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Bounded(usize),
    /// One unpaginated fetch of the whole collection
    Unbounded,
}

impl PageSize {
    /// `0` selects the unbounded variant
    pub fn from_config(page_size: usize) -> Self {
        if page_size == 0 {
            PageSize::Unbounded
        } else {
            PageSize::Bounded(page_size)
        }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::Bounded(DEFAULT_PAGE_SIZE)
    }
}

/// Listing errors
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("Failed to load registered people: {0}")]
    Fetch(#[from] StoreError),
}

/// Fetch status shown with the list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ListingStatus {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// Result of a local search
#[derive(Debug, Clone, Serialize)]
pub struct SearchView<'a> {
    pub records: Vec<&'a RegisteredPerson>,
    /// True only when every remote record has been paged in
    pub complete: bool,
}

/// Paginated, incrementally accumulated listing
pub struct ListingController {
    store: Arc<dyn RecordStore>,
    page_size: PageSize,
    records: Vec<RegisteredPerson>,
    cursor: Option<Cursor>,
    has_more: bool,
    status: ListingStatus,
}

impl ListingController {
    pub fn new(store: Arc<dyn RecordStore>, page_size: PageSize) -> Self {
        Self {
            store,
            page_size,
            records: Vec::new(),
            cursor: None,
            has_more: false,
            status: ListingStatus::Idle,
        }
    }

    /// Start a fresh listing and fetch its first page
    ///
    /// Returns the number of records fetched.
    pub async fn load_initial(&mut self) -> Result<usize, ListingError> {
        self.records.clear();
        self.cursor = None;
        self.has_more = false;
        self.status = ListingStatus::Loading;

        match self.page_size {
            PageSize::Unbounded => match self.store.all().await {
                Ok(records) => {
                    let count = records.len();
                    self.records = records;
                    self.status = ListingStatus::Ready;
                    info!(count, "Loaded full listing");
                    Ok(count)
                }
                Err(e) => Err(self.fail(e)),
            },
            PageSize::Bounded(limit) => self.fetch_page(limit).await,
        }
    }

    /// Append the page after the held cursor
    ///
    /// No-op returning `Ok(0)` when no cursor is held or no page remains.
    /// Allowed after a failed fetch so the user can retry by hand.
    pub async fn load_more(&mut self) -> Result<usize, ListingError> {
        let limit = match self.page_size {
            PageSize::Bounded(limit) => limit,
            PageSize::Unbounded => return Ok(0),
        };

        if self.cursor.is_none() || !self.has_more {
            return Ok(0);
        }

        self.status = ListingStatus::Loading;
        self.fetch_page(limit).await
    }

    async fn fetch_page(&mut self, limit: usize) -> Result<usize, ListingError> {
        match self.store.page(self.cursor.as_ref(), limit).await {
            Ok(page) => {
                let count = page.records.len();
                self.records.extend(page.records);
                if page.cursor.is_some() {
                    self.cursor = page.cursor;
                }
                self.has_more = count == limit;
                self.status = ListingStatus::Ready;
                info!(
                    count,
                    total = self.records.len(),
                    has_more = self.has_more,
                    "Loaded listing page"
                );
                Ok(count)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: StoreError) -> ListingError {
        warn!(error = %error, "Listing fetch failed");
        self.status = ListingStatus::Failed(error.to_string());
        ListingError::Fetch(error)
    }

    /// Case-insensitive substring search over the records fetched so far
    ///
    /// The query is trimmed first; an empty query returns every record in order.
    pub fn search(&self, query: &str) -> SearchView<'_> {
        let needle = query.trim().to_lowercase();

        let records = if needle.is_empty() {
            self.records.iter().collect()
        } else {
            self.records
                .iter()
                .filter(|person| {
                    person
                        .text_fields()
                        .iter()
                        .any(|field| field.to_lowercase().contains(&needle))
                })
                .collect()
        };

        SearchView {
            records,
            complete: self.is_complete(),
        }
    }

    /// Every remote record has been paged in
    pub fn is_complete(&self) -> bool {
        matches!(self.status, ListingStatus::Ready) && !self.has_more
    }

    pub fn records(&self) -> &[RegisteredPerson] {
        &self.records
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn status(&self) -> &ListingStatus {
        &self.status
    }
}
