//! Administrative-location lookup client
//!
//! Thin wrapper over the remote Rwanda location API. Every lookup is scoped
//! to one configured province and to the ancestor names given; results keep
//! the order the API returned them in.
//!
//! Errors are returned, not hidden: turning a failure into an empty option
//! list is the selector's job, which also records that the level failed.

use async_trait::async_trait;
use preg_common::config::LocationApiConfig;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Location lookup errors
#[derive(Debug, Clone, Error)]
pub enum LocationError {
    #[error("Invalid location API base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Source of child location names for each level of the hierarchy
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn districts(&self) -> Result<Vec<String>, LocationError>;

    async fn sectors(&self, district: &str) -> Result<Vec<String>, LocationError>;

    async fn cells(&self, district: &str, sector: &str) -> Result<Vec<String>, LocationError>;

    async fn villages(
        &self,
        district: &str,
        sector: &str,
        cell: &str,
    ) -> Result<Vec<String>, LocationError>;
}

/// One entry of a lookup response: `{"name": "..."}` or a bare string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocationEntry {
    Named { name: String },
    Plain(String),
}

impl LocationEntry {
    fn into_name(self) -> String {
        match self {
            LocationEntry::Named { name } => name,
            LocationEntry::Plain(name) => name,
        }
    }
}

/// HTTP client for the location API
pub struct LocationClient {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: String,
    host_header: String,
    province: String,
}

impl LocationClient {
    pub fn new(config: &LocationApiConfig) -> Result<Self, LocationError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| LocationError::InvalidBaseUrl(format!("{}: {}", config.base_url, e)))?;

        if base_url.cannot_be_a_base() {
            return Err(LocationError::InvalidBaseUrl(config.base_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LocationError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            api_key: config.api_key.clone(),
            host_header: config.host_header.clone(),
            province: config.province.clone(),
        })
    }

    /// Province every lookup is scoped to
    pub fn province(&self) -> &str {
        &self.province
    }

    /// Build `{base}/location/{segments...}`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, LocationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LocationError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("location")
            .extend(segments);
        Ok(url)
    }

    async fn fetch_names(
        &self,
        segments: &[&str],
        ancestors: &[(&str, &str)],
    ) -> Result<Vec<String>, LocationError> {
        let url = self.endpoint(segments)?;

        let mut query = vec![("province", self.province.as_str())];
        query.extend_from_slice(ancestors);

        tracing::debug!(url = %url, "Querying location API");

        let response = self
            .http_client
            .get(url)
            .query(&query)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.host_header)
            .send()
            .await
            .map_err(|e| LocationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LocationError::Api(status.as_u16(), error_text));
        }

        let entries: Vec<LocationEntry> = response
            .json()
            .await
            .map_err(|e| LocationError::Parse(e.to_string()))?;

        let names: Vec<String> = entries
            .into_iter()
            .map(LocationEntry::into_name)
            .filter(|name| !name.trim().is_empty())
            .collect();

        tracing::debug!(count = names.len(), "Location lookup returned");

        Ok(names)
    }
}

#[async_trait]
impl LocationSource for LocationClient {
    async fn districts(&self) -> Result<Vec<String>, LocationError> {
        self.fetch_names(&["districts"], &[]).await
    }

    async fn sectors(&self, district: &str) -> Result<Vec<String>, LocationError> {
        self.fetch_names(&["sectors", district], &[]).await
    }

    async fn cells(&self, district: &str, sector: &str) -> Result<Vec<String>, LocationError> {
        self.fetch_names(&["cells", sector], &[("district", district)])
            .await
    }

    async fn villages(
        &self,
        district: &str,
        sector: &str,
        cell: &str,
    ) -> Result<Vec<String>, LocationError> {
        self.fetch_names(
            &["villages", cell],
            &[("district", district), ("sector", sector)],
        )
        .await
    }
}
