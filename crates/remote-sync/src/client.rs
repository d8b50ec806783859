//! HTTP client for a peer environment's replication API.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use replication_engine::{PushResult, TableMetadata};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sync_core::{Row, SqlValue};
use tracing::debug;

/// Header carrying the peer's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Body of `GET /api/metadata`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataResponse {
    pub metadata: TableMetadata,
}

/// Body of `GET /api/pull`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub data: Vec<Row>,
}

/// Body of `POST /api/push`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub result: PushResult,
}

/// Client for one peer.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl ApiClient {
    /// `base_url` must be an `http://` or `https://` URL; a trailing `/` is ignored.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("Peer URL must start with http:// or https://: {base_url}");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url,
            api_key,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_status(&self) -> Result<serde_json::Value> {
        self.request(Method::GET, "/api/status", &[], None).await
    }

    pub async fn trigger_sync(&self) -> Result<serde_json::Value> {
        self.request(Method::POST, "/api/sync", &[], None).await
    }

    pub async fn push_data(&self, table: &str, data: &[Row]) -> Result<PushResponse> {
        let body = serde_json::json!({ "table": table, "data": data });
        self.request(Method::POST, "/api/push", &[], Some(&body))
            .await
    }

    /// Peer master rows of `table`, newer than `since` when given.
    pub async fn pull_data(
        &self,
        table: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<PullResponse> {
        let mut query = vec![("table", table.to_string())];
        if let Some(since) = since {
            query.push(("since", SqlValue::DateTime(since).to_key_string()));
        }
        self.request(Method::GET, "/api/pull", &query, None).await
    }

    pub async fn get_metadata(&self, table: &str) -> Result<MetadataResponse> {
        self.request(
            Method::GET,
            "/api/metadata",
            &[("table", table.to_string())],
            None,
        )
        .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("API request failed: {url}"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from: {url}"))?;

        if status.as_u16() >= 400 {
            anyhow::bail!("API request failed with status {}: {}", status.as_u16(), text);
        }

        serde_json::from_str(&text).with_context(|| format!("Invalid JSON response from: {url}"))
    }
}
