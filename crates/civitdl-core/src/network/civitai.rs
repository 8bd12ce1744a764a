//! Remote model API seam.

use crate::config::ApiConfig;
use crate::error::{CivitdlError, Result};
use crate::network::HttpClient;
use crate::records::{ModelRecord, VersionRecord};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Read access to model and version records.
///
/// Non-success statuses surface as [`CivitdlError::Api`] with the status code;
/// bodies that are not the expected JSON surface as
/// [`CivitdlError::Unexpected`].
#[async_trait]
pub trait CivitaiApi: Send + Sync {
    async fn fetch_model(&self, model_id: &str) -> Result<ModelRecord>;

    async fn fetch_version(&self, version_id: &str) -> Result<VersionRecord>;
}

/// [`CivitaiApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCivitaiApi {
    http: Arc<HttpClient>,
    base_url: String,
}

impl HttpCivitaiApi {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self::with_base_url(http, ApiConfig::BASE_URL)
    }

    /// Point the client at another host, e.g. a local test server.
    pub fn with_base_url(http: Arc<HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn model_url(&self, model_id: &str) -> String {
        format!("{}{}/{}", self.base_url, ApiConfig::MODELS_PATH, model_id)
    }

    pub fn version_url(&self, version_id: &str) -> String {
        format!("{}{}/{}", self.base_url, ApiConfig::MODEL_VERSIONS_PATH, version_id)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get_api(url).await?;
        let status = response.status();
        debug!("{} -> {}", url, status);

        if status != StatusCode::OK {
            return Err(CivitdlError::Api {
                status: status.as_u16(),
                message: format!("request for metadata from \"{}\" failed", url),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            CivitdlError::unexpected(format!(
                "Failed to parse metadata from \"{}\": {}. CivitAI might be under maintenance",
                url, e
            ))
        })
    }
}

#[async_trait]
impl CivitaiApi for HttpCivitaiApi {
    async fn fetch_model(&self, model_id: &str) -> Result<ModelRecord> {
        self.fetch_json(&self.model_url(model_id)).await
    }

    async fn fetch_version(&self, version_id: &str) -> Result<VersionRecord> {
        self.fetch_json(&self.version_url(version_id)).await
    }
}
