//! HTTP client wrapper.
//!
//! Holds two reqwest clients: one for JSON API calls with a total timeout and
//! one for binary downloads that only bounds the connect phase.

use crate::config::NetworkConfig;
use crate::error::{CivitdlError, Result};
use reqwest::{header, Client, RequestBuilder, Response};
use tracing::debug;

/// HTTP client shared by the metadata fetcher and the model orchestrator.
#[derive(Clone)]
pub struct HttpClient {
    /// HTTP client for API requests (has total timeout)
    api_client: Client,
    /// HTTP client for downloads (connect timeout only, no total timeout)
    download_client: Client,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("has_api_key", &self.api_key.is_some())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpClient {
    /// Create a client, optionally carrying a bearer token.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let api_client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| CivitdlError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        let download_client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| CivitdlError::Network {
                message: format!("Failed to create download client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            api_client,
            download_client,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(header::AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    /// GET a JSON API resource. Status is left to the caller.
    pub async fn get_api(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let request = self.authorize(self.api_client.get(url));
        request.send().await.map_err(|e| CivitdlError::Network {
            message: format!("GET {} failed: {}", url, e),
            source: Some(e),
        })
    }

    /// GET a binary payload with the bearer token attached.
    pub async fn get_download(&self, url: &str) -> Result<Response> {
        debug!("GET {} (download)", url);
        let request = self.authorize(self.download_client.get(url));
        request.send().await.map_err(|e| CivitdlError::Network {
            message: format!("GET {} failed: {}", url, e),
            source: Some(e),
        })
    }

    /// GET a public resource such as a preview image, without credentials.
    pub async fn get_public(&self, url: &str) -> Result<Response> {
        debug!("GET {} (public)", url);
        self.download_client
            .get(url)
            .send()
            .await
            .map_err(|e| CivitdlError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let client = HttpClient::new(Some("super-secret".into())).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("super-secret"));
        assert!(client.has_api_key());
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let client = HttpClient::new(Some(String::new())).unwrap();
        assert!(!client.has_api_key());
    }
}
