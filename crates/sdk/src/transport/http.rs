//! HTTP transport for the directory API.

use crate::config::ClientConfig;
use crate::error::{DirectoryError, DirectoryResult};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP transport for making directory API requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> DirectoryResult<Self> {
        let mut headers = header::HeaderMap::new();

        if let Some(api_key) = config.api_key.as_deref().filter(|_| config.has_api_key()) {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                    .map_err(|_| DirectoryError::Config("Invalid API key format".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL of an endpoint below the base URL. Each segment is
    /// percent-encoded, so ids cannot change the path structure.
    fn build_url(&self, segments: &[&str]) -> DirectoryResult<url::Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::Config("base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Every directory endpoint needs the bearer token; fail before sending.
    fn ensure_configured(&self) -> DirectoryResult<()> {
        if self.config.has_api_key() {
            Ok(())
        } else {
            Err(DirectoryError::Config(
                "directory API key is not configured".to_string(),
            ))
        }
    }

    /// Send once; the gateway never retries directory calls.
    async fn execute(&self, request: RequestBuilder) -> DirectoryResult<Response> {
        self.ensure_configured()?;

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DirectoryError::Timeout
            } else {
                e.into()
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(status = status, "directory request failed");
        Err(DirectoryError::from_response(status, &body))
    }

    /// Execute a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &[&str]) -> DirectoryResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request");

        let response = self.execute(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    /// Execute a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &[&str], body: &B) -> DirectoryResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "POST request");

        let response = self.execute(self.client.post(url).json(body)).await?;
        Ok(response.json().await?)
    }

    /// Execute a POST request without a response body.
    pub async fn post_no_response<B: Serialize>(&self, path: &[&str], body: &B) -> DirectoryResult<()> {
        let url = self.build_url(path)?;
        debug!(url = %url, "POST request (no response)");

        self.execute(self.client.post(url).json(body)).await?;
        Ok(())
    }

    /// Execute a PUT request.
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &[&str], body: &B) -> DirectoryResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "PUT request");

        let response = self.execute(self.client.put(url).json(body)).await?;
        Ok(response.json().await?)
    }

    /// Execute a DELETE request without a response body.
    pub async fn delete_no_response(&self, path: &[&str]) -> DirectoryResult<()> {
        let url = self.build_url(path)?;
        debug!(url = %url, "DELETE request (no response)");

        self.execute(self.client.delete(url)).await?;
        Ok(())
    }
}
