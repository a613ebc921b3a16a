//! Main client for the directory API.

use crate::api::*;
use crate::config::ClientConfig;
use crate::error::{DirectoryError, DirectoryResult};
use crate::transport::HttpTransport;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Client for the server directory service.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    config: Arc<ClientConfig>,
    pub(crate) http: HttpTransport,
}

impl DirectoryClient {
    /// Create a new client builder.
    pub fn builder() -> DirectoryClientBuilder {
        DirectoryClientBuilder::new()
    }

    /// Create a client from configuration.
    pub fn from_config(config: ClientConfig) -> DirectoryResult<Self> {
        let config = Arc::new(config);
        let http = HttpTransport::new(config.clone())?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the API key needed for every endpoint is present.
    pub fn has_api_key(&self) -> bool {
        self.config.has_api_key()
    }

    pub fn servers(&self) -> ServersApi<'_> {
        ServersApi::new(self)
    }

    pub fn discovery(&self) -> DiscoveryApi<'_> {
        DiscoveryApi::new(self)
    }

    pub fn knowledge(&self) -> KnowledgeApi<'_> {
        KnowledgeApi::new(self)
    }

    pub fn notifications(&self) -> NotificationsApi<'_> {
        NotificationsApi::new(self)
    }

    pub fn documents(&self) -> DocumentsApi<'_> {
        DocumentsApi::new(self)
    }
}

/// Builder for creating a [`DirectoryClient`].
pub struct DirectoryClientBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl DirectoryClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the base URL of the directory API.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the API key for authentication.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set or clear the API key.
    pub fn maybe_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client. A missing API key is not an error here; each
    /// request reports it instead.
    pub fn build(self) -> DirectoryResult<DirectoryClient> {
        let base_url_str = self
            .base_url
            .ok_or_else(|| DirectoryError::Config("base_url is required".to_string()))?;

        let mut config = ClientConfig::new(Url::parse(&base_url_str)?);
        config.api_key = self.api_key;
        config.timeout = self.timeout;

        DirectoryClient::from_config(config)
    }
}

impl Default for DirectoryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
