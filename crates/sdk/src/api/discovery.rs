//! Re-discovery endpoints.

use crate::client::DirectoryClient;
use crate::error::DirectoryResult;
use junction_core::directory::{DiscoveryStatus, DiscoveryTarget};

/// Discovery API for asking the directory to re-inspect servers.
pub struct DiscoveryApi<'a> {
    client: &'a DirectoryClient,
}

impl<'a> DiscoveryApi<'a> {
    pub(crate) fn new(client: &'a DirectoryClient) -> Self {
        Self { client }
    }

    /// Re-discover every registered server.
    pub async fn all(&self) -> DirectoryResult<DiscoveryStatus> {
        self.trigger(&DiscoveryTarget::All).await
    }

    /// Re-discover the given target.
    pub async fn trigger(&self, target: &DiscoveryTarget) -> DirectoryResult<DiscoveryStatus> {
        self.client
            .http
            .post(&["discover", target.path_segment()], &serde_json::json!({}))
            .await
    }
}
