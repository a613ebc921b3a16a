//! [`ServerDirectory`] backed by the HTTP directory API.

use crate::client::DirectoryClient;
use junction_core::directory::{DiscoveryStatus, DiscoveryTarget, ServerDirectory};
use junction_core::error::GatewayResult;
use junction_core::types::{DownstreamServerDescriptor, ServerId, ToolDefinition};
use tracing::debug;

#[async_trait::async_trait]
impl ServerDirectory for DirectoryClient {
    fn is_configured(&self) -> bool {
        self.has_api_key()
    }

    async fn list_servers(&self) -> GatewayResult<Vec<DownstreamServerDescriptor>> {
        let servers = self.servers().list().await?;
        debug!(count = servers.len(), "fetched server descriptors");
        Ok(servers)
    }

    async fn trigger_discovery(&self, target: DiscoveryTarget) -> GatewayResult<DiscoveryStatus> {
        Ok(self.discovery().trigger(&target).await?)
    }

    async fn report_tools(&self, server_id: &ServerId, tools: &[ToolDefinition]) -> GatewayResult<()> {
        self.servers().report_tools(server_id, tools).await?;
        debug!(server_id = %server_id, tools = tools.len(), "reported discovered tools");
        Ok(())
    }
}
