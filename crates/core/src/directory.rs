// Directory service abstraction (source of server descriptors)

use crate::error::GatewayResult;
use crate::types::{DownstreamServerDescriptor, ServerId, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Which servers an out-of-band re-discovery should cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    All,
    Server(ServerId),
}

impl DiscoveryTarget {
    /// Path segment used by the directory API
    pub fn path_segment(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Server(id) => id.as_str(),
        }
    }
}

/// Reply to a re-discovery request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Source of downstream server descriptors
#[async_trait::async_trait]
pub trait ServerDirectory: Send + Sync {
    /// Whether the credential needed to talk to the directory is present
    fn is_configured(&self) -> bool;

    /// Current list of servers with their declared capabilities
    async fn list_servers(&self) -> GatewayResult<Vec<DownstreamServerDescriptor>>;

    /// Ask the directory to re-discover one or all servers
    async fn trigger_discovery(&self, target: DiscoveryTarget) -> GatewayResult<DiscoveryStatus>;

    /// Publish the tools a live session reported for a server
    async fn report_tools(&self, server_id: &ServerId, tools: &[ToolDefinition]) -> GatewayResult<()> {
        let _ = (server_id, tools);
        Ok(())
    }
}
