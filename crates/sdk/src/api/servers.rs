//! Server listing and tool reporting endpoints.

use crate::client::DirectoryClient;
use crate::error::DirectoryResult;
use junction_core::types::{DownstreamServerDescriptor, ServerId, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Servers API for reading the directory's server registry.
pub struct ServersApi<'a> {
    client: &'a DirectoryClient,
}

impl<'a> ServersApi<'a> {
    pub(crate) fn new(client: &'a DirectoryClient) -> Self {
        Self { client }
    }

    /// List every registered server with its declared capabilities.
    ///
    /// Entries that do not parse are logged and skipped so one bad
    /// registration does not hide the rest.
    pub async fn list(&self) -> DirectoryResult<Vec<DownstreamServerDescriptor>> {
        let response: ListServersResponse = self.client.http.get(&["servers"]).await?;

        let servers = response
            .into_entries()
            .into_iter()
            .filter_map(|entry| {
                let id = entry.get("id").and_then(Value::as_str).map(str::to_string);
                match serde_json::from_value::<DownstreamServerDescriptor>(entry) {
                    Ok(server) => Some(server),
                    Err(e) => {
                        warn!(server_id = ?id, error = %e, "skipping malformed server descriptor");
                        None
                    }
                }
            })
            .collect();
        Ok(servers)
    }

    /// Publish the tools a live session reported for a server.
    pub async fn report_tools(
        &self,
        server_id: &ServerId,
        tools: &[ToolDefinition],
    ) -> DirectoryResult<()> {
        self.client
            .http
            .post_no_response(
                &["servers", server_id.as_str(), "tools"],
                &ReportToolsRequest { tools },
            )
            .await
    }
}

/// The directory answers with a bare array; older deployments wrap it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListServersResponse {
    Bare(Vec<Value>),
    Wrapped { servers: Vec<Value> },
}

impl ListServersResponse {
    fn into_entries(self) -> Vec<Value> {
        match self {
            Self::Bare(servers) | Self::Wrapped { servers } => servers,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportToolsRequest<'a> {
    tools: &'a [ToolDefinition],
}
