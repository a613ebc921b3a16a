// Server discovery: the only tool that forces a catalog rebuild

use crate::protocol::CallToolResult;
use crate::tools::{json_schema_boolean, json_schema_object, json_schema_string, Tool};
use anyhow::{bail, Context, Result};
use junction_core::directory::DiscoveryTarget;
use junction_core::types::{ServerId, ToolDefinition};
use junction_core::CapabilityAggregator;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const NOT_CONFIGURED: &str = "No directory API key is configured, so no downstream servers are \
available. Set JUNCTION_API_KEY (or api_key in the [directory] section of junction.toml) and \
restart the gateway.";

/// `discover_servers`: optionally re-discover at the source, then rebuild
/// the catalog and describe it
pub struct DiscoverServersTool {
    aggregator: Arc<CapabilityAggregator>,
}

impl DiscoverServersTool {
    pub fn new(aggregator: Arc<CapabilityAggregator>) -> Self {
        Self { aggregator }
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverServersArgs {
    #[serde(default)]
    rediscover: bool,
    #[serde(default)]
    server_id: Option<String>,
}

#[async_trait::async_trait]
impl Tool for DiscoverServersTool {
    fn schema(&self) -> ToolDefinition {
        ToolDefinition {
            name: "discover_servers".to_string(),
            description: "List connected MCP servers with their tools, resources, prompts and operator \
                          instructions. Set rediscover to ask the directory to re-inspect servers first."
                .to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "rediscover": json_schema_boolean(
                        "Ask the directory to re-discover before listing (default: false)"
                    ),
                    "server_id": json_schema_string(
                        "Only re-discover this server; requires rediscover"
                    )
                }),
                vec![],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: DiscoverServersArgs = serde_json::from_value(arguments)
            .context("Invalid arguments for discover_servers")?;

        if args.server_id.is_some() && !args.rediscover {
            bail!("server_id only applies with rediscover set to true");
        }

        if !self.aggregator.is_configured() {
            return Ok(CallToolResult::text(NOT_CONFIGURED));
        }

        let mut notes = Vec::new();
        if args.rediscover {
            let target = match args.server_id {
                Some(id) => DiscoveryTarget::Server(ServerId::new(id)),
                None => DiscoveryTarget::All,
            };

            match self.aggregator.directory().trigger_discovery(target.clone()).await {
                Ok(status) => {
                    info!(scope = %target.path_segment(), status = %status.status, "re-discovery requested");
                    let mut note = format!("Re-discovery {}: {}", target.path_segment(), status.status);
                    if let Some(message) = status.message {
                        note.push_str(&format!(" ({message})"));
                    }
                    notes.push(note);
                }
                Err(e) if e.is_config() => return Err(e.into()),
                Err(e) if matches!(target, DiscoveryTarget::Server(_)) => {
                    warn!(scope = %target.path_segment(), error = %e, "re-discovery request failed");
                    return Err(anyhow::Error::new(e)
                        .context(format!("Re-discovery of server {} failed", target.path_segment())));
                }
                // A full listing is still worth returning
                Err(e) => {
                    warn!(scope = %target.path_segment(), error = %e, "re-discovery request failed");
                    notes.push(format!("Re-discovery request failed: {e}"));
                }
            }
        }

        let snapshot = self.aggregator.refresh(true).await;

        let mut text = String::new();
        for note in notes {
            text.push_str(&note);
            text.push_str("\n\n");
        }
        text.push_str(&snapshot.render_summary());

        Ok(CallToolResult::text(text))
    }
}
