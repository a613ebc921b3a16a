// Onboarding help for agents new to the gateway

use crate::protocol::CallToolResult;
use crate::tools::{json_schema_enum, json_schema_object, Tool};
use anyhow::{Context, Result};
use junction_core::types::ToolDefinition;
use junction_core::CapabilityAggregator;
use serde::Deserialize;
use std::sync::Arc;

const OVERVIEW: &str = "\
Junction connects you to every MCP server registered in your directory \
through this single endpoint.

Tools from downstream servers are listed under a prefixed name: the \
server's name, an underscore, and the tool's own name. \
`GitHub_create_issue` is the `create_issue` tool of the server called \
GitHub. Call prefixed tools exactly as listed; arguments are passed \
through unchanged.

Built-in tools:
- getting_started: this guide
- discover_servers: list connected servers, their tools and operator \
instructions; set `rediscover` to refresh them from the source
- search_knowledge: search the shared knowledge base
- manage_notifications: list, create, update and delete notifications
- manage_documents: list, read, create, update and delete documents";

const NAMING: &str = "\
Prefixed names are built from the server's display name. Characters other \
than letters, digits and '-' become '_', repeated underscores collapse, \
and leading or trailing underscores are dropped. When two servers produce \
the same prefixed name, the server whose id sorts last wins. A downstream \
tool whose prefixed name is one of the built-in tool names is not listed.

Resources keep their original URIs; read them with resources/read using \
the URI from resources/list.";

const TROUBLESHOOTING: &str = "\
- A tool is missing: call discover_servers with rediscover=true. Servers \
that failed during discovery are listed under \"Unavailable servers\".
- \"Configuration error\": no directory API key is set. Export \
JUNCTION_API_KEY or add api_key to the [directory] section of \
junction.toml, then restart.
- \"unreachable\": the downstream server could not be started or \
contacted. Other servers keep working.
- \"timed out\": the downstream server took too long to answer.";

/// `getting_started`: how to use the gateway, plus the catalog's state
pub struct GettingStartedTool {
    aggregator: Arc<CapabilityAggregator>,
}

impl GettingStartedTool {
    pub fn new(aggregator: Arc<CapabilityAggregator>) -> Self {
        Self { aggregator }
    }

    fn status(&self) -> String {
        if !self.aggregator.is_configured() {
            return "Status: no directory API key is configured, so no downstream servers are available."
                .to_string();
        }

        let snapshot = self.aggregator.snapshot();
        match snapshot.refreshed_at {
            Some(at) => format!(
                "Status: {} server(s) and {} tool(s) as of {}.",
                snapshot.servers.len(),
                snapshot.tools.len(),
                at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => "Status: servers have not been discovered yet; call discover_servers.".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GettingStartedArgs {
    #[serde(default)]
    topic: Option<String>,
}

#[async_trait::async_trait]
impl Tool for GettingStartedTool {
    fn schema(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getting_started".to_string(),
            description: "Explain how this gateway works: tool naming, built-in tools and troubleshooting"
                .to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "topic": json_schema_enum(
                        &["overview", "naming", "troubleshooting"],
                        "Section to show (default: overview)"
                    )
                }),
                vec![],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: GettingStartedArgs = serde_json::from_value(arguments)
            .context("Invalid arguments for getting_started")?;

        let body = match args.topic.as_deref() {
            Some("naming") => NAMING,
            Some("troubleshooting") => TROUBLESHOOTING,
            _ => OVERVIEW,
        };

        Ok(CallToolResult::text(format!("{body}\n\n{}", self.status())))
    }
}
