//! Protocol client for downstream MCP servers.
//!
//! [`McpClient`] speaks MCP over any [`RpcChannel`]: the handshake, capability
//! listing with pagination, and forwarding of tool calls, resource reads
//! and prompt gets. [`DefaultTransportFactory`] picks the channel from the
//! server's connection parameters.

pub mod http;
pub mod stdio;

use crate::protocol::{
    Implementation, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, DEFAULT_PROTOCOL_VERSION,
};
use junction_core::error::{GatewayError, GatewayResult};
use junction_core::transport::{DownstreamClient, TransportFactory};
use junction_core::types::{
    ConnectionParams, DeclaredCapabilities, Invocation, ServerId, ToolDefinition,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use http::HttpChannel;
pub use stdio::StdioChannel;

/// Guard against servers that keep handing out cursors
const MAX_LIST_PAGES: usize = 100;

/// Request/response plumbing underneath a protocol client
#[async_trait::async_trait]
pub trait RpcChannel: Send + Sync {
    /// Send a request and return its `result`; JSON-RPC errors come back
    /// as [`GatewayError::Downstream`]
    async fn request(&self, method: &str, params: Option<Value>) -> GatewayResult<Value>;

    /// Send a notification; no response is expected
    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()>;

    /// Release the underlying process or connection
    async fn close(&self) -> GatewayResult<()>;
}

/// An initialized MCP client for one downstream server
pub struct McpClient {
    server: String,
    channel: Box<dyn RpcChannel>,
    init: InitializeResult,
}

impl McpClient {
    /// Run the `initialize` handshake over `channel`.
    ///
    /// On failure the channel is closed before the error is returned.
    pub async fn connect(server: impl Into<String>, channel: Box<dyn RpcChannel>) -> GatewayResult<Self> {
        let server = server.into();
        let params = json!({
            "protocolVersion": DEFAULT_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": Implementation {
                name: "junction".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        });

        let handshake = async {
            let result = channel.request("initialize", Some(params)).await?;
            let init: InitializeResult = decode(&server, "initialize", result)?;
            channel.notify("notifications/initialized", None).await?;
            Ok::<_, GatewayError>(init)
        };

        match handshake.await {
            Ok(init) => {
                info!(
                    server = %server,
                    remote = %init.server_info.name,
                    protocol = %init.protocol_version,
                    "downstream handshake complete"
                );
                Ok(Self {
                    server,
                    channel,
                    init,
                })
            }
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    debug!(server = %server, error = %close_err, "close after failed handshake");
                }
                Err(e)
            }
        }
    }

    pub fn server_info(&self) -> &Implementation {
        &self.init.server_info
    }

    async fn list_tools(&self) -> GatewayResult<Vec<ToolDefinition>> {
        self.paginate("tools/list", |page: ListToolsResult| (page.tools, page.next_cursor))
            .await
    }

    /// Follow `nextCursor` until the server stops returning one
    async fn paginate<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> GatewayResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.channel.request(method, params).await?;
            let (page, next) = split(decode(&self.server, method, result)?);
            items.extend(page);

            match next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        warn!(server = %self.server, method, "pagination limit reached, truncating listing");
        Ok(items)
    }

    /// Optional listings degrade to empty so one missing feature does not
    /// hide the server's tools
    fn optional<T>(&self, what: &str, listing: GatewayResult<Vec<T>>) -> Vec<T> {
        listing.unwrap_or_else(|e| {
            debug!(server = %self.server, listing = what, error = %e, "optional listing failed");
            Vec::new()
        })
    }
}

#[async_trait::async_trait]
impl DownstreamClient for McpClient {
    async fn list_capabilities(&self) -> GatewayResult<DeclaredCapabilities> {
        let caps = &self.init.capabilities;

        let tools = if caps.tools.is_some() {
            self.list_tools().await?
        } else {
            Vec::new()
        };

        let (resources, resource_templates) = if caps.resources.is_some() {
            let resources = self
                .paginate("resources/list", |p: ListResourcesResult| (p.resources, p.next_cursor))
                .await;
            let templates = self
                .paginate("resources/templates/list", |p: ListResourceTemplatesResult| {
                    (p.resource_templates, p.next_cursor)
                })
                .await;
            (
                self.optional("resources", resources),
                self.optional("resource templates", templates),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let prompts = if caps.prompts.is_some() {
            let prompts = self
                .paginate("prompts/list", |p: ListPromptsResult| (p.prompts, p.next_cursor))
                .await;
            self.optional("prompts", prompts)
        } else {
            Vec::new()
        };

        Ok(DeclaredCapabilities {
            tools,
            resources,
            resource_templates,
            prompts,
        })
    }

    async fn invoke(&self, invocation: Invocation) -> GatewayResult<Value> {
        let (method, params) = match invocation {
            Invocation::CallTool {
                name,
                arguments,
                meta,
            } => {
                let mut params = json!({ "name": name });
                if let Some(arguments) = arguments {
                    params["arguments"] = arguments;
                }
                if let Some(meta) = meta {
                    params["_meta"] = meta;
                }
                ("tools/call", params)
            }
            Invocation::ReadResource { uri, meta } => {
                let mut params = json!({ "uri": uri });
                if let Some(meta) = meta {
                    params["_meta"] = meta;
                }
                ("resources/read", params)
            }
            Invocation::GetPrompt {
                name,
                arguments,
                meta,
            } => {
                let mut params = json!({ "name": name });
                if let Some(arguments) = arguments {
                    params["arguments"] = arguments;
                }
                if let Some(meta) = meta {
                    params["_meta"] = meta;
                }
                ("prompts/get", params)
            }
        };

        self.channel.request(method, Some(params)).await
    }

    async fn close(&self) -> GatewayResult<()> {
        self.channel.close().await
    }
}

fn decode<T: DeserializeOwned>(server: &str, method: &str, value: Value) -> GatewayResult<T> {
    serde_json::from_value(value)
        .map_err(|e| GatewayError::transport(server, format!("malformed {method} result: {e}")))
}

/// Opens stdio or HTTP channels and performs the handshake
pub struct DefaultTransportFactory {
    http_timeout: Duration,
}

impl DefaultTransportFactory {
    pub fn new(http_timeout: Duration) -> Self {
        Self { http_timeout }
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait::async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(
        &self,
        server_id: &ServerId,
        params: &ConnectionParams,
    ) -> GatewayResult<Box<dyn DownstreamClient>> {
        let channel: Box<dyn RpcChannel> = match params {
            ConnectionParams::Stdio {
                command,
                args,
                env,
                cwd,
            } => Box::new(
                StdioChannel::spawn(server_id.as_str(), command, args, env, cwd.as_deref())
                    .map_err(|e| GatewayError::unreachable(server_id, e.to_string()))?,
            ),
            ConnectionParams::Http { url, headers } => Box::new(
                HttpChannel::new(server_id.as_str(), url, headers, self.http_timeout)
                    .map_err(|e| GatewayError::unreachable(server_id, e.to_string()))?,
            ),
        };

        let client = McpClient::connect(server_id.as_str(), channel)
            .await
            .map_err(|e| GatewayError::unreachable(server_id, format!("handshake failed: {e}")))?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Channel replaying scripted results and recording what was sent
    #[derive(Default)]
    pub(crate) struct ScriptedChannel {
        replies: Mutex<VecDeque<GatewayResult<Value>>>,
        pub(crate) sent: Mutex<Vec<(String, Option<Value>)>>,
        pub(crate) closed: AtomicBool,
    }

    impl ScriptedChannel {
        pub(crate) fn new(replies: Vec<GatewayResult<Value>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl RpcChannel for std::sync::Arc<ScriptedChannel> {
        async fn request(&self, method: &str, params: Option<Value>) -> GatewayResult<Value> {
            self.sent.lock().unwrap().push((method.to_string(), params));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::transport("scripted", "no reply scripted")))
        }

        async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
            self.sent.lock().unwrap().push((method.to_string(), params));
            Ok(())
        }

        async fn close(&self) -> GatewayResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn init_reply(capabilities: Value) -> GatewayResult<Value> {
        Ok(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": capabilities,
            "serverInfo": {"name": "github-mcp", "version": "1.2.0"}
        }))
    }

    fn methods(channel: &ScriptedChannel) -> Vec<String> {
        channel.sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    #[tokio::test]
    async fn test_handshake_then_paginated_listing() {
        let channel = std::sync::Arc::new(ScriptedChannel::new(vec![
            init_reply(json!({"tools": {}, "prompts": {}})),
            Ok(json!({"tools": [{"name": "create_issue"}], "nextCursor": "page-2"})),
            Ok(json!({"tools": [{"name": "list_prs", "description": "List PRs"}]})),
            Ok(json!({"prompts": [{"name": "triage"}]})),
        ]));

        let client = McpClient::connect("s1", Box::new(channel.clone())).await.unwrap();
        assert_eq!(client.server_info().name, "github-mcp");

        let caps = client.list_capabilities().await.unwrap();
        let names: Vec<&str> = caps.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["create_issue", "list_prs"]);
        assert_eq!(caps.prompts[0].name, "triage");
        assert!(caps.resources.is_empty());

        assert_eq!(
            methods(&channel),
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list", "prompts/list"]
        );
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[3].1, Some(json!({"cursor": "page-2"})));
    }

    #[tokio::test]
    async fn test_optional_listing_failure_keeps_tools() {
        let channel = std::sync::Arc::new(ScriptedChannel::new(vec![
            init_reply(json!({"tools": {}, "resources": {}})),
            Ok(json!({"tools": [{"name": "search"}]})),
            Err(GatewayError::Downstream {
                code: -32601,
                message: "Method not found".to_string(),
                data: None,
            }),
            Ok(json!({"resourceTemplates": [{"uriTemplate": "notes://{id}", "name": "note"}]})),
        ]));

        let client = McpClient::connect("s1", Box::new(channel.clone())).await.unwrap();
        let caps = client.list_capabilities().await.unwrap();

        assert_eq!(caps.tools.len(), 1);
        assert!(caps.resources.is_empty());
        assert_eq!(caps.resource_templates[0].uri_template, "notes://{id}");
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_channel() {
        let channel = std::sync::Arc::new(ScriptedChannel::new(vec![Ok(json!({"unexpected": true}))]));

        let result = McpClient::connect("s1", Box::new(channel.clone())).await;
        assert!(matches!(result, Err(GatewayError::Transport { .. })));
        assert!(channel.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invoke_forwards_original_name_and_meta() {
        let channel = std::sync::Arc::new(ScriptedChannel::new(vec![
            init_reply(json!({"tools": {}})),
            Ok(json!({"content": [{"type": "text", "text": "created #12"}]})),
        ]));
        let client = McpClient::connect("s1", Box::new(channel.clone())).await.unwrap();

        let result = client
            .invoke(Invocation::CallTool {
                name: "create_issue".to_string(),
                arguments: Some(json!({"title": "Bug"})),
                meta: Some(json!({"progressToken": 7})),
            })
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "created #12");

        let sent = channel.sent.lock().unwrap();
        let (method, params) = sent.last().unwrap();
        assert_eq!(method, "tools/call");
        assert_eq!(
            params.as_ref().unwrap(),
            &json!({"name": "create_issue", "arguments": {"title": "Bug"}, "_meta": {"progressToken": 7}})
        );
    }

    #[tokio::test]
    async fn test_invoke_sends_only_what_the_caller_gave() {
        let channel = std::sync::Arc::new(ScriptedChannel::new(vec![
            init_reply(json!({"tools": {}, "prompts": {}})),
            Ok(json!({"content": []})),
            Ok(json!({"messages": []})),
        ]));
        let client = McpClient::connect("s1", Box::new(channel.clone())).await.unwrap();

        client
            .invoke(Invocation::CallTool {
                name: "list_prs".to_string(),
                arguments: None,
                meta: None,
            })
            .await
            .unwrap();
        client
            .invoke(Invocation::GetPrompt {
                name: "triage".to_string(),
                arguments: Some(json!({"repo": "junction"})),
                meta: Some(json!({"progressToken": "t1"})),
            })
            .await
            .unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[2], ("tools/call".to_string(), Some(json!({"name": "list_prs"}))));
        assert_eq!(
            sent[3],
            (
                "prompts/get".to_string(),
                Some(json!({"name": "triage", "arguments": {"repo": "junction"}, "_meta": {"progressToken": "t1"}}))
            )
        );
    }

    #[tokio::test]
    async fn test_downstream_error_is_returned_verbatim() {
        let channel = std::sync::Arc::new(ScriptedChannel::new(vec![
            init_reply(json!({"tools": {}})),
            Err(GatewayError::Downstream {
                code: -32099,
                message: "quota exceeded".to_string(),
                data: Some(json!({"limit": 10})),
            }),
        ]));
        let client = McpClient::connect("s1", Box::new(channel)).await.unwrap();

        let err = client
            .invoke(Invocation::GetPrompt {
                name: "triage".to_string(),
                arguments: None,
                meta: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Downstream { code: -32099, .. }));
    }

    #[tokio::test]
    async fn test_factory_reports_spawn_failure_as_unreachable() {
        let factory = DefaultTransportFactory::default();
        let params = ConnectionParams::Stdio {
            command: "/nonexistent/junction-test-binary".to_string(),
            args: Vec::new(),
            env: Default::default(),
            cwd: None,
        };

        let result = factory.open(&ServerId::new("s9"), &params).await;
        assert!(matches!(result, Err(GatewayError::Unreachable { .. })));
    }
}
