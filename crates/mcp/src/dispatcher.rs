//! Request dispatch for the client-facing endpoint.
//!
//! Each request is classified on its own: built-in tools run locally,
//! listings come from the aggregated catalog, and everything else is
//! resolved to its owning server and forwarded under its original name.

use crate::protocol::{
    negotiate_protocol_version, CallToolParams, CallToolResult, GetPromptParams, Implementation,
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListChangedCapability, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, ReadResourceParams, ServerCapabilities,
};
use crate::tools::{ToolCallError, ToolRegistry};
use junction_core::session::SessionManager;
use junction_core::types::{CapabilityOrigin, Invocation};
use junction_core::{CapabilityAggregator, CatalogSnapshot, GatewayError, GatewayResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type HandlerResult = Result<Value, JsonRpcError>;

pub struct RequestDispatcher {
    aggregator: Arc<CapabilityAggregator>,
    sessions: Arc<SessionManager>,
    tools: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl RequestDispatcher {
    pub fn new(
        aggregator: Arc<CapabilityAggregator>,
        sessions: Arc<SessionManager>,
        tools: Arc<ToolRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            sessions,
            tools,
            call_timeout,
        }
    }

    /// Handle one message; notifications produce no response
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification");
            return None;
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
        }

        let result = match request.method.as_str() {
            "initialize" => self.initialize(request.params).await,
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools().await,
            "tools/call" => self.call_tool(request.params).await,
            "resources/list" => self.list_resources().await,
            "resources/templates/list" => self.list_resource_templates().await,
            "resources/read" => self.read_resource(request.params).await,
            "prompts/list" => self.list_prompts().await,
            "prompts/get" => self.get_prompt(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    async fn initialize(&self, params: Option<Value>) -> HandlerResult {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();

        let version = negotiate_protocol_version(params.protocol_version.as_deref());
        if let Some(client) = &params.client_info {
            info!(client = %client.name, client_version = %client.version, protocol = version, "client initialized");
        }

        let snapshot = self.aggregator.refresh(false).await;
        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ListChangedCapability::default()),
                resources: Some(ListChangedCapability::default()),
                prompts: Some(ListChangedCapability::default()),
            },
            server_info: Implementation {
                name: "junction".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: snapshot.contexts.render_all(),
        };
        to_value(&result)
    }

    async fn list_tools(&self) -> HandlerResult {
        let snapshot = self.aggregator.refresh(false).await;

        let mut tools = self.tools.list_schemas();
        tools.extend(snapshot.tools.iter().cloned());
        to_value(&ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn list_resources(&self) -> HandlerResult {
        let snapshot = self.aggregator.refresh(false).await;
        to_value(&ListResourcesResult {
            resources: snapshot.resources.clone(),
            next_cursor: None,
        })
    }

    async fn list_resource_templates(&self) -> HandlerResult {
        let snapshot = self.aggregator.refresh(false).await;
        to_value(&ListResourceTemplatesResult {
            resource_templates: snapshot.resource_templates.clone(),
            next_cursor: None,
        })
    }

    async fn list_prompts(&self) -> HandlerResult {
        let snapshot = self.aggregator.refresh(false).await;
        to_value(&ListPromptsResult {
            prompts: snapshot.prompts.clone(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> HandlerResult {
        let params: CallToolParams = parse_params(params)?;

        if self.tools.contains(&params.name) {
            return self.call_static(&params.name, params.arguments).await;
        }

        let snapshot = self.ready_snapshot().await?;
        let origin = snapshot
            .index
            .resolve_tool(&params.name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownCapability {
                name: params.name.clone(),
            })?;

        let invocation = Invocation::CallTool {
            name: origin.original_name.clone(),
            arguments: params.arguments,
            meta: params.meta,
        };
        Ok(self.forward(&snapshot, &origin, invocation).await?)
    }

    async fn read_resource(&self, params: Option<Value>) -> HandlerResult {
        let params: ReadResourceParams = parse_params(params)?;

        let snapshot = self.ready_snapshot().await?;
        let origin = resolve_uri(&snapshot, &params.uri).ok_or_else(|| {
            GatewayError::UnknownCapability {
                name: params.uri.clone(),
            }
        })?;

        let invocation = Invocation::ReadResource {
            uri: origin.original_name.clone(),
            meta: params.meta,
        };
        Ok(self.forward(&snapshot, &origin, invocation).await?)
    }

    async fn get_prompt(&self, params: Option<Value>) -> HandlerResult {
        let params: GetPromptParams = parse_params(params)?;

        let snapshot = self.ready_snapshot().await?;
        let origin = snapshot
            .index
            .resolve_prompt(&params.name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownCapability {
                name: params.name.clone(),
            })?;

        let invocation = Invocation::GetPrompt {
            name: origin.original_name.clone(),
            arguments: params.arguments,
            meta: params.meta,
        };
        Ok(self.forward(&snapshot, &origin, invocation).await?)
    }

    /// Catalog to resolve against; invocations need the directory credential
    async fn ready_snapshot(&self) -> GatewayResult<Arc<CatalogSnapshot>> {
        if !self.aggregator.is_configured() {
            return Err(GatewayError::Config(
                "directory API key is not configured".to_string(),
            ));
        }
        Ok(self.aggregator.refresh(false).await)
    }

    async fn forward(
        &self,
        snapshot: &CatalogSnapshot,
        origin: &CapabilityOrigin,
        invocation: Invocation,
    ) -> GatewayResult<Value> {
        let descriptor = snapshot
            .descriptor(&origin.server_id)
            .ok_or_else(|| GatewayError::unreachable(&origin.server_id, "server is no longer listed"))?;

        let session = self
            .sessions
            .session_for(descriptor)
            .await
            .ok_or_else(|| GatewayError::unreachable(&origin.server_id, "could not open a session"))?;

        let target = invocation.target().to_string();
        debug!(server_id = %origin.server_id, capability = %target, "forwarding");

        match tokio::time::timeout(self.call_timeout, session.invoke(invocation)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!(server_id = %origin.server_id, capability = %target, error = %e, "downstream call failed");
                Err(e)
            }
            Err(_) => {
                warn!(server_id = %origin.server_id, capability = %target, "downstream call timed out");
                Err(GatewayError::timeout(
                    format!("{} on server '{}'", target, origin.server_id),
                    self.call_timeout,
                ))
            }
        }
    }

    async fn call_static(&self, name: &str, arguments: Option<Value>) -> HandlerResult {
        debug!(tool = %name, "static tool call");

        match self.tools.call(name, arguments).await {
            Ok(result) => to_value(&result),
            Err(ToolCallError::InvalidArguments { tool, violations }) => Err(JsonRpcError::invalid_params(
                format!("Invalid arguments for {tool}: {}", violations.join("; ")),
            )
            .with_data(json!({ "violations": violations }))),
            Err(ToolCallError::NotFound(name)) => {
                Err(GatewayError::UnknownCapability { name }.into())
            }
            Err(ToolCallError::Failed(e)) => match e.downcast_ref::<GatewayError>() {
                Some(gateway @ GatewayError::Config(_)) => Err(gateway.clone().into()),
                _ => {
                    warn!(tool = %name, error = %format!("{e:#}"), "static tool failed");
                    to_value(&CallToolResult::error(format!("{e:#}")))
                }
            },
        }
    }
}

/// Listed resources match by exact URI; otherwise the template with the
/// longest literal prefix of `uri` owns it
fn resolve_uri(snapshot: &CatalogSnapshot, uri: &str) -> Option<CapabilityOrigin> {
    if let Some(origin) = snapshot.index.resolve_resource(uri) {
        return Some(origin.clone());
    }

    snapshot
        .resource_templates
        .iter()
        .filter_map(|template| {
            let prefix = template.uri_template.split('{').next().unwrap_or_default();
            (!prefix.is_empty() && uri.starts_with(prefix)).then_some((prefix.len(), &template.name))
        })
        .max_by_key(|(len, _)| *len)
        .and_then(|(_, name)| snapshot.index.resolve_resource_template(name))
        .map(|origin| CapabilityOrigin {
            original_name: uri.to_string(),
            server_id: origin.server_id.clone(),
        })
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid params: {e}")))
}

fn to_value(value: &impl Serialize) -> HandlerResult {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::internal_error(format!("failed to serialize result: {e}")))
}
