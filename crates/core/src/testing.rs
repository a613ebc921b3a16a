//! In-memory transports and directories for exercising the gateway without
//! real downstream servers.

use crate::directory::{DiscoveryStatus, DiscoveryTarget, ServerDirectory};
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{DownstreamClient, TransportFactory};
use crate::types::{
    ConnectionParams, DeclaredCapabilities, DownstreamServerDescriptor, Invocation, ServerId,
    ToolDefinition,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn stdio_params(command: &str) -> ConnectionParams {
    ConnectionParams::Stdio {
        command: command.to_string(),
        args: Vec::new(),
        env: BTreeMap::new(),
        cwd: None,
    }
}

pub fn tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("{name} tool"),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
    }
}

/// Descriptor for server `id` called `name`, declaring the given tools
pub fn descriptor(id: &str, name: &str, tools: &[&str]) -> DownstreamServerDescriptor {
    DownstreamServerDescriptor {
        id: ServerId::new(id),
        name: name.to_string(),
        connection: stdio_params(&format!("{id}-mcp")),
        capabilities: DeclaredCapabilities {
            tools: tools.iter().map(|t| tool(t)).collect(),
            ..Default::default()
        },
        custom_instructions: None,
    }
}

/// Behavior of one fake downstream server
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    pub capabilities: DeclaredCapabilities,
    pub fail_open: bool,
    pub fail_list: bool,
    pub fail_close: bool,
    pub open_delay: Option<Duration>,
    pub list_delay: Option<Duration>,
    pub call_delay: Option<Duration>,
    pub call_error: Option<GatewayError>,
}

impl FakeServer {
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            capabilities: DeclaredCapabilities {
                tools: tools.iter().map(|t| tool(t)).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Transport factory backed by [`FakeServer`]s, counting opens and closes
#[derive(Default)]
pub struct FakeTransportFactory {
    servers: Mutex<HashMap<ServerId, FakeServer>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    invocations: Arc<Mutex<Vec<(ServerId, Invocation)>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, id: &str, server: FakeServer) {
        self.servers
            .lock()
            .unwrap()
            .insert(ServerId::new(id), server);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every invocation forwarded so far, in order
    pub fn invocations(&self) -> Vec<(ServerId, Invocation)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn open(
        &self,
        server_id: &ServerId,
        _params: &ConnectionParams,
    ) -> GatewayResult<Box<dyn DownstreamClient>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let server = self
            .servers
            .lock()
            .unwrap()
            .get(server_id)
            .cloned()
            .ok_or_else(|| GatewayError::unreachable(server_id, "no such fake server"))?;

        if let Some(delay) = server.open_delay {
            tokio::time::sleep(delay).await;
        }
        if server.fail_open {
            return Err(GatewayError::unreachable(server_id, "handshake refused"));
        }

        Ok(Box::new(FakeClient {
            server_id: server_id.clone(),
            server,
            closes: self.closes.clone(),
            invocations: self.invocations.clone(),
        }))
    }
}

struct FakeClient {
    server_id: ServerId,
    server: FakeServer,
    closes: Arc<AtomicUsize>,
    invocations: Arc<Mutex<Vec<(ServerId, Invocation)>>>,
}

#[async_trait::async_trait]
impl DownstreamClient for FakeClient {
    async fn list_capabilities(&self) -> GatewayResult<DeclaredCapabilities> {
        if let Some(delay) = self.server.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.server.fail_list {
            return Err(GatewayError::transport(self.server_id.as_str(), "listing failed"));
        }
        Ok(self.server.capabilities.clone())
    }

    async fn invoke(&self, invocation: Invocation) -> GatewayResult<serde_json::Value> {
        self.invocations
            .lock()
            .unwrap()
            .push((self.server_id.clone(), invocation.clone()));

        if let Some(delay) = self.server.call_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.server.call_error {
            return Err(err.clone());
        }

        Ok(match invocation {
            Invocation::CallTool { name, arguments, meta } => serde_json::json!({
                "content": [{"type": "text", "text": format!("{} ran {}", self.server_id, name)}],
                "arguments": arguments,
                "meta": meta,
            }),
            Invocation::ReadResource { uri, .. } => serde_json::json!({
                "contents": [{"uri": uri, "text": format!("read by {}", self.server_id)}]
            }),
            Invocation::GetPrompt { name, meta, .. } => serde_json::json!({
                "messages": [{"role": "user", "content": {"type": "text", "text": name}}],
                "meta": meta,
            }),
        })
    }

    async fn close(&self) -> GatewayResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_close {
            return Err(GatewayError::transport(self.server_id.as_str(), "close failed"));
        }
        Ok(())
    }
}

/// Directory returning a fixed, swappable list of descriptors
pub struct FakeDirectory {
    servers: Mutex<GatewayResult<Vec<DownstreamServerDescriptor>>>,
    configured: AtomicBool,
    list_calls: AtomicUsize,
    discovery_requests: Mutex<Vec<DiscoveryTarget>>,
    discovery_error: Mutex<Option<GatewayError>>,
    reports: Mutex<Vec<(ServerId, Vec<String>)>>,
}

impl FakeDirectory {
    pub fn new(servers: Vec<DownstreamServerDescriptor>) -> Self {
        Self {
            servers: Mutex::new(Ok(servers)),
            configured: AtomicBool::new(true),
            list_calls: AtomicUsize::new(0),
            discovery_requests: Mutex::new(Vec::new()),
            discovery_error: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn unconfigured() -> Self {
        let directory = Self::new(Vec::new());
        directory.configured.store(false, Ordering::SeqCst);
        directory
    }

    pub fn set_servers(&self, servers: Vec<DownstreamServerDescriptor>) {
        *self.servers.lock().unwrap() = Ok(servers);
    }

    pub fn fail_with(&self, error: GatewayError) {
        *self.servers.lock().unwrap() = Err(error);
    }

    /// Make every re-discovery request fail with `error`
    pub fn fail_discovery_with(&self, error: GatewayError) {
        *self.discovery_error.lock().unwrap() = Some(error);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn discovery_requests(&self) -> Vec<DiscoveryTarget> {
        self.discovery_requests.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<(ServerId, Vec<String>)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ServerDirectory for FakeDirectory {
    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn list_servers(&self) -> GatewayResult<Vec<DownstreamServerDescriptor>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_configured() {
            return Err(GatewayError::Config("API key is not configured".to_string()));
        }
        self.servers.lock().unwrap().clone()
    }

    async fn trigger_discovery(&self, target: DiscoveryTarget) -> GatewayResult<DiscoveryStatus> {
        if !self.is_configured() {
            return Err(GatewayError::Config("API key is not configured".to_string()));
        }
        self.discovery_requests.lock().unwrap().push(target.clone());
        if let Some(error) = self.discovery_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(DiscoveryStatus {
            status: "queued".to_string(),
            message: Some(format!("discovery queued for {}", target.path_segment())),
        })
    }

    async fn report_tools(&self, server_id: &ServerId, tools: &[ToolDefinition]) -> GatewayResult<()> {
        self.reports.lock().unwrap().push((
            server_id.clone(),
            tools.iter().map(|t| t.name.clone()).collect(),
        ));
        Ok(())
    }
}
