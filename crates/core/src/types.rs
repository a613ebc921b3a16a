use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Opaque identifier of a downstream server (a UUID in practice)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How to reach a downstream server.
///
/// Maps are ordered so the serialized form is canonical, which keeps
/// [`SessionKey::derive`] stable across reloads of the same descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ConnectionParams {
    /// Child process speaking newline-delimited JSON-RPC on stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Remote server accepting JSON-RPC over HTTP POST
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl ConnectionParams {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

/// Registry key of a connection session: `sha256(server_id, params)`.
///
/// A change in connection parameters yields a different key, which is how
/// the session manager detects drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn derive(server_id: &ServerId, params: &ConnectionParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(server_id.as_str().as_bytes());
        hasher.update([0u8]);
        // Serializing a plain enum of strings and ordered maps cannot fail;
        // fall back to the debug form rather than panicking.
        match serde_json::to_vec(params) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{params:?}").as_bytes()),
        }
        Self(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is enough to tell sessions apart in logs
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// A tool as declared by its owning downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", alias = "input_schema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

/// A readable resource exposed by a downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", alias = "mime_type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A parameterized resource family exposed by a downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplateDefinition {
    #[serde(rename = "uriTemplate", alias = "uri_template")]
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", alias = "mime_type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A prompt exposed by a downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Everything a downstream server declares it can do
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredCapabilities {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default, alias = "resourceTemplates")]
    pub resource_templates: Vec<ResourceTemplateDefinition>,
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
}

impl DeclaredCapabilities {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
            && self.resources.is_empty()
            && self.resource_templates.is_empty()
            && self.prompts.is_empty()
    }

    pub fn total(&self) -> usize {
        self.tools.len() + self.resources.len() + self.resource_templates.len() + self.prompts.len()
    }
}

/// A downstream server as published by the directory service.
///
/// Immutable for its lifetime; reconfiguration replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamServerDescriptor {
    pub id: ServerId,
    pub name: String,
    pub connection: ConnectionParams,
    #[serde(default)]
    pub capabilities: DeclaredCapabilities,
    /// Operator instructions, either a JSON object or a JSON-encoded string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<serde_json::Value>,
}

impl DownstreamServerDescriptor {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::derive(&self.id, &self.connection)
    }
}

/// Where a prefixed capability came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOrigin {
    pub original_name: String,
    pub server_id: ServerId,
}

/// A single forwardable request against one downstream server
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    CallTool {
        name: String,
        /// Forwarded as sent; `None` when the caller omitted it
        arguments: Option<serde_json::Value>,
        meta: Option<serde_json::Value>,
    },
    ReadResource {
        uri: String,
        meta: Option<serde_json::Value>,
    },
    GetPrompt {
        name: String,
        arguments: Option<serde_json::Value>,
        meta: Option<serde_json::Value>,
    },
}

impl Invocation {
    /// Name or URI of the targeted capability, for logs and errors
    pub fn target(&self) -> &str {
        match self {
            Self::CallTool { name, .. } | Self::GetPrompt { name, .. } => name,
            Self::ReadResource { uri, .. } => uri,
        }
    }
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
