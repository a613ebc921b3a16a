//! Error taxonomy shared by every gateway component.

use crate::types::ServerId;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors produced while aggregating or forwarding to downstream servers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Missing credential or base URL.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport open or protocol handshake failed.
    #[error("Server '{server_id}' is unreachable: {reason}")]
    Unreachable { server_id: ServerId, reason: String },

    /// No capability with this name exists in the unified namespace.
    #[error("Capability not found: {name}")]
    UnknownCapability { name: String },

    /// The downstream server itself reported a JSON-RPC error.
    #[error("Downstream error [{code}]: {message}")]
    Downstream {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A bounded operation ran out of time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed message or I/O failure on an open transport.
    #[error("Transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The directory service call failed.
    #[error("Directory error: {0}")]
    Directory(String),
}

impl GatewayError {
    pub fn unreachable(server_id: &ServerId, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            server_id: server_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn transport(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            server: server.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether this is a configuration problem rather than a runtime failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
