// Abstract contract for talking to downstream servers

use crate::error::GatewayResult;
use crate::types::{ConnectionParams, DeclaredCapabilities, Invocation, ServerId};

/// An initialized protocol client for one downstream server
#[async_trait::async_trait]
pub trait DownstreamClient: Send + Sync {
    /// Ask the server what it offers
    async fn list_capabilities(&self) -> GatewayResult<DeclaredCapabilities>;

    /// Forward one request and return the server's result payload untouched
    async fn invoke(&self, invocation: Invocation) -> GatewayResult<serde_json::Value>;

    /// Release the transport; called at most once per client
    async fn close(&self) -> GatewayResult<()>;
}

/// Opens transports and performs the protocol handshake
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        server_id: &ServerId,
        params: &ConnectionParams,
    ) -> GatewayResult<Box<dyn DownstreamClient>>;
}
