//! MCP gateway: one stdio endpoint in front of many downstream MCP servers.
//!
//! [`client`] connects to downstream servers, [`dispatcher`] answers the
//! client's requests from the aggregated catalog, and [`server`] runs the
//! newline-delimited JSON-RPC loop.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod protocol;
pub mod server;
pub mod tools;

pub use client::DefaultTransportFactory;
pub use config::GatewayConfig;
pub use dispatcher::RequestDispatcher;
pub use server::McpServer;
