// Core types and aggregation logic for the Junction MCP gateway

pub mod aggregator;
pub mod cache;
pub mod context;
pub mod directory;
pub mod error;
pub mod naming;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregator::{AggregatorConfig, CapabilityAggregator, CatalogSnapshot, DiscoveryMode};
pub use error::{GatewayError, GatewayResult};
pub use types::*;
