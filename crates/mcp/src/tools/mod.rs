pub mod discovery;
pub mod documents;
pub mod knowledge;
pub mod notifications;
pub mod onboarding;
pub mod registry;

pub use discovery::DiscoverServersTool;
pub use documents::ManageDocumentsTool;
pub use knowledge::SearchKnowledgeTool;
pub use notifications::ManageNotificationsTool;
pub use onboarding::GettingStartedTool;
pub use registry::{
    json_schema_array, json_schema_boolean, json_schema_enum, json_schema_integer,
    json_schema_object, json_schema_string, Tool, ToolCallError, ToolRegistry,
};

use junction_core::CapabilityAggregator;
use junction_sdk::DirectoryClient;
use std::sync::Arc;

/// Names of the built-in tools; downstream tools may not take them
pub const STATIC_TOOL_NAMES: &[&str] = &[
    "getting_started",
    "discover_servers",
    "search_knowledge",
    "manage_notifications",
    "manage_documents",
];

/// The gateway's built-in tools, in listing order
pub fn static_tools(aggregator: Arc<CapabilityAggregator>, client: DirectoryClient) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(GettingStartedTool::new(aggregator.clone())));
    registry.register(Arc::new(DiscoverServersTool::new(aggregator)));
    registry.register(Arc::new(SearchKnowledgeTool::new(client.clone())));
    registry.register(Arc::new(ManageNotificationsTool::new(client.clone())));
    registry.register(Arc::new(ManageDocumentsTool::new(client)));
    registry
}
