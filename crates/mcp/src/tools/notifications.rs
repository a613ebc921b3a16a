// Operator notifications

use crate::protocol::CallToolResult;
use crate::tools::{json_schema_boolean, json_schema_enum, json_schema_string, Tool};
use anyhow::{Context, Result};
use junction_core::types::ToolDefinition;
use junction_core::GatewayError;
use junction_sdk::api::{NewNotification, NotificationUpdate};
use junction_sdk::DirectoryClient;
use serde::Deserialize;

/// `manage_notifications`
pub struct ManageNotificationsTool {
    client: DirectoryClient,
}

impl ManageNotificationsTool {
    pub fn new(client: DirectoryClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NotificationAction {
    List,
    Create,
    MarkRead,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
struct ManageNotificationsArgs {
    action: NotificationAction,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    read: Option<bool>,
}

impl ManageNotificationsArgs {
    fn id(&self) -> Result<&str> {
        self.id.as_deref().context("id is required for this action")
    }
}

#[async_trait::async_trait]
impl Tool for ManageNotificationsTool {
    fn schema(&self) -> ToolDefinition {
        ToolDefinition {
            name: "manage_notifications".to_string(),
            description: "List, create, update, mark as read or delete operator notifications".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": json_schema_enum(
                        &["list", "create", "mark_read", "update", "delete"],
                        "Operation to perform"
                    ),
                    "id": json_schema_string("Notification id (mark_read, update, delete)"),
                    "title": json_schema_string("Title (create, update)"),
                    "message": json_schema_string("Body text (create, update)"),
                    "level": json_schema_enum(&["info", "warning", "error"], "Severity (create)"),
                    "read": json_schema_boolean("Read flag (update)")
                },
                "required": ["action"],
                "allOf": [
                    {
                        "if": {"properties": {"action": {"const": "create"}}, "required": ["action"]},
                        "then": {"required": ["title", "message"]}
                    },
                    {
                        "if": {
                            "properties": {"action": {"enum": ["mark_read", "update", "delete"]}},
                            "required": ["action"]
                        },
                        "then": {"required": ["id"]}
                    }
                ]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: ManageNotificationsArgs = serde_json::from_value(arguments)
            .context("Invalid arguments for manage_notifications")?;
        let api = self.client.notifications();

        let result = match args.action {
            NotificationAction::List => {
                let notifications = api.list().await.map_err(GatewayError::from)?;
                let unread = notifications.iter().filter(|n| !n.read).count();
                CallToolResult::text(format!(
                    "{} notification(s), {} unread:\n\n{}",
                    notifications.len(),
                    unread,
                    serde_json::to_string_pretty(&notifications)?
                ))
            }
            NotificationAction::Create => {
                let created = api
                    .create(&NewNotification {
                        title: args.title.clone().context("title is required to create")?,
                        message: args.message.clone().context("message is required to create")?,
                        level: args.level.clone(),
                    })
                    .await
                    .map_err(GatewayError::from)?;
                CallToolResult::text(format!(
                    "Created notification {}:\n\n{}",
                    created.id,
                    serde_json::to_string_pretty(&created)?
                ))
            }
            NotificationAction::MarkRead => {
                let id = args.id()?;
                let update = NotificationUpdate {
                    read: Some(true),
                    ..Default::default()
                };
                api.update(id, &update).await.map_err(GatewayError::from)?;
                CallToolResult::text(format!("Marked notification {id} as read"))
            }
            NotificationAction::Update => {
                let id = args.id()?;
                let update = NotificationUpdate {
                    title: args.title.clone(),
                    message: args.message.clone(),
                    read: args.read,
                };
                let updated = api.update(id, &update).await.map_err(GatewayError::from)?;
                CallToolResult::text(format!(
                    "Updated notification {id}:\n\n{}",
                    serde_json::to_string_pretty(&updated)?
                ))
            }
            NotificationAction::Delete => {
                let id = args.id()?;
                api.delete(id).await.map_err(GatewayError::from)?;
                CallToolResult::text(format!("Deleted notification {id}"))
            }
        };

        Ok(result)
    }
}
