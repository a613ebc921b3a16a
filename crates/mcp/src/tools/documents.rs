// Shared documents

use crate::protocol::CallToolResult;
use crate::tools::{json_schema_array, json_schema_enum, json_schema_string, Tool};
use anyhow::{Context, Result};
use junction_core::types::ToolDefinition;
use junction_core::GatewayError;
use junction_sdk::api::{Document, DocumentUpdate, NewDocument};
use junction_sdk::DirectoryClient;
use serde::Deserialize;

/// `manage_documents`
pub struct ManageDocumentsTool {
    client: DirectoryClient,
}

impl ManageDocumentsTool {
    pub fn new(client: DirectoryClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DocumentAction {
    List,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
struct ManageDocumentsArgs {
    action: DocumentAction,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl ManageDocumentsArgs {
    fn id(&self) -> Result<&str> {
        self.id.as_deref().context("id is required for this action")
    }
}

fn render_document(document: &Document) -> String {
    let mut out = format!("# {}\nid: {}\n", document.title, document.id);
    if !document.tags.is_empty() {
        out.push_str(&format!("tags: {}\n", document.tags.join(", ")));
    }
    if let Some(updated) = document.updated_at.or(document.created_at) {
        out.push_str(&format!("updated: {}\n", updated.to_rfc3339()));
    }
    if !document.content.is_empty() {
        out.push('\n');
        out.push_str(&document.content);
        out.push('\n');
    }
    out
}

#[async_trait::async_trait]
impl Tool for ManageDocumentsTool {
    fn schema(&self) -> ToolDefinition {
        ToolDefinition {
            name: "manage_documents".to_string(),
            description: "List, read, create, update or delete shared documents".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": json_schema_enum(
                        &["list", "get", "create", "update", "delete"],
                        "Operation to perform"
                    ),
                    "id": json_schema_string("Document id (get, update, delete)"),
                    "title": json_schema_string("Title (create, update)"),
                    "content": json_schema_string("Markdown body (create, update)"),
                    "tags": json_schema_array(json_schema_string("Tag"), "Tags (create, update)")
                },
                "required": ["action"],
                "allOf": [
                    {
                        "if": {"properties": {"action": {"const": "create"}}, "required": ["action"]},
                        "then": {"required": ["title"]}
                    },
                    {
                        "if": {
                            "properties": {"action": {"enum": ["get", "update", "delete"]}},
                            "required": ["action"]
                        },
                        "then": {"required": ["id"]}
                    }
                ]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: ManageDocumentsArgs = serde_json::from_value(arguments)
            .context("Invalid arguments for manage_documents")?;
        let api = self.client.documents();

        let result = match args.action {
            DocumentAction::List => {
                let documents = api.list().await.map_err(GatewayError::from)?;
                if documents.is_empty() {
                    CallToolResult::text("No documents.")
                } else {
                    let lines: Vec<String> = documents
                        .iter()
                        .map(|d| format!("- {} ({})", d.title, d.id))
                        .collect();
                    CallToolResult::text(format!(
                        "{} document(s):\n{}",
                        documents.len(),
                        lines.join("\n")
                    ))
                }
            }
            DocumentAction::Get => {
                let document = api.get(args.id()?).await.map_err(GatewayError::from)?;
                CallToolResult::text(render_document(&document))
            }
            DocumentAction::Create => {
                let created = api
                    .create(&NewDocument {
                        title: args.title.clone().context("title is required to create")?,
                        content: args.content.clone().unwrap_or_default(),
                        tags: args.tags.clone().unwrap_or_default(),
                    })
                    .await
                    .map_err(GatewayError::from)?;
                CallToolResult::text(format!("Created document {}", created.id))
            }
            DocumentAction::Update => {
                let id = args.id()?;
                let update = DocumentUpdate {
                    title: args.title.clone(),
                    content: args.content.clone(),
                    tags: args.tags.clone(),
                };
                let updated = api.update(id, &update).await.map_err(GatewayError::from)?;
                CallToolResult::text(format!("Updated document {id}\n\n{}", render_document(&updated)))
            }
            DocumentAction::Delete => {
                let id = args.id()?;
                api.delete(id).await.map_err(GatewayError::from)?;
                CallToolResult::text(format!("Deleted document {id}"))
            }
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool(server: &MockServer) -> ManageDocumentsTool {
        ManageDocumentsTool::new(
            DirectoryClient::builder()
                .base_url(format!("{}/api/", server.uri()))
                .api_key("sk-test")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{"id": "d1", "title": "Onboarding"}, {"id": "d2", "title": "Runbook"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/documents/d2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "d2",
                "title": "Runbook",
                "content": "Restart the worker.",
                "tags": ["ops", "oncall"]
            })))
            .mount(&server)
            .await;

        let tool = tool(&server);
        let listed = tool.execute(json!({"action": "list"})).await.unwrap().joined_text();
        assert_eq!(listed, "2 document(s):\n- Onboarding (d1)\n- Runbook (d2)");

        let got = tool
            .execute(json!({"action": "get", "id": "d2"}))
            .await
            .unwrap()
            .joined_text();
        assert!(got.starts_with("# Runbook\nid: d2\ntags: ops, oncall\n"));
        assert!(got.contains("Restart the worker."));
    }

    #[tokio::test]
    async fn test_create_defaults_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents"))
            .and(body_json(json!({"title": "Notes", "content": ""})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "d9", "title": "Notes"})))
            .expect(1)
            .mount(&server)
            .await;

        let text = tool(&server)
            .execute(json!({"action": "create", "title": "Notes"}))
            .await
            .unwrap()
            .joined_text();
        assert_eq!(text, "Created document d9");
    }

    #[tokio::test]
    async fn test_missing_document_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/documents/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
            .mount(&server)
            .await;

        let err = tool(&server)
            .execute(json!({"action": "delete", "id": "gone"}))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<GatewayError>(), Some(GatewayError::Directory(_))));
    }
}
