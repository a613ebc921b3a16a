// Knowledge base search

use crate::protocol::CallToolResult;
use crate::tools::{json_schema_integer, json_schema_object, Tool};
use anyhow::{Context, Result};
use junction_core::types::ToolDefinition;
use junction_core::GatewayError;
use junction_sdk::api::{KnowledgeQuery, KnowledgeResult};
use junction_sdk::DirectoryClient;
use serde::Deserialize;

const DEFAULT_LIMIT: u32 = 5;

/// `search_knowledge`
pub struct SearchKnowledgeTool {
    client: DirectoryClient,
}

impl SearchKnowledgeTool {
    pub fn new(client: DirectoryClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct SearchKnowledgeArgs {
    query: String,
    #[serde(default)]
    limit: Option<u32>,
}

#[async_trait::async_trait]
impl Tool for SearchKnowledgeTool {
    fn schema(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_knowledge".to_string(),
            description: "Search the shared knowledge base for relevant notes and documentation".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "query": {
                        "type": "string",
                        "minLength": 1,
                        "description": "What to search for"
                    },
                    "limit": json_schema_integer("Maximum number of results (default: 5)", 1, 50)
                }),
                vec!["query"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: SearchKnowledgeArgs = serde_json::from_value(arguments)
            .context("Invalid arguments for search_knowledge")?;

        let results = self
            .client
            .knowledge()
            .query(&KnowledgeQuery {
                query: args.query.clone(),
                limit: Some(args.limit.unwrap_or(DEFAULT_LIMIT)),
            })
            .await
            .map_err(GatewayError::from)?;

        Ok(CallToolResult::text(render_results(&args.query, &results)))
    }
}

fn render_results(query: &str, results: &[KnowledgeResult]) -> String {
    if results.is_empty() {
        return format!("No results for \"{query}\".");
    }

    let mut out = format!("Found {} result(s) for \"{query}\":\n", results.len());
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, result.title));
        match (&result.source, result.score) {
            (Some(source), Some(score)) => out.push_str(&format!(" [{source}, score {score:.2}]")),
            (Some(source), None) => out.push_str(&format!(" [{source}]")),
            (None, Some(score)) => out.push_str(&format!(" [score {score:.2}]")),
            (None, None) => {}
        }
        out.push('\n');
        out.push_str(&result.content);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, api_key: Option<&str>) -> DirectoryClient {
        DirectoryClient::builder()
            .base_url(format!("{}/api/", server.uri()))
            .maybe_api_key(api_key.map(str::to_string))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_formats_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/knowledge/query"))
            .and(body_json(json!({"query": "deploy", "limit": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"title": "Deploy runbook", "content": "Run make deploy", "source": "wiki", "score": 0.912},
                    {"title": "Rollback", "content": "Revert the tag"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tool = SearchKnowledgeTool::new(client(&server, Some("sk-test")));
        let text = tool.execute(json!({"query": "deploy"})).await.unwrap().joined_text();

        assert!(text.starts_with("Found 2 result(s) for \"deploy\""));
        assert!(text.contains("1. Deploy runbook [wiki, score 0.91]\nRun make deploy"));
        assert!(text.contains("2. Rollback\nRevert the tag"));
    }

    #[tokio::test]
    async fn test_no_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let tool = SearchKnowledgeTool::new(client(&server, Some("sk-test")));
        let text = tool
            .execute(json!({"query": "nothing", "limit": 1}))
            .await
            .unwrap()
            .joined_text();
        assert_eq!(text, "No results for \"nothing\".");
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let server = MockServer::start().await;
        let tool = SearchKnowledgeTool::new(client(&server, None));

        let err = tool.execute(json!({"query": "deploy"})).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<GatewayError>(), Some(GatewayError::Config(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
