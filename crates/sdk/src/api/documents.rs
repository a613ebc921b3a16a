//! Operator-managed documents.

use crate::client::DirectoryClient;
use crate::error::DirectoryResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Documents API.
pub struct DocumentsApi<'a> {
    client: &'a DirectoryClient,
}

impl<'a> DocumentsApi<'a> {
    pub(crate) fn new(client: &'a DirectoryClient) -> Self {
        Self { client }
    }

    /// List all documents.
    pub async fn list(&self) -> DirectoryResult<Vec<Document>> {
        let response: ListDocumentsResponse = self.client.http.get(&["documents"]).await?;
        Ok(response.into_items())
    }

    /// Get a document by ID.
    pub async fn get(&self, id: &str) -> DirectoryResult<Document> {
        self.client.http.get(&["documents", id]).await
    }

    /// Create a document.
    pub async fn create(&self, document: &NewDocument) -> DirectoryResult<Document> {
        self.client.http.post(&["documents"], document).await
    }

    /// Update a document.
    pub async fn update(&self, id: &str, update: &DocumentUpdate) -> DirectoryResult<Document> {
        self.client.http.put(&["documents", id], update).await
    }

    /// Delete a document.
    pub async fn delete(&self, id: &str) -> DirectoryResult<()> {
        self.client.http.delete_no_response(&["documents", id]).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Omitted by the directory in list responses
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListDocumentsResponse {
    Bare(Vec<Document>),
    Wrapped { documents: Vec<Document> },
}

impl ListDocumentsResponse {
    fn into_items(self) -> Vec<Document> {
        match self {
            Self::Bare(items) | Self::Wrapped { documents: items } => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryError;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DirectoryClient {
        DirectoryClient::builder()
            .base_url(server.uri())
            .api_key("sk-test")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_without_content() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "d1", "title": "Runbook", "tags": ["ops"]}
            ])))
            .mount(&server)
            .await;

        let documents = client(&server).documents().list().await.unwrap();
        assert_eq!(documents[0].title, "Runbook");
        assert!(documents[0].content.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/documents"))
            .and(body_json(json!({"title": "Runbook", "content": "Step 1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "d1", "title": "Runbook", "content": "Step 1"
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/documents/d1"))
            .and(body_json(json!({"content": "Step 1\nStep 2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "d1", "title": "Runbook", "content": "Step 1\nStep 2"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let created = client
            .documents()
            .create(&NewDocument {
                title: "Runbook".to_string(),
                content: "Step 1".to_string(),
                tags: Vec::new(),
            })
            .await
            .unwrap();

        let updated = client
            .documents()
            .update(
                &created.id,
                &DocumentUpdate {
                    content: Some("Step 1\nStep 2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.content.ends_with("Step 2"));
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/documents/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "document not found"})))
            .mount(&server)
            .await;

        let result = client(&server).documents().get("nope").await;
        assert!(matches!(result, Err(DirectoryError::NotFound(m)) if m == "document not found"));
    }
}
