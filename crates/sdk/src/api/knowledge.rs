//! Knowledge base search.

use crate::client::DirectoryClient;
use crate::error::DirectoryResult;
use serde::{Deserialize, Serialize};

/// Knowledge API for searching the operator's knowledge base.
pub struct KnowledgeApi<'a> {
    client: &'a DirectoryClient,
}

impl<'a> KnowledgeApi<'a> {
    pub(crate) fn new(client: &'a DirectoryClient) -> Self {
        Self { client }
    }

    /// Run a search query.
    pub async fn query(&self, request: &KnowledgeQuery) -> DirectoryResult<Vec<KnowledgeResult>> {
        let response: KnowledgeQueryResponse =
            self.client.http.post(&["knowledge", "query"], request).await?;
        Ok(response.results)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeResult {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeQueryResponse {
    #[serde(default)]
    results: Vec<KnowledgeResult>,
}
