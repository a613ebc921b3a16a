//! JSON-RPC over HTTP POST (streamable HTTP transport).
//!
//! Each message is POSTed to the server URL. Replies arrive either as a
//! plain JSON body or as a `text/event-stream` whose events carry the
//! JSON-RPC response. The `Mcp-Session-Id` handed out at initialization is
//! echoed on every later request.

use super::RpcChannel;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use junction_core::error::{GatewayError, GatewayResult};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpChannel {
    server: String,
    client: Client,
    url: Url,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl HttpChannel {
    pub fn new(
        server: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| GatewayError::transport(server, format!("invalid URL '{url}': {e}")))?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GatewayError::transport(server, format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::transport(server, format!("invalid value for header '{name}': {e}")))?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| GatewayError::transport(server, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            server: server.to_string(),
            client,
            url,
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn error(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::transport(self.server.as_str(), reason)
    }

    async fn post(&self, message: &JsonRpcRequest) -> GatewayResult<reqwest::Response> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }

        debug!(server = %self.server, method = %message.method, "POST");
        let response = request
            .send()
            .await
            .map_err(|e| self.error(format!("request failed: {e}")))?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(session_id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl RpcChannel for HttpChannel {
    async fn request(&self, method: &str, params: Option<Value>) -> GatewayResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .post(&JsonRpcRequest::new(id, method, params))
            .await?;

        let is_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response
            .text()
            .await
            .map_err(|e| self.error(format!("failed to read response body: {e}")))?;

        let reply = if is_stream {
            find_in_event_stream(&body, &Value::from(id))
                .ok_or_else(|| self.error(format!("no response for request {id} in event stream")))?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body)
                .map_err(|e| self.error(format!("malformed response: {e}")))?
        };

        reply.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        self.post(&JsonRpcRequest::notification(method, params))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> GatewayResult<()> {
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };

        // Ending the session is a courtesy; servers may not support it
        match self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, session_id)
            .send()
            .await
        {
            Ok(response) => debug!(server = %self.server, status = %response.status(), "session ended"),
            Err(e) => debug!(server = %self.server, error = %e, "failed to end session"),
        }
        Ok(())
    }
}

/// First JSON-RPC response with `id` among the stream's `data:` payloads
fn find_in_event_stream(body: &str, id: &Value) -> Option<JsonRpcResponse> {
    let normalized = body.replace("\r\n", "\n");
    normalized.split("\n\n").find_map(|event| {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if data.is_empty() {
            return None;
        }

        serde_json::from_str::<JsonRpcResponse>(&data.join("\n"))
            .ok()
            .filter(|response| &response.id == id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(server: &MockServer) -> HttpChannel {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer downstream-token".to_string());
        HttpChannel::new("s2", &format!("{}/mcp", server.uri()), &headers, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_json_response_and_session_header() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header("Authorization", "Bearer downstream-token"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Mcp-Session-Id", "sess-42")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}})),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header("Mcp-Session-Id", "sess-42"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": []}})),
            )
            .mount(&server)
            .await;

        let channel = channel(&server);
        assert_eq!(channel.request("initialize", None).await.unwrap(), json!({"ok": true}));
        assert_eq!(channel.session_id().as_deref(), Some("sess-42"));
        assert_eq!(
            channel.request("tools/list", None).await.unwrap(),
            json!({"tools": []})
        );
    }

    #[tokio::test]
    async fn test_event_stream_response() {
        let server = MockServer::start().await;

        let body = format!(
            "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
            json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}}),
            json!({"jsonrpc": "2.0", "id": 1, "result": {"content": [{"type": "text", "text": "done"}]}}),
        );
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let result = channel(&server)
            .request("tools/call", Some(json!({"name": "search"})))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "done");
    }

    #[tokio::test]
    async fn test_http_error_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = channel(&server).request("initialize", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { ref reason, .. } if reason.contains("401")));
    }

    #[tokio::test]
    async fn test_close_ends_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Mcp-Session-Id", "sess-7")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(header("Mcp-Session-Id", "sess-7"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let channel = channel(&server);
        channel.request("initialize", None).await.unwrap();
        channel.close().await.unwrap();
    }

    #[test]
    fn test_find_in_event_stream_handles_multiline_data() {
        let body = "data: {\"jsonrpc\": \"2.0\",\r\ndata:  \"id\": 3, \"result\": {}}\r\n\r\n";
        let response = find_in_event_stream(body, &json!(3)).unwrap();
        assert_eq!(response.result, Some(json!({})));
        assert!(find_in_event_stream(body, &json!(4)).is_none());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = HttpChannel::new("s2", "not a url", &BTreeMap::new(), Duration::from_secs(1));
        assert!(matches!(result, Err(GatewayError::Transport { .. })));
    }
}
