// Client-facing server loop (newline-delimited JSON-RPC over stdio)

use crate::dispatcher::RequestDispatcher;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use junction_core::session::SessionManager;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest accepted request line
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

pub struct McpServer {
    dispatcher: Arc<RequestDispatcher>,
    sessions: Arc<SessionManager>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<RequestDispatcher>, sessions: Arc<SessionManager>) -> Self {
        Self {
            dispatcher,
            sessions,
        }
    }

    /// Serve on the process's stdin and stdout
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout(), shutdown).await
    }

    /// Serve until the input ends or `shutdown` fires.
    ///
    /// Every request runs on its own task; responses are written in
    /// completion order. On the way out, in-flight requests finish (or are
    /// aborted on shutdown) and every downstream session is closed before
    /// the output is released.
    pub async fn serve<R, W>(&self, reader: R, writer: W, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("MCP server started");

        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_responses(writer, rx));
        let mut in_flight = JoinSet::new();
        let mut interrupted = false;

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => {
                    interrupted = true;
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                    continue;
                }
                line = lines.next() => line,
            };

            match line {
                None => {
                    debug!("input closed");
                    break;
                }
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_message(&line) {
                        Ok(request) => {
                            let dispatcher = self.dispatcher.clone();
                            let tx = tx.clone();
                            in_flight.spawn(async move {
                                if let Some(response) = dispatcher.handle(request).await {
                                    // The writer is gone only when the client is
                                    let _ = tx.send(response);
                                }
                            });
                        }
                        Err(response) => {
                            let _ = tx.send(response);
                        }
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(limit = MAX_LINE_LENGTH, "request line too long, discarded");
                    let _ = tx.send(JsonRpcResponse::error(Value::Null, JsonRpcError::invalid_request()));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!(error = %e, "failed to read input");
                    break;
                }
            }
        }

        if interrupted {
            info!(in_flight = in_flight.len(), "shutdown requested");
            in_flight.abort_all();
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        self.sessions.cleanup_all().await;

        drop(tx);
        writer.await.context("response writer panicked")??;

        info!("MCP server stopped");
        Ok(())
    }
}

/// A request, or the error response owed for an unusable line
fn parse_message(line: &str) -> std::result::Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        debug!(error = %e, "unparseable request line");
        JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error())
    })?;

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        debug!(error = %e, "malformed request");
        JsonRpcResponse::error(id, JsonRpcError::invalid_request())
    })
}

async fn write_responses<W>(writer: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());

    while let Some(response) = rx.recv().await {
        let line = match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                continue;
            }
        };
        sink.send(line).await.context("failed to write response")?;
    }

    SinkExt::<String>::close(&mut sink)
        .await
        .context("failed to close output")?;
    Ok(())
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!(error = %e, "request handler panicked"),
        Err(_) => debug!("request handler aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{INVALID_REQUEST, PARSE_ERROR};
    use crate::tools::static_tools;
    use junction_core::testing::{descriptor, FakeDirectory, FakeServer, FakeTransportFactory};
    use junction_core::{AggregatorConfig, CapabilityAggregator};
    use junction_sdk::DirectoryClient;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    fn server(factory: Arc<FakeTransportFactory>) -> McpServer {
        let sessions = Arc::new(SessionManager::with_connect_timeout(
            factory,
            Duration::from_secs(1),
        ));
        let aggregator = Arc::new(CapabilityAggregator::new(
            Arc::new(FakeDirectory::new(vec![descriptor("s1", "GitHub", &["create_issue"])])),
            sessions.clone(),
            AggregatorConfig::default(),
        ));
        let client = DirectoryClient::builder()
            .base_url("http://127.0.0.1:9/api/")
            .build()
            .unwrap();
        let tools = Arc::new(static_tools(aggregator.clone(), client));
        let dispatcher = Arc::new(RequestDispatcher::new(
            aggregator,
            sessions.clone(),
            tools,
            Duration::from_secs(5),
        ));
        McpServer::new(dispatcher, sessions)
    }

    fn responses(output: &str) -> Vec<JsonRpcResponse> {
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serves_until_eof_then_closes_sessions() {
        let factory = Arc::new(FakeTransportFactory::new());
        factory.add_server("s1", FakeServer::with_tools(&["create_issue"]));
        let server = server(factory.clone());

        let (mut input, server_in) = duplex(64 * 1024);
        let (server_out, mut output) = duplex(64 * 1024);

        let requests = [
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}).to_string(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
            "this is not json".to_string(),
            String::new(),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "GitHub_create_issue"}})
                .to_string(),
            json!({"jsonrpc": "2.0", "id": 4}).to_string(),
        ];
        input
            .write_all(format!("{}\n", requests.join("\n")).as_bytes())
            .await
            .unwrap();
        drop(input);

        server
            .serve(server_in, server_out, CancellationToken::new())
            .await
            .unwrap();

        let mut raw = String::new();
        output.read_to_string(&mut raw).await.unwrap();
        let mut responses = responses(&raw);
        responses.sort_by_key(|r| r.id.as_i64().unwrap_or(0));

        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0].id, Value::Null);
        assert_eq!(responses[0].error.as_ref().unwrap().code, PARSE_ERROR);
        assert_eq!(responses[1].id, json!(1));
        assert!(responses[1].result.is_some());
        assert_eq!(responses[2].result.as_ref().unwrap()["content"][0]["text"], "s1 ran create_issue");
        assert_eq!(responses[3].error.as_ref().unwrap().code, INVALID_REQUEST);

        assert_eq!(factory.opens(), 1);
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn test_slow_request_does_not_block_others() {
        let factory = Arc::new(FakeTransportFactory::new());
        factory.add_server(
            "s1",
            FakeServer {
                call_delay: Some(Duration::from_millis(500)),
                ..FakeServer::with_tools(&["create_issue"])
            },
        );
        let server = server(factory);

        let (mut input, server_in) = duplex(64 * 1024);
        let (server_out, output) = duplex(64 * 1024);
        let serving = tokio::spawn(async move {
            server
                .serve(server_in, server_out, CancellationToken::new())
                .await
        });

        let slow = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "GitHub_create_issue"}});
        let ping = json!({"jsonrpc": "2.0", "id": 2, "method": "ping"});
        input
            .write_all(format!("{slow}\n{ping}\n").as_bytes())
            .await
            .unwrap();

        let mut output = BufReader::new(output);
        let mut first = String::new();
        output.read_line(&mut first).await.unwrap();
        let first: JsonRpcResponse = serde_json::from_str(&first).unwrap();
        assert_eq!(first.id, json!(2));

        drop(input);
        serving.await.unwrap().unwrap();

        let mut rest = String::new();
        output.read_to_string(&mut rest).await.unwrap();
        assert_eq!(responses(&rest)[0].id, json!(1));
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving_with_input_open() {
        let factory = Arc::new(FakeTransportFactory::new());
        let server = server(factory);

        let (_input, server_in) = duplex(1024);
        let (server_out, _output) = duplex(1024);
        let shutdown = CancellationToken::new();

        let serving = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve(server_in, server_out, shutdown).await })
        };
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_parse_message_keeps_id_of_invalid_request() {
        let response = parse_message(r#"{"jsonrpc": "2.0", "id": "abc", "params": []}"#).unwrap_err();
        assert_eq!(response.id, json!("abc"));
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }
}
