//! Newline-delimited JSON-RPC over a child process's stdio.
//!
//! Any number of requests may be in flight. A reader task owns stdout and
//! hands each response to the request waiting on its id.

use super::RpcChannel;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use junction_core::error::{GatewayError, GatewayResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Grace period between closing stdin and killing the process
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const STDOUT_CLOSED: &str = "server stdout closed (process may have exited)";

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Requests awaiting a response, by id; `None` once stdout is gone
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<GatewayResult<Value>>>>>>;

/// Channel to a downstream server running as a child process.
pub struct StdioChannel {
    server: String,
    next_id: AtomicU64,
    writer: Mutex<Option<BoxedWriter>>,
    pending: Pending,
    reader: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
}

impl StdioChannel {
    /// Spawn `command` with piped stdio; stderr is forwarded to the log.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&str>,
    ) -> GatewayResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::transport(server, format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::transport(server, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::transport(server, "failed to capture stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, stderr = %line, "downstream stderr");
                }
            });
        }

        debug!(server = %server, command = %command, pid = ?child.id(), "spawned downstream server");

        let mut channel = Self::from_io(server, Box::new(stdin), Box::new(stdout));
        channel.child = Mutex::new(Some(child));
        Ok(channel)
    }

    /// Channel over arbitrary byte streams, without a process to manage.
    ///
    /// Must be called inside a Tokio runtime; the reader task starts here.
    pub fn from_io(server: &str, writer: BoxedWriter, reader: BoxedReader) -> Self {
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(read_responses(
            server.to_string(),
            BufReader::new(reader),
            pending.clone(),
        ));

        Self {
            server: server.to_string(),
            next_id: AtomicU64::new(1),
            writer: Mutex::new(Some(writer)),
            pending,
            reader: Mutex::new(Some(reader)),
            child: Mutex::new(None),
        }
    }

    fn error(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::transport(self.server.as_str(), reason)
    }

    async fn write_line(&self, message: &JsonRpcRequest) -> GatewayResult<()> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.error(format!("failed to serialize message: {e}")))?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.error("channel is closed"))?;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.error(format!("failed to flush stdin: {e}")))
    }
}

/// Route each response on stdout to its waiting request until EOF
async fn read_responses(server: String, reader: BufReader<BoxedReader>, pending: Pending) {
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(server = %server, "downstream stdout closed");
                break;
            }
            Err(e) => {
                warn!(server = %server, error = %e, "failed to read from stdout");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Anything else on stdout (logs, server-initiated messages,
        // stale responses) is skipped
        let response = match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(response) => response,
            Err(_) => {
                debug!(server = %server, "skipping non-response line on stdout");
                continue;
            }
        };

        let waiter = match response.id.as_u64() {
            Some(id) => pending.lock().await.as_mut().and_then(|map| map.remove(&id)),
            None => None,
        };
        match waiter {
            Some(tx) => {
                // The caller may have given up already
                let _ = tx.send(response.into_result());
            }
            None => debug!(server = %server, id = %response.id, "skipping response nobody is waiting for"),
        }
    }

    // Dropping the senders fails every request still waiting
    pending.lock().await.take();
}

#[async_trait::async_trait]
impl RpcChannel for StdioChannel {
    async fn request(&self, method: &str, params: Option<Value>) -> GatewayResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.pending
            .lock()
            .await
            .as_mut()
            .ok_or_else(|| self.error(STDOUT_CLOSED))?
            .insert(id, tx);

        if let Err(e) = self.write_line(&JsonRpcRequest::new(id, method, params)).await {
            if let Some(map) = self.pending.lock().await.as_mut() {
                map.remove(&id);
            }
            return Err(e);
        }

        rx.await.map_err(|_| self.error(STDOUT_CLOSED))?
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        self.write_line(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn close(&self) -> GatewayResult<()> {
        // Closing stdin asks the server to exit
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(server = %self.server, error = %e, "failed to shut down stdin");
            }
        }

        let waited = match self.child.lock().await.take() {
            None => Ok(()),
            Some(mut child) => match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.server, %status, "downstream process exited");
                    Ok(())
                }
                Ok(Err(e)) => Err(self.error(format!("failed to wait for process: {e}"))),
                Err(_) => {
                    warn!(server = %self.server, "downstream process did not exit, killing it");
                    child
                        .kill()
                        .await
                        .map_err(|e| self.error(format!("failed to kill process: {e}")))
                }
            },
        };

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.pending.lock().await.take();

        waited
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}
