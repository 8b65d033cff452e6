//! MCP transport layer
//!
//! Newline-delimited JSON-RPC 2.0 over a child process's stdin/stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsStr;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// How long a peer gets to exit on its own after stdin is closed
const CLOSE_GRACE: Duration = Duration::from_secs(2);
/// How long a peer gets to exit after SIGTERM before it is killed
const TERM_GRACE: Duration = Duration::from_secs(3);

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// The message, followed by `data` when the peer sent any
    pub fn detail(&self) -> String {
        match &self.data {
            Some(Value::String(data)) => format!("{} ({})", self.message, data),
            Some(Value::Null) | None => self.message.clone(),
            Some(data) => format!("{} ({})", self.message, data),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.detail())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer closed the connection")]
    Closed,

    #[error("peer I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode JSON-RPC message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response carrying the same id
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, method: &str, params: Option<Value>)
        -> Result<(), TransportError>;

    /// False once the peer has gone away or the channel was closed
    fn is_connected(&self) -> bool;

    /// Close the channel and stop the peer
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Stdio transport for a peer running as a child process.
///
/// Reading and writing happen on background tasks that own the pipes, so a
/// caller that gives up on a request (timeout, dropped future) never leaves a
/// half-written or half-read line behind.
pub struct StdioTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Value>>,
    child: Mutex<Child>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Wrap a running process whose stdin/stdout are piped
    pub fn new(mut child: Child) -> io::Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdin of peer"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdout of peer"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "mcp_relay::peer", "{}", line);
                }
            });
        }

        let connected = Arc::new(AtomicBool::new(true));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(stdin, out_rx, connected.clone()));
        tokio::spawn(read_lines(stdout, in_tx, connected.clone()));

        Ok(Self {
            outgoing: Mutex::new(Some(out_tx)),
            incoming: Mutex::new(in_rx),
            child: Mutex::new(child),
            connected,
        })
    }

    /// Spawn `program args...` and wrap it
    pub async fn spawn<I, S>(program: &str, args: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        debug!(program, pid = ?child.id(), "Spawned peer process");
        Self::new(child)
    }

    fn mark_closed(&self) -> TransportError {
        self.connected.store(false, Ordering::SeqCst);
        TransportError::Closed
    }

    async fn read_message(&self) -> Result<Value, TransportError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or_else(|| self.mark_closed())
    }

    async fn write_message(&self, value: &Value) -> Result<(), TransportError> {
        let mut json = serde_json::to_vec(value)?;
        json.push(b'\n');

        let outgoing = self.outgoing.lock().await;
        let sender = outgoing.as_ref().ok_or(TransportError::Closed)?;
        sender.send(json).map_err(|_| self.mark_closed())
    }
}

/// Owns the peer's stdin; each queued line is written whole or not at all
async fn write_lines(
    mut stdin: ChildStdin,
    mut lines: mpsc::UnboundedReceiver<Vec<u8>>,
    connected: Arc<AtomicBool>,
) {
    while let Some(line) = lines.recv().await {
        let written = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            if e.kind() != io::ErrorKind::BrokenPipe {
                warn!(error = %e, "Failed to write to peer");
            }
            connected.store(false, Ordering::SeqCst);
            return;
        }
    }
    // Sender dropped: stdin closes here, which tells the peer to stop
}

/// Owns the peer's stdout; forwards every JSON line and skips anything else
async fn read_lines(
    stdout: ChildStdout,
    messages: mpsc::UnboundedSender<Value>,
    connected: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str(trimmed) {
                    Ok(value) => {
                        if messages.send(value).is_err() {
                            break;
                        }
                    }
                    Err(_) => trace!(line = trimmed, "Skipping non-JSON line from peer"),
                }
            }
            Ok(None) => {
                debug!("Peer closed its stdout");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from peer");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let request_id = request.id;
        self.write_message(&serde_json::to_value(&request)?).await?;

        loop {
            let value = self.read_message().await?;

            // Notifications and server-initiated requests carry a method
            if value.get("method").is_some() || value.get("id").is_none() {
                trace!(message = %value, "Skipping peer notification");
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_value(value) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed JSON-RPC response");
                    continue;
                }
            };

            if response.id == Some(request_id) {
                return Ok(response);
            }
            debug!(expected = request_id, got = ?response.id, "Skipping response for another request");
        }
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        self.write_message(&notification).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        // Dropping the sender ends the writer task, which closes stdin
        drop(self.outgoing.lock().await.take());

        let mut child = self.child.lock().await;
        if let Ok(status) = timeout(CLOSE_GRACE, child.wait()).await {
            let status = status?;
            debug!(?status, "Peer exited after stdin closed");
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if let Ok(status) = timeout(TERM_GRACE, child.wait()).await {
                let status = status?;
                debug!(?status, "Peer exited after SIGTERM");
                return Ok(());
            }
        }

        warn!("Peer did not exit, killing it");
        child.kill().await?;
        Ok(())
    }
}
