//! Peer session
//!
//! Owns the connection to one tool-hosting peer: spawn, handshake, manifest
//! fetch, tool calls and shutdown. Maps MCP client errors onto the relay's
//! connection and invocation errors.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use relay_core::config::PeerConfig;
use relay_core::{ConnectionError, ProtocolError, ToolDescriptor, ToolInvocationError};
use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::client::{McpClient, McpError, McpToolInfo};
use super::transport::{McpTransport, StdioTransport, TransportError};
use crate::dispatch::{ToolOutcome, ToolPeer};

/// JSON-RPC "internal error", used when the peer's result cannot be decoded
const INTERNAL_ERROR: i64 = -32603;

/// Runtime a peer script is launched with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    Python,
    Node,
}

impl Interpreter {
    /// Pick the interpreter from the script's extension
    pub fn for_script(path: &Path) -> Result<Self, ConnectionError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Ok(Interpreter::Python),
            Some("js") => Ok(Interpreter::Node),
            _ => Err(ConnectionError::UnsupportedScript {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn command<'a>(&self, config: &'a PeerConfig) -> &'a str {
        match self {
            Interpreter::Python => &config.python,
            Interpreter::Node => &config.node,
        }
    }
}

/// A connected (or not yet connected) MCP peer
pub struct PeerSession {
    config: PeerConfig,
    client: Option<McpClient>,
    tools: Vec<ToolDescriptor>,
}

impl PeerSession {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            client: None,
            tools: Vec::new(),
        }
    }

    /// Spawn the peer script, handshake and fetch its manifest
    pub async fn connect(&mut self, script: &Path) -> Result<(), ConnectionError> {
        let interpreter = Interpreter::for_script(script)?;
        let command = interpreter.command(&self.config).to_string();

        info!(script = %script.display(), %command, "Starting peer");
        let transport = StdioTransport::spawn(&command, [script.as_os_str()])
            .await
            .map_err(|source| ConnectionError::Spawn { command, source })?;

        self.connect_with_transport(Box::new(transport)).await
    }

    /// Handshake over an already-open transport
    pub async fn connect_with_transport(
        &mut self,
        transport: Box<dyn McpTransport>,
    ) -> Result<(), ConnectionError> {
        if self.client.is_some() {
            warn!("Peer session already connected, replacing it");
            self.close().await;
        }

        let mut client = McpClient::new(transport);
        let handshake_timeout = self.config.handshake_timeout();

        let handshake = async {
            let init = client.initialize().await?;
            let tools = client.list_tools().await?;
            Ok::<_, McpError>((init, tools))
        };

        let outcome = match timeout(handshake_timeout, handshake).await {
            Ok(Ok((init, tools))) => {
                info!(
                    "Peer initialized: {} v{} (protocol {})",
                    init.server_info.name,
                    init.server_info.version.as_deref().unwrap_or("unknown"),
                    init.protocol_version
                );
                if init.capabilities.supports_tools() {
                    manifest_from(tools).map_err(ConnectionError::from)
                } else {
                    Err(ProtocolError::ToolsNotSupported(init.server_info.name).into())
                }
            }
            Ok(Err(e)) => {
                error!("Peer handshake failed: {}", e);
                Err(ConnectionError::Handshake(e.to_string()))
            }
            Err(_) => {
                error!("Peer handshake timed out after {:?}", handshake_timeout);
                Err(ConnectionError::HandshakeTimeout(handshake_timeout))
            }
        };

        match outcome {
            Ok(tools) => {
                info!(
                    tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "Connected to peer"
                );
                self.tools = tools;
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "Error closing peer after failed handshake");
                }
                Err(e)
            }
        }
    }

    /// Handshake done and the peer is still reachable
    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(McpClient::is_connected)
    }

    /// The manifest fetched at connect time
    pub fn list_tools(&self) -> Result<&[ToolDescriptor], ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        Ok(&self.tools)
    }

    /// Call a tool on the peer, bounded by the configured call timeout
    pub async fn invoke_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        let client = self.client.as_ref().ok_or(ProtocolError::NotConnected)?;
        let call_timeout = self.config.call_timeout();

        debug!(tool = name, "Calling peer tool");
        let result = match timeout(call_timeout, client.call_tool(name, Value::Object(args.clone())))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                return Err(ToolInvocationError::Timeout {
                    tool: name.to_string(),
                    timeout: call_timeout,
                })
            }
        };

        match result {
            Ok(result) if result.is_error => Ok(ToolOutcome::error(result.text())),
            Ok(result) => Ok(ToolOutcome::ok(result.text())),
            Err(e) => Err(invocation_error(name, e)),
        }
    }

    /// Close the channel and stop the peer. Safe to call more than once.
    pub async fn close(&mut self) {
        self.tools.clear();
        let Some(mut client) = self.client.take() else {
            return;
        };

        info!("Closing peer session");
        if let Err(e) = client.close().await {
            warn!(error = %e, "Error closing peer session");
        }
    }
}

#[async_trait]
impl ToolPeer for PeerSession {
    fn manifest(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    fn is_connected(&self) -> bool {
        PeerSession::is_connected(self)
    }

    async fn invoke_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        PeerSession::invoke_tool(self, name, args).await
    }
}

/// Convert the peer's tool list into descriptors, rejecting duplicate names
fn manifest_from(tools: Vec<McpToolInfo>) -> Result<Vec<ToolDescriptor>, ProtocolError> {
    let mut seen = HashSet::new();
    tools
        .into_iter()
        .map(|tool| {
            if !seen.insert(tool.name.clone()) {
                return Err(ProtocolError::DuplicateTool(tool.name));
            }
            Ok(ToolDescriptor {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                parameter_schema: tool.input_schema,
            })
        })
        .collect()
}

fn invocation_error(tool: &str, err: McpError) -> ToolInvocationError {
    let tool = tool.to_string();
    match err {
        McpError::Rpc { error, .. } => ToolInvocationError::Peer {
            tool,
            code: error.code,
            message: error.detail(),
        },
        McpError::Transport(TransportError::Closed) | McpError::Transport(TransportError::Io(_)) => {
            ToolInvocationError::ChannelClosed { tool }
        }
        McpError::Transport(TransportError::Encode(e)) => ToolInvocationError::Peer {
            tool,
            code: INTERNAL_ERROR,
            message: e.to_string(),
        },
        e @ (McpError::MissingResult(_) | McpError::InvalidResult { .. }) => {
            ToolInvocationError::Peer {
                tool,
                code: INTERNAL_ERROR,
                message: e.to_string(),
            }
        }
        McpError::NotInitialized => ProtocolError::NotConnected.into(),
    }
}
