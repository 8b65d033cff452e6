//! MCP client implementation
//!
//! Only the slice of the protocol a tool-calling agent needs: the handshake,
//! tool listing and tool invocation.

use super::transport::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpTransport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// MCP protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Error)]
pub enum McpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{method}: {error}")]
    Rpc { method: String, error: JsonRpcError },

    #[error("{0}: response missing result")]
    MissingResult(String),

    #[error("{method}: unexpected result shape: {source}")]
    InvalidResult {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("MCP client not initialized")]
    NotInitialized,
}

/// Client capabilities; tool use needs none of the optional ones
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCapabilities {}

/// Client info for initialization
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server capabilities returned during initialization; only tools matter here
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
}

impl ServerCapabilities {
    pub fn supports_tools(&self) -> bool {
        self.tools.is_some()
    }
}

/// Server info returned during initialization
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Initialize result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// MCP Tool definition from server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Tool list result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<McpToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Tool call result content
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ToolResultContent {
    /// Text items verbatim; anything else as a short placeholder
    pub fn render(&self) -> String {
        match (self.content_type.as_str(), &self.text) {
            ("text", Some(text)) => text.clone(),
            ("text", None) => String::new(),
            (kind, _) => match &self.mime_type {
                Some(mime) => format!("[{kind} content: {mime}]"),
                None => format!("[{kind} content]"),
            },
        }
    }
}

/// Tool call result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ToolResultContent::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP Client
pub struct McpClient {
    transport: Box<dyn McpTransport>,
    /// Held for one request/response exchange at a time
    exchange: Mutex<()>,
    request_id: AtomicU64,
    initialized: bool,
}

impl McpClient {
    /// Create a new MCP client with the given transport
    pub fn new(transport: Box<dyn McpTransport>) -> Self {
        Self {
            transport,
            exchange: Mutex::new(()),
            request_id: AtomicU64::new(1),
            initialized: false,
        }
    }

    /// Initialized and the transport still reaches the peer
    pub fn is_connected(&self) -> bool {
        self.initialized && self.transport.is_connected()
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and decode its result
    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, McpError> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);

        let response: JsonRpcResponse = {
            let _exchange = self.exchange.lock().await;
            self.transport.send_request(request).await?
        };

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                method: method.to_string(),
                error,
            });
        }

        let result = response
            .result
            .ok_or_else(|| McpError::MissingResult(method.to_string()))?;
        serde_json::from_value(result).map_err(|source| McpError::InvalidResult {
            method: method.to_string(),
            source,
        })
    }

    /// Initialize the connection with the MCP server
    pub async fn initialize(&mut self) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": ClientCapabilities::default(),
            "clientInfo": ClientInfo::default()
        });

        let result: InitializeResult = self.request("initialize", Some(params)).await?;

        self.transport
            .send_notification("notifications/initialized", None)
            .await?;

        self.initialized = true;

        Ok(result)
    }

    /// List available tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result: ListToolsResult = self.request("tools/list", params).await?;

            tools.extend(result.tools);

            match result.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        self.request("tools/call", Some(params)).await
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<(), McpError> {
        self.initialized = false;
        self.transport.close().await?;
        Ok(())
    }
}
