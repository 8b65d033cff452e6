//! Error taxonomy for mcp-relay.
//!
//! Startup failures (`ConnectionError`) keep the process from serving at all.
//! Everything else is scoped to a single query and surfaces as a `QueryError`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The peer process could not be reached or refused the handshake.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The script extension does not map to a known interpreter.
    /// Raised before anything is spawned.
    #[error("unsupported peer script {path}: expected a .py or .js file")]
    UnsupportedScript { path: PathBuf },

    #[error("failed to spawn peer `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("peer handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The peer's manifest or protocol usage does not match what we expect.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("peer session is not connected")]
    NotConnected,

    #[error("peer `{0}` does not offer tools")]
    ToolsNotSupported(String),

    #[error("peer advertised tool `{0}` more than once")]
    DuplicateTool(String),

    #[error("tool result `{0}` has no matching tool call in the preceding assistant message")]
    UnpairedToolResult(String),

    #[error("tool call `{0}` was never answered with a tool result")]
    UnansweredToolCall(String),
}

/// A tool invocation failed at the channel level or was rejected by the peer.
#[derive(Debug, Clone, Error)]
pub enum ToolInvocationError {
    /// The peer answered with a JSON-RPC error. The session is still usable.
    #[error("peer rejected `{tool}` ({code}): {message}")]
    Peer {
        tool: String,
        code: i64,
        message: String,
    },

    #[error("peer channel closed while calling `{tool}`")]
    ChannelClosed { tool: String },

    #[error("tool `{tool}` timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ToolInvocationError {
    /// Whether the failure leaves the session unusable for the current query.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, ToolInvocationError::Peer { .. })
    }
}

/// The language-model service could not produce a usable response.
#[derive(Debug, Clone, Error)]
pub enum ModelCallError {
    #[error("network error: {0}")]
    Network(String),

    #[error("model request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by model service")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("API request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model gateway not configured: {0}")]
    NotConfigured(String),
}

/// Transcript persistence failed. Recoverable: the loop logs and continues.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transcript I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transcript serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a single query was aborted.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("model referenced unknown tool `{0}`")]
    UnknownTool(String),

    #[error("tool invocation failed: {0}")]
    ToolInvocation(#[from] ToolInvocationError),

    #[error("model call failed: {0}")]
    ModelCall(#[from] ModelCallError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("query exceeded the maximum of {0} model turns")]
    MaxTurnsExceeded(usize),
}
