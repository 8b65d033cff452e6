//! Tool dispatch
//!
//! Maps a model-issued tool call onto the peer and folds the outcome into a
//! `tool_result` block. Peer-side failures become error results the model can
//! read; a dead channel aborts the query.

use async_trait::async_trait;
use relay_core::{ContentBlock, QueryError, ToolDescriptor, ToolInvocationError};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

/// What a peer returned for one tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Anything that advertises tools and can run them
#[async_trait]
pub trait ToolPeer: Send + Sync {
    /// Tools advertised at connect time
    fn manifest(&self) -> &[ToolDescriptor];

    /// Whether the peer can still be reached
    fn is_connected(&self) -> bool;

    async fn invoke_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolOutcome, ToolInvocationError>;
}

/// Dispatcher for model-issued tool calls
pub struct ToolDispatcher<'a, P: ?Sized> {
    peer: &'a P,
}

impl<'a, P: ToolPeer + ?Sized> ToolDispatcher<'a, P> {
    pub fn new(peer: &'a P) -> Self {
        Self { peer }
    }

    /// Run one tool call and wrap the outcome as a `tool_result` block
    #[instrument(skip(self, args), fields(tool = %name, id = %id))]
    pub async fn dispatch(
        &self,
        id: &str,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<ContentBlock, QueryError> {
        if !self.peer.manifest().iter().any(|tool| tool.name == name) {
            warn!("Model requested a tool the peer does not advertise");
            return Err(QueryError::UnknownTool(name.to_string()));
        }

        match self.peer.invoke_tool(name, args).await {
            Ok(outcome) => {
                info!(
                    is_error = outcome.is_error,
                    output_len = outcome.content.len(),
                    "Tool finished"
                );
                Ok(ContentBlock::ToolResult {
                    tool_call_id: id.to_string(),
                    content: outcome.content,
                    is_error: outcome.is_error,
                })
            }
            Err(e) if e.is_session_fatal() => {
                warn!(error = %e, "Tool invocation failed, aborting query");
                Err(e.into())
            }
            Err(e) => {
                warn!(error = %e, "Tool invocation rejected by peer");
                Ok(ContentBlock::tool_error(id, format!("Error: {e}")))
            }
        }
    }
}
