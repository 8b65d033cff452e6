//! Conversation data model.
//!
//! The serde layout matches the Anthropic Messages wire format, so a
//! `Conversation` can be sent to the model and written to disk unchanged.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of structured message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolCallRequest {
        id: String,
        name: String,
        #[serde(rename = "input", default)]
        args: Map<String, Value>,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(rename = "tool_use_id")]
        tool_call_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        ContentBlock::ToolCallRequest {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn tool_error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Structured blocks, or an empty slice for plain-text content.
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }

    /// Tool-call ids issued in this message, in emission order.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks().iter().filter_map(|block| match block {
            ContentBlock::ToolCallRequest { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }
}

/// A tool advertised by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "input_schema")]
    pub parameter_schema: Value,
}

/// Ordered transcript for one query. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation seeded with one user message.
    pub fn seeded(query: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(query)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Check that every tool call is answered exactly once by the user
    /// messages that follow it, before the next assistant message.
    pub fn check_pairing(&self) -> Result<(), ProtocolError> {
        let mut pending: Vec<&str> = Vec::new();
        let mut open: HashSet<&str> = HashSet::new();

        for message in &self.messages {
            match message.role {
                Role::Assistant => {
                    if let Some(id) = pending.iter().find(|id| open.contains(**id)) {
                        return Err(ProtocolError::UnansweredToolCall(id.to_string()));
                    }
                    pending = message.tool_call_ids().collect();
                    open = pending.iter().copied().collect();
                }
                Role::User => {
                    for block in message.blocks() {
                        if let ContentBlock::ToolResult { tool_call_id, .. } = block {
                            if !open.remove(tool_call_id.as_str()) {
                                return Err(ProtocolError::UnpairedToolResult(
                                    tool_call_id.clone(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        match pending.iter().find(|id| open.contains(**id)) {
            Some(id) => Err(ProtocolError::UnansweredToolCall(id.to_string())),
            None => Ok(()),
        }
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
