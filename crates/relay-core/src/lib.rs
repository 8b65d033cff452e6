//! relay-core: Shared library for mcp-relay
//!
//! Provides:
//! - Conversation data model (messages, content blocks, tool descriptors)
//! - Error taxonomy shared by the peer session and the orchestration loop
//! - Configuration loading (relay.toml)
//! - Model gateway for the Anthropic Messages API

pub mod anthropic;
pub mod config;
pub mod error;
pub mod message;

pub use anthropic::{AnthropicGateway, ModelGateway, ModelResponse};
pub use config::Config;
pub use error::{
    ConnectionError, ModelCallError, PersistenceError, ProtocolError, QueryError,
    ToolInvocationError,
};
pub use message::{ContentBlock, Conversation, Message, MessageContent, Role, ToolDescriptor};
