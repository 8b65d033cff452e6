//! Agent state management

use relay_core::config::{AgentSettings, ModelConfig};
use relay_core::{Conversation, Message};

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum model calls per query
    pub max_turns: usize,
    /// Token budget passed to every model call
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: AgentSettings::default().max_turns,
            max_tokens: ModelConfig::default().max_tokens,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(agent: &AgentSettings, model: &ModelConfig) -> Self {
        Self {
            max_turns: agent.max_turns,
            max_tokens: model.max_tokens,
        }
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }
}

/// State of one query while the loop runs
#[derive(Debug)]
pub struct AgentState {
    pub conversation: Conversation,
    /// Model calls made so far
    pub model_calls: usize,
    /// Tool calls dispatched so far
    pub tool_dispatches: usize,
}

impl AgentState {
    /// Fresh state seeded with the user's query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            conversation: Conversation::seeded(query),
            model_calls: 0,
            tool_dispatches: 0,
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.conversation.into_messages()
    }
}
