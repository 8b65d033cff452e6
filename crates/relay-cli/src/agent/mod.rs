//! Agent framework for tool-using queries
//!
//! Alternates model calls and peer tool calls until the model answers in text.

mod agent_loop;
mod state;

pub use agent_loop::AgentLoop;
pub use state::AgentConfig;
