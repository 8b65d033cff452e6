//! Scripted fakes for the model and the peer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use relay_core::{
    Message, ModelCallError, ModelGateway, ModelResponse, ToolDescriptor, ToolInvocationError,
};
use serde_json::{json, Map, Value};

use crate::dispatch::{ToolOutcome, ToolPeer};

pub fn descriptor(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: format!("{name} tool"),
        parameter_schema: json!({"type": "object"}),
    }
}

/// Peer that replays queued outcomes and records every call
pub struct ScriptedPeer {
    tools: Vec<ToolDescriptor>,
    responses: Mutex<VecDeque<Result<ToolOutcome, ToolInvocationError>>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    connected: AtomicBool,
}

impl ScriptedPeer {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            tools: names.into_iter().map(descriptor).collect(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Behave like a peer whose process has exited
    pub fn disconnected(self) -> Self {
        self.connected.store(false, Ordering::SeqCst);
        self
    }

    pub fn respond(self, outcome: Result<ToolOutcome, ToolInvocationError>) -> Self {
        self.responses.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolPeer for ScriptedPeer {
    fn manifest(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn invoke_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ToolOutcome::ok("ok")))
    }
}

/// Gateway that replays queued responses and records each request's history
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<Result<ModelResponse, ModelCallError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<ModelResponse, ModelCallError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn final_text(self, text: &str) -> Self {
        self.respond(Ok(ModelResponse::FinalText(text.to_string())))
    }

    /// Histories the loop sent, one per model call
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
        _max_tokens: u32,
    ) -> Result<ModelResponse, ModelCallError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ModelCallError::MalformedResponse(
                    "scripted gateway has no more responses".into(),
                ))
            })
    }
}
