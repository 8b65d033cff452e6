//! Agent loop implementation

use std::sync::Arc;

use relay_core::{ContentBlock, Message, ModelGateway, ModelResponse, QueryError};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{ToolDispatcher, ToolPeer};
use crate::transcript::{TranscriptFile, TranscriptLogger};

use super::state::{AgentConfig, AgentState};

/// Result of one model turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Tool results were appended; ask the model again
    Continue,
    /// The model answered with text
    Done(String),
}

/// The agent loop orchestrator
pub struct AgentLoop {
    gateway: Arc<dyn ModelGateway>,
    config: AgentConfig,
    transcripts: Option<TranscriptLogger>,
}

impl AgentLoop {
    pub fn new(gateway: Arc<dyn ModelGateway>, config: AgentConfig) -> Self {
        Self {
            gateway,
            config,
            transcripts: None,
        }
    }

    /// Persist every query's transcript under the logger's directory
    pub fn with_transcripts(mut self, logger: TranscriptLogger) -> Self {
        self.transcripts = Some(logger);
        self
    }

    /// Run one query to completion and return the full transcript
    #[instrument(skip_all, fields(max_turns = self.config.max_turns))]
    pub async fn run<P: ToolPeer + ?Sized>(
        &self,
        peer: &P,
        query: &str,
    ) -> Result<Vec<Message>, QueryError> {
        info!(query_len = query.len(), tools = peer.manifest().len(), "Starting query");

        let transcript = self.transcripts.as_ref().map(TranscriptLogger::start_query);
        let mut state = AgentState::new(query);
        persist(transcript.as_ref(), &state).await;

        loop {
            match self.turn(peer, &mut state, transcript.as_ref()).await {
                Ok(TurnOutcome::Continue) => continue,
                Ok(TurnOutcome::Done(text)) => {
                    info!(
                        model_calls = state.model_calls,
                        tool_calls = state.tool_dispatches,
                        answer_len = text.len(),
                        "Query completed"
                    );
                    return Ok(state.into_messages());
                }
                Err(e) => {
                    warn!(
                        model_calls = state.model_calls,
                        tool_calls = state.tool_dispatches,
                        error = %e,
                        "Query aborted"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One model call plus the tool calls it asked for
    async fn turn<P: ToolPeer + ?Sized>(
        &self,
        peer: &P,
        state: &mut AgentState,
        transcript: Option<&TranscriptFile>,
    ) -> Result<TurnOutcome, QueryError> {
        if state.model_calls >= self.config.max_turns {
            return Err(QueryError::MaxTurnsExceeded(self.config.max_turns));
        }
        if state.model_calls > 0 {
            state.conversation.check_pairing()?;
        }

        state.model_calls += 1;
        debug!(turn = state.model_calls, messages = state.messages().len(), "Calling model");
        let response = self
            .gateway
            .complete(state.messages(), peer.manifest(), self.config.max_tokens)
            .await?;

        let blocks = match response {
            ModelResponse::FinalText(text) => {
                state.add_message(Message::assistant(text.clone()));
                persist(transcript, state).await;
                return Ok(TurnOutcome::Done(text));
            }
            ModelResponse::ToolCalls(blocks) => blocks,
        };

        let calls = tool_calls(&blocks);
        debug!(turn = state.model_calls, tool_calls = calls.len(), "Model requested tools");
        state.add_message(Message::assistant_blocks(blocks));
        persist(transcript, state).await;

        let dispatcher = ToolDispatcher::new(peer);
        for (id, name, args) in calls {
            let result = dispatcher.dispatch(&id, &name, &args).await?;
            state.tool_dispatches += 1;
            state.add_message(Message::user_blocks(vec![result]));
            persist(transcript, state).await;
        }

        Ok(TurnOutcome::Continue)
    }
}

/// Tool calls in emission order
fn tool_calls(blocks: &[ContentBlock]) -> Vec<(String, String, Map<String, Value>)> {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolCallRequest { id, name, args } => {
                Some((id.clone(), name.clone(), args.clone()))
            }
            ContentBlock::Text { .. } | ContentBlock::ToolResult { .. } => None,
        })
        .collect()
}

/// Snapshot the conversation; failures are logged and never abort the query
async fn persist(transcript: Option<&TranscriptFile>, state: &AgentState) {
    if let Some(file) = transcript {
        if let Err(e) = file.record(state.messages()).await {
            warn!(path = %file.path().display(), error = %e, "Failed to save transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ToolOutcome;
    use crate::testing::{ScriptedGateway, ScriptedPeer};
    use crate::transcript;
    use relay_core::{ModelCallError, ProtocolError, ToolInvocationError};
    use serde_json::json;
    use tempfile::TempDir;

    fn args(a: i64, b: i64) -> Map<String, Value> {
        json!({"a": a, "b": b}).as_object().cloned().unwrap()
    }

    fn agent(gateway: &Arc<ScriptedGateway>) -> AgentLoop {
        AgentLoop::new(gateway.clone(), AgentConfig::default())
    }

    fn only_transcript(dir: &TempDir) -> std::path::PathBuf {
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1, "expected one transcript, got {entries:?}");
        entries.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let gateway = Arc::new(ScriptedGateway::new().final_text("4"));
        let peer = ScriptedPeer::new(["add"]);

        let messages = agent(&gateway).run(&peer, "What is 2+2?").await.unwrap();

        assert_eq!(
            messages,
            vec![Message::user("What is 2+2?"), Message::assistant("4")]
        );
        assert_eq!(gateway.requests().len(), 1);
        assert!(peer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_tool_call_round_trip() {
        let call = ContentBlock::tool_call("t1", "add", args(2, 2));
        let gateway = Arc::new(
            ScriptedGateway::new()
                .respond(Ok(ModelResponse::ToolCalls(vec![call.clone()])))
                .final_text("4"),
        );
        let peer = ScriptedPeer::new(["add"]).respond(Ok(ToolOutcome::ok("4")));

        let messages = agent(&gateway).run(&peer, "What is 2+2?").await.unwrap();

        let expected = vec![
            Message::user("What is 2+2?"),
            Message::assistant_blocks(vec![call]),
            Message::user_blocks(vec![ContentBlock::tool_result("t1", "4")]),
            Message::assistant("4"),
        ];
        assert_eq!(messages, expected);

        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], expected[..3]);
        assert_eq!(peer.calls(), vec![("add".to_string(), args(2, 2))]);
    }

    #[tokio::test]
    async fn test_tool_calls_dispatched_in_emission_order() {
        let blocks = vec![
            ContentBlock::text("Working on it."),
            ContentBlock::tool_call("t1", "add", args(1, 2)),
            ContentBlock::text("And the other one."),
            ContentBlock::tool_call("t2", "sub", args(5, 3)),
        ];
        let gateway = Arc::new(
            ScriptedGateway::new()
                .respond(Ok(ModelResponse::ToolCalls(blocks.clone())))
                .final_text("3 and 2"),
        );
        let peer = ScriptedPeer::new(["add", "sub"])
            .respond(Ok(ToolOutcome::ok("3")))
            .respond(Ok(ToolOutcome::ok("2")));

        let messages = agent(&gateway).run(&peer, "compute").await.unwrap();

        // The assistant message keeps the model's blocks exactly as emitted
        assert_eq!(messages[1], Message::assistant_blocks(blocks));
        assert_eq!(
            messages[2],
            Message::user_blocks(vec![ContentBlock::tool_result("t1", "3")])
        );
        assert_eq!(
            messages[3],
            Message::user_blocks(vec![ContentBlock::tool_result("t2", "2")])
        );
        let called: Vec<_> = peer.calls().into_iter().map(|(name, _)| name).collect();
        assert_eq!(called, ["add", "sub"]);
        assert!(relay_core::Conversation::from(messages).check_pairing().is_ok());
    }

    #[tokio::test]
    async fn test_peer_rejection_is_fed_back_to_the_model() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .respond(Ok(ModelResponse::ToolCalls(vec![ContentBlock::tool_call(
                    "t1",
                    "add",
                    Map::new(),
                )])))
                .final_text("I could not add those."),
        );
        let peer = ScriptedPeer::new(["add"]).respond(Err(ToolInvocationError::Peer {
            tool: "add".into(),
            code: -32602,
            message: "missing a".into(),
        }));

        let messages = agent(&gateway).run(&peer, "add nothing").await.unwrap();

        assert_eq!(messages.len(), 4);
        assert!(matches!(
            messages[2].blocks(),
            [ContentBlock::ToolResult { is_error: true, content, .. }] if content.contains("missing a")
        ));
    }

    #[tokio::test]
    async fn test_closed_channel_aborts_but_peer_stays_usable() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .respond(Ok(ModelResponse::ToolCalls(vec![ContentBlock::tool_call(
                    "t1",
                    "add",
                    args(2, 2),
                )])))
                .final_text("4"),
        );
        let peer = ScriptedPeer::new(["add"])
            .respond(Err(ToolInvocationError::ChannelClosed { tool: "add".into() }));
        let agent = agent(&gateway);

        let err = agent.run(&peer, "What is 2+2?").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::ToolInvocation(ToolInvocationError::ChannelClosed { .. })
        ));
        assert_eq!(gateway.requests().len(), 1);

        // The next query on the same peer is unaffected
        let messages = agent.run(&peer, "again").await.unwrap();
        assert_eq!(messages.last(), Some(&Message::assistant("4")));
    }

    #[tokio::test]
    async fn test_unknown_tool_aborts() {
        let gateway = Arc::new(ScriptedGateway::new().respond(Ok(ModelResponse::ToolCalls(vec![
            ContentBlock::tool_call("t1", "delete_everything", Map::new()),
        ]))));
        let peer = ScriptedPeer::new(["add"]);

        let err = agent(&gateway).run(&peer, "hi").await.unwrap_err();
        assert!(matches!(err, QueryError::UnknownTool(name) if name == "delete_everything"));
        assert!(peer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_model_error_aborts() {
        let gateway = Arc::new(ScriptedGateway::new().respond(Err(ModelCallError::RateLimited)));
        let peer = ScriptedPeer::new(["add"]);

        let err = agent(&gateway).run(&peer, "hi").await.unwrap_err();
        assert!(matches!(err, QueryError::ModelCall(ModelCallError::RateLimited)));
    }

    #[tokio::test]
    async fn test_max_turns_guard() {
        let looping = |id: &str| {
            Ok(ModelResponse::ToolCalls(vec![ContentBlock::tool_call(
                id,
                "add",
                args(1, 1),
            )]))
        };
        let gateway = Arc::new(
            ScriptedGateway::new()
                .respond(looping("t1"))
                .respond(looping("t2"))
                .respond(looping("t3")),
        );
        let peer = ScriptedPeer::new(["add"]);

        let agent = AgentLoop::new(gateway.clone(), AgentConfig::default().with_max_turns(2));
        let err = agent.run(&peer, "loop forever").await.unwrap_err();

        assert!(matches!(err, QueryError::MaxTurnsExceeded(2)));
        assert_eq!(gateway.requests().len(), 2);
        assert_eq!(peer.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_transcript_matches_returned_messages() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(
            ScriptedGateway::new()
                .respond(Ok(ModelResponse::ToolCalls(vec![ContentBlock::tool_call(
                    "t1",
                    "add",
                    args(2, 2),
                )])))
                .final_text("4"),
        );
        let peer = ScriptedPeer::new(["add"]).respond(Ok(ToolOutcome::ok("4")));

        let messages = agent(&gateway)
            .with_transcripts(TranscriptLogger::new(dir.path()))
            .run(&peer, "What is 2+2?")
            .await
            .unwrap();

        let saved = transcript::load(&only_transcript(&dir)).await.unwrap();
        assert_eq!(saved, messages);
    }

    #[tokio::test]
    async fn test_aborted_query_leaves_partial_transcript() {
        let dir = TempDir::new().unwrap();
        let call = ContentBlock::tool_call("t1", "add", args(2, 2));
        let gateway = Arc::new(
            ScriptedGateway::new().respond(Ok(ModelResponse::ToolCalls(vec![call.clone()]))),
        );
        let peer = ScriptedPeer::new(["add"])
            .respond(Err(ToolInvocationError::ChannelClosed { tool: "add".into() }));

        let result = agent(&gateway)
            .with_transcripts(TranscriptLogger::new(dir.path()))
            .run(&peer, "What is 2+2?")
            .await;
        assert!(result.is_err());

        let saved = transcript::load(&only_transcript(&dir)).await.unwrap();
        assert_eq!(
            saved,
            vec![
                Message::user("What is 2+2?"),
                Message::assistant_blocks(vec![call])
            ]
        );
    }

    #[tokio::test]
    async fn test_transcript_failure_does_not_abort() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let gateway = Arc::new(ScriptedGateway::new().final_text("4"));
        let peer = ScriptedPeer::new(["add"]);

        let messages = agent(&gateway)
            .with_transcripts(TranscriptLogger::new(&blocker))
            .run(&peer, "What is 2+2?")
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_unanswered_call_blocks_the_next_model_call() {
        let gateway = Arc::new(ScriptedGateway::new().final_text("4"));
        let peer = ScriptedPeer::new(["add"]);
        let agent = agent(&gateway);

        let mut state = AgentState::new("What is 2+2?");
        state.add_message(Message::assistant_blocks(vec![ContentBlock::tool_call(
            "t1",
            "add",
            args(2, 2),
        )]));
        state.model_calls = 1;

        let err = agent.turn(&peer, &mut state, None).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Protocol(ProtocolError::UnansweredToolCall(id)) if id == "t1"
        ));
        assert!(gateway.requests().is_empty());
        assert_eq!(state.model_calls, 1);
    }
}
