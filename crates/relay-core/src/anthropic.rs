//! Model gateway for the Anthropic Messages API.
//!
//! Stateless per call: every request carries the full conversation and the
//! tool manifest. The response is classified into either a final answer or a
//! list of blocks containing at least one tool call.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::ModelConfig;
use crate::error::ModelCallError;
use crate::message::{ContentBlock, Message, ToolDescriptor};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// What the model asked for on this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// The response was a single text block.
    FinalText(String),
    /// The full ordered block list; contains at least one tool call.
    ToolCalls(Vec<ContentBlock>),
}

/// Submits a conversation plus tool manifest to a language model.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        max_tokens: u32,
    ) -> Result<ModelResponse, ModelCallError>;
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDescriptor],
}

fn no_tools(tools: &&[ToolDescriptor]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicGateway {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl fmt::Debug for AnthropicGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicGateway")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl AnthropicGateway {
    /// Create a gateway with an explicit key and request timeout
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelCallError::NotConfigured(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from `[model]` settings, reading the key from the environment
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(
            &config.base_url,
            &config.name,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Map a raw Messages API content list onto a `ModelResponse`
    fn classify(content: Vec<Value>) -> Result<ModelResponse, ModelCallError> {
        let mut blocks = Vec::with_capacity(content.len());
        for raw in content {
            let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
            match kind {
                "text" | "tool_use" => {
                    let block = ContentBlock::deserialize(&raw).map_err(|e| {
                        ModelCallError::MalformedResponse(format!("bad {kind} block: {e}"))
                    })?;
                    blocks.push(block);
                }
                other => trace!(block_type = other, "Dropping unsupported content block"),
            }
        }

        let has_tool_call = blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCallRequest { .. }));
        if has_tool_call {
            return Ok(ModelResponse::ToolCalls(blocks));
        }

        match blocks.as_slice() {
            [ContentBlock::Text { text }] => Ok(ModelResponse::FinalText(text.clone())),
            [] => Err(ModelCallError::MalformedResponse(
                "response contained no usable content".into(),
            )),
            _ => Err(ModelCallError::MalformedResponse(format!(
                "expected one text block or a tool call, got {} text blocks",
                blocks.len()
            ))),
        }
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        max_tokens: u32,
    ) -> Result<ModelResponse, ModelCallError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages,
            tools,
        };

        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelCallError::Timeout(e.to_string())
                } else {
                    ModelCallError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ModelCallError::RateLimited);
        }
        if status == 401 || status == 403 {
            return Err(ModelCallError::Authentication(
                "model service rejected the API key".into(),
            ));
        }
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model API error");
            return Err(ModelCallError::Api {
                status,
                message: error_body,
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelCallError::Timeout(e.to_string())
            } else {
                ModelCallError::MalformedResponse(e.to_string())
            }
        })?;

        debug!(stop_reason = ?parsed.stop_reason, blocks = parsed.content.len(), "Model responded");
        Self::classify(parsed.content)
    }
}
