//! Reasoning engine abstraction and the Anthropic Messages API client.
//!
//! The [`Engine`] trait decouples the agent loop from the actual service. Tests
//! use scripted engines that return queued turns without any network traffic.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::conversation::{AssistantBlock, AssistantTurn, ToolCall, Turn};
use crate::io::config::EngineConfig;
use crate::io::tools::ToolSchema;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Everything the engine needs to produce the next assistant turn.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolSchema],
}

/// Failure of a single engine call, classified for the retry policy.
#[derive(Debug, Error)]
pub enum EngineCallError {
    /// The request never got a response (DNS, connect, timeout, reset).
    #[error("connection error: {0}")]
    Connection(String),
    /// HTTP 429.
    #[error("rate limited: {message}")]
    Throttled {
        retry_after: Option<Duration>,
        reset_at: Option<String>,
        message: String,
    },
    /// Any other non-success status.
    #[error("engine returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("undecodable engine response: {0}")]
    Decode(String),
}

/// Non-retryable engine failure. Fatal for the current issue.
#[derive(Debug, Error)]
#[error("engine error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct EngineError {
    pub status: Option<u16>,
    pub message: String,
}

pub trait Engine {
    /// Send the conversation and return the next assistant turn.
    fn complete(&self, request: &EngineRequest<'_>) -> Result<AssistantTurn, EngineCallError>;

    /// Estimate the input tokens `request` would consume.
    fn count_tokens(&self, request: &EngineRequest<'_>) -> Result<u64, EngineCallError>;
}

impl<E: Engine + ?Sized> Engine for &E {
    fn complete(&self, request: &EngineRequest<'_>) -> Result<AssistantTurn, EngineCallError> {
        (**self).complete(request)
    }

    fn count_tokens(&self, request: &EngineRequest<'_>) -> Result<u64, EngineCallError> {
        (**self).count_tokens(request)
    }
}

/// Blocking client for the Anthropic Messages API.
pub struct AnthropicEngine {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    api_key: SecretString,
}

impl AnthropicEngine {
    pub fn new(config: &EngineConfig, api_key: SecretString) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key,
        })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Response, EngineCallError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .map_err(|err| EngineCallError::Connection(err.to_string()))?;
        check_status(response)
    }
}

impl Engine for AnthropicEngine {
    #[instrument(skip_all, fields(model = %self.model, turns = request.turns.len()))]
    fn complete(&self, request: &EngineRequest<'_>) -> Result<AssistantTurn, EngineCallError> {
        let mut body = message_body(&self.model, request);
        body["max_tokens"] = json!(self.max_tokens);
        body["tool_choice"] = json!({"type": "auto"});
        let response = self.post("/v1/messages", &body)?;
        let parsed: MessagesResponse = response
            .json()
            .map_err(|err| EngineCallError::Decode(err.to_string()))?;
        debug!(
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("none"),
            blocks = parsed.content.len(),
            "engine responded"
        );
        Ok(parsed.into_turn())
    }

    #[instrument(skip_all, fields(model = %self.model, turns = request.turns.len()))]
    fn count_tokens(&self, request: &EngineRequest<'_>) -> Result<u64, EngineCallError> {
        let body = message_body(&self.model, request);
        let response = self.post("/v1/messages/count_tokens", &body)?;
        let parsed: CountTokensResponse = response
            .json()
            .map_err(|err| EngineCallError::Decode(err.to_string()))?;
        Ok(parsed.input_tokens)
    }
}

fn check_status(response: Response) -> Result<Response, EngineCallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let reset_at = response
        .headers()
        .get("anthropic-ratelimit-requests-reset")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().unwrap_or_default();
    let message = error_message(&body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(EngineCallError::Throttled {
            retry_after,
            reset_at,
            message,
        });
    }
    Err(EngineCallError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Parse a `retry-after` header given in (possibly fractional) seconds.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Request body shared by `messages` and `messages/count_tokens`.
pub fn message_body(model: &str, request: &EngineRequest<'_>) -> Value {
    let tools: Vec<Value> = request
        .tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect();
    let mut body = json!({
        "model": model,
        "messages": request.turns.iter().map(turn_to_wire).collect::<Vec<_>>(),
        "tools": tools,
    });
    if !request.system.is_empty() {
        body["system"] = json!(request.system);
    }
    body
}

fn turn_to_wire(turn: &Turn) -> Value {
    match turn {
        Turn::User { content } => json!({"role": "user", "content": content}),
        Turn::Assistant(assistant) => {
            let content: Vec<Value> = assistant
                .blocks
                .iter()
                .map(|block| match block {
                    AssistantBlock::Text { text } => json!({"type": "text", "text": text}),
                    AssistantBlock::ToolCall(call) => json!({
                        "type": "tool_use",
                        "id": call.call_id,
                        "name": call.name,
                        "input": call.arguments,
                    }),
                })
                .collect();
            json!({"role": "assistant", "content": content})
        }
        Turn::ToolResults { results } => {
            let content: Vec<Value> = results
                .iter()
                .map(|result| {
                    json!({
                        "type": "tool_result",
                        "tool_use_id": result.call_id,
                        "content": result.text,
                        "is_error": result.is_error,
                    })
                })
                .collect();
            json!({"role": "user", "content": content})
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    fn into_turn(self) -> AssistantTurn {
        let blocks = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(AssistantBlock::Text { text }),
                WireBlock::ToolUse { id, name, input } => Some(AssistantBlock::ToolCall(ToolCall {
                    call_id: id,
                    name,
                    arguments: input,
                })),
                WireBlock::Other => None,
            })
            .collect();
        AssistantTurn::new(blocks)
    }
}

#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    input_tokens: u64,
}
