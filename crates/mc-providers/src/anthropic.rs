//! Streaming client for the Anthropic Messages API.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

use mc_core::{
    CompletionRequest, Error, Message, Provider, Role, StreamChunk, StreamResult, ToolDefinition,
    Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
/// The API rejects requests without `max_tokens`.
const FALLBACK_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}

/// Translate a provider-neutral request into a Messages API body.
///
/// System messages are lifted into `system`; tool results travel as
/// `tool_result` blocks inside user turns, and consecutive turns of the same
/// role are folded together since the API requires strict alternation.
fn encode_request(request: &CompletionRequest, default_model: Option<&str>) -> Body {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System && !m.content.is_empty())
        .map(|m| m.content.as_str())
        .collect();

    let mut turns: Vec<WireTurn> = Vec::new();
    for message in &request.messages {
        let (role, blocks) = match message.role {
            Role::System => continue,
            Role::User => ("user", text_blocks(&message.content)),
            Role::Assistant => ("assistant", assistant_blocks(message)),
            Role::Tool => (
                "user",
                vec![Block::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                }],
            ),
        };
        if let Some(last) = turns.last_mut().filter(|t| t.role == role) {
            last.content.extend(blocks);
        } else {
            turns.push(WireTurn {
                role,
                content: blocks,
            });
        }
    }

    Body {
        model: request
            .model
            .clone()
            .or_else(|| default_model.map(str::to_string)),
        messages: turns,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        max_tokens: request.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
        temperature: request.temperature,
        stream: true,
        tools: request.tools.iter().map(WireTool::from).collect(),
    }
}

fn text_blocks(text: &str) -> Vec<Block> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![Block::Text {
            text: text.to_string(),
        }]
    }
}

fn assistant_blocks(message: &Message) -> Vec<Block> {
    let calls = message.tool_calls.iter().map(|call| Block::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.arguments.clone(),
    });
    text_blocks(&message.content).into_iter().chain(calls).collect()
}

/// Map a non-success HTTP response to the matching error class.
fn status_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    match status {
        400 => Error::invalid_request(message),
        401 | 403 => Error::auth(message),
        429 => Error::rate_limit(message),
        _ => Error::api(status, message),
    }
}

/// Outcome of one server-sent event.
#[derive(Debug)]
enum Step {
    Chunk(StreamChunk),
    Finished,
    Failed(Error),
    Ignored,
}

fn decode_event(data: &str) -> Step {
    let event = match serde_json::from_str::<SseEvent>(data) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Skipping undecodable Anthropic event");
            return Step::Ignored;
        }
    };

    match event {
        SseEvent::MessageStart { message } => Step::Chunk(StreamChunk::Start {
            model: message.model,
        }),
        SseEvent::ContentBlockStart {
            content_block: BlockStart::ToolUse { id, name },
        } => {
            debug!(tool_id = %id, tool_name = %name, "Model started a tool call");
            Step::Chunk(StreamChunk::ToolCallStart { id, name })
        }
        SseEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } if !text.is_empty() => Step::Chunk(StreamChunk::Delta { content: text }),
        SseEvent::ContentBlockDelta {
            delta: BlockDelta::InputJsonDelta { partial_json },
        } if !partial_json.is_empty() => Step::Chunk(StreamChunk::ToolCallDelta {
            arguments: partial_json,
        }),
        SseEvent::MessageDelta { delta, usage } => {
            if let Some(reason) = delta.stop_reason {
                debug!(stop_reason = %reason, "Anthropic message finished");
            }
            Step::Chunk(StreamChunk::Done {
                usage: usage.map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            })
        }
        SseEvent::MessageStop => Step::Finished,
        SseEvent::Error { error } => {
            Step::Failed(Error::stream(format!("Anthropic stream error: {error}")))
        }
        _ => Step::Ignored,
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let body = encode_request(&request, self.default_model.as_deref());

        debug!(
            model = ?body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Anthropic stream request"
        );
        trace!(body = %serde_json::to_string(&body).unwrap_or_default(), "Anthropic request body");

        let builder = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let mut source = EventSource::new(builder).map_err(|e| Error::stream(e.to_string()))?;

        // Dropping the stream drops the event source, which ends the request.
        let chunks = stream! {
            while let Some(event) = source.next().await {
                let step = match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(msg)) => {
                        trace!(event = %msg.event, data = %msg.data, "Anthropic SSE event");
                        decode_event(&msg.data)
                    }
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let text = response.text().await.unwrap_or_default();
                        error!(status = status.as_u16(), body = %text, "Anthropic request rejected");
                        Step::Failed(status_error(status.as_u16(), &text))
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::Transport(e)) => {
                        error!(error = %e, "Anthropic connection failed");
                        Step::Failed(Error::network(e.to_string()))
                    }
                    Err(e) => {
                        error!(error = ?e, "Anthropic SSE transport error");
                        Step::Failed(Error::stream(format!("Anthropic SSE error: {e}")))
                    }
                };

                match step {
                    Step::Chunk(chunk) => yield Ok(chunk),
                    Step::Failed(err) => {
                        yield Err(err);
                        break;
                    }
                    Step::Finished => break,
                    Step::Ignored => {}
                }
            }
            source.close();
        };

        Ok(Box::pin(chunks))
    }
}

// Request body

#[derive(Debug, Serialize)]
struct Body {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<WireTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireTurn {
    role: &'static str,
    content: Vec<Block>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

impl From<&ToolDefinition> for WireTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

// Server-sent events

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart { message: StartedMessage },
    ContentBlockStart { content_block: BlockStart },
    ContentBlockDelta { delta: BlockDelta },
    MessageDelta {
        delta: MessageStatus,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Error { error: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartedMessage {
    model: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStatus {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
