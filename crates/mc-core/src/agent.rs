//! Agent interface and the built-in ReAct agent.
//!
//! An [`Agent`] turns a message context into an ordered [`EventStream`]. The
//! session only depends on the trait; [`ReactAgent`] is the implementation
//! used by the binary: it alternates streaming model calls with tool
//! invocations until the model answers without requesting tools.

use std::sync::Arc;

use async_stream::stream;
use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::event::{EventStream, StreamEvent};
use crate::memory::{ThreadId, ThreadMemory};
use crate::message::{Message, StreamChunk, ToolCall};
use crate::provider::{CompletionRequest, GenerationOptions, Provider};
use crate::tool::ToolRegistry;

/// Input for one agent run.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub thread_id: ThreadId,
    /// Conversation context; the last message is the new user input.
    pub messages: Vec<Message>,
    /// Maximum number of model calls for this run.
    pub max_steps: usize,
}

pub trait Agent: Send + Sync {
    /// Start a run. The returned stream is lazy: dropping it abandons the run
    /// at its next suspension point.
    fn run(&self, request: AgentRequest) -> EventStream;
}

/// Builds an agent bound to a tool set, a memory store, and an instruction preamble.
pub trait AgentFactory: Send + Sync {
    fn build(
        &self,
        tools: ToolRegistry,
        memory: Arc<ThreadMemory>,
        preamble: &str,
    ) -> Arc<dyn Agent>;
}

pub struct ReactAgent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    memory: Arc<ThreadMemory>,
    preamble: String,
    options: GenerationOptions,
}

impl ReactAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        memory: Arc<ThreadMemory>,
        preamble: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools: Arc::new(tools),
            memory,
            preamble: preamble.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

impl Agent for ReactAgent {
    fn run(&self, request: AgentRequest) -> EventStream {
        let provider = Arc::clone(&self.provider);
        let tools = Arc::clone(&self.tools);
        let memory = Arc::clone(&self.memory);
        let preamble = self.preamble.clone();
        let options = self.options.clone();

        Box::pin(stream! {
            let mut transcript = seed_transcript(&memory, &request);

            debug!(
                thread = %request.thread_id,
                context_messages = transcript.len(),
                tools_available = tools.len(),
                max_steps = request.max_steps,
                "Agent run starting"
            );

            for step in 0..request.max_steps {
                let mut messages = Vec::with_capacity(transcript.len() + 1);
                if !preamble.is_empty() {
                    messages.push(Message::system(preamble.as_str()));
                }
                messages.extend(transcript.iter().cloned());

                let completion =
                    options.apply(CompletionRequest::new(messages).with_tools(tools.definitions()));

                let mut chunks = match provider.stream(completion).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut content = String::new();
                let mut pending = PendingToolCalls::default();

                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(StreamChunk::Delta { content: delta }) => {
                            content.push_str(&delta);
                            yield Ok(StreamEvent::TextDelta(delta));
                        }
                        Ok(StreamChunk::ToolCallStart { id, name }) => {
                            yield Ok(StreamEvent::tool_call(id.as_str(), name.as_str()));
                            pending.start(id, name);
                        }
                        Ok(StreamChunk::ToolCallDelta { arguments }) => {
                            pending.append(&arguments);
                            yield Ok(StreamEvent::arguments(arguments));
                        }
                        Ok(StreamChunk::Start { model }) => {
                            trace!(model = %model, step, "Model stream started");
                        }
                        Ok(StreamChunk::Done { usage }) => {
                            if let Some(usage) = usage {
                                debug!(
                                    step,
                                    prompt_tokens = usage.prompt_tokens,
                                    completion_tokens = usage.completion_tokens,
                                    "Model call finished"
                                );
                            }
                        }
                        Ok(StreamChunk::Error { message }) => {
                            yield Err(Error::stream(message));
                            return;
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                let calls = pending.finish();
                if calls.is_empty() {
                    debug!(thread = %request.thread_id, steps = step + 1, "Agent run completed");
                    transcript.push(Message::assistant(content));
                    memory.save(&request.thread_id, transcript);
                    return;
                }

                debug!(step, tool_count = calls.len(), "Agent executing tools");
                let tool_calls = calls.iter().map(|c| c.call.clone()).collect();
                transcript.push(Message::assistant_with_tool_calls(content, tool_calls));

                let outputs = join_all(calls.iter().map(|c| run_call(&tools, c))).await;
                for (AssembledCall { call, .. }, output) in calls.iter().zip(outputs) {
                    yield Ok(StreamEvent::tool_result(call.name.as_str(), output.as_str()));
                    transcript.push(Message::tool_result(call.id.as_str(), output));
                }
            }

            yield Err(Error::StepBudgetExceeded(request.max_steps));
        })
    }
}

/// Continue from the stored transcript when the thread has one, otherwise
/// start from the supplied context.
fn seed_transcript(memory: &ThreadMemory, request: &AgentRequest) -> Vec<Message> {
    match (memory.load(&request.thread_id), request.messages.last()) {
        (Some(mut transcript), Some(latest)) => {
            transcript.push(latest.clone());
            transcript
        }
        _ => request.messages.clone(),
    }
}

/// A tool call whose argument stream has ended.
struct AssembledCall {
    call: ToolCall,
    /// Parse error when the streamed arguments were not valid JSON.
    invalid_arguments: Option<String>,
}

/// Tool calls being assembled from streamed fragments.
#[derive(Default)]
struct PendingToolCalls {
    finished: Vec<AssembledCall>,
    current: Option<(String, String, String)>,
}

impl PendingToolCalls {
    fn start(&mut self, id: String, name: String) {
        self.flush();
        self.current = Some((id, name, String::new()));
    }

    fn append(&mut self, fragment: &str) {
        if let Some((_, _, ref mut args)) = self.current {
            args.push_str(fragment);
        }
    }

    fn flush(&mut self) {
        let Some((id, name, args)) = self.current.take() else {
            return;
        };
        let empty = || Value::Object(Default::default());
        let (arguments, invalid_arguments) = if args.trim().is_empty() {
            (empty(), None)
        } else {
            match serde_json::from_str::<Value>(&args) {
                Ok(value) => (value, None),
                Err(e) => {
                    // Usually a call cut off by the token limit. The API rejects a
                    // null input on replay, so the transcript records an empty object.
                    warn!(tool = %name, error = %e, "Discarding tool call with invalid arguments");
                    (empty(), Some(e.to_string()))
                }
            }
        };
        self.finished.push(AssembledCall {
            call: ToolCall::new(id, name, arguments),
            invalid_arguments,
        });
    }

    fn finish(mut self) -> Vec<AssembledCall> {
        self.flush();
        self.finished
    }
}

async fn run_call(registry: &ToolRegistry, assembled: &AssembledCall) -> String {
    match &assembled.invalid_arguments {
        Some(error) => format!("Error: invalid tool arguments: {error}"),
        None => execute_tool(registry, &assembled.call).await,
    }
}

/// Execute a single tool call. Failures are reported to the model as text.
async fn execute_tool(registry: &ToolRegistry, tool_call: &ToolCall) -> String {
    let Some(tool) = registry.get(&tool_call.name) else {
        return format!("Error: Unknown tool '{}'", tool_call.name);
    };

    match tool.execute(tool_call.arguments.clone()).await {
        Ok(output) => {
            if output.is_error {
                format!("Error: {}", output.content)
            } else {
                output.content
            }
        }
        Err(e) => format!("Error executing tool: {}", e),
    }
}

/// Builds [`ReactAgent`]s over a shared model provider.
pub struct ReactAgentFactory {
    provider: Arc<dyn Provider>,
    options: GenerationOptions,
}

impl ReactAgentFactory {
    pub fn new(provider: Arc<dyn Provider>, options: GenerationOptions) -> Self {
        Self { provider, options }
    }
}

impl AgentFactory for ReactAgentFactory {
    fn build(
        &self,
        tools: ToolRegistry,
        memory: Arc<ThreadMemory>,
        preamble: &str,
    ) -> Arc<dyn Agent> {
        Arc::new(
            ReactAgent::new(Arc::clone(&self.provider), tools, memory, preamble)
                .with_options(self.options.clone()),
        )
    }
}
