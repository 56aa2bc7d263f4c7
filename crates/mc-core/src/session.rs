//! Session controller.
//!
//! A [`Session`] owns the conversation history, the thread id, the tool
//! registry and the agent built over it, and drives one turn at a time
//! through the agent and a [`StreamAggregator`].
//!
//! Turn timeouts drop the agent's event stream. Tool calls the agent has not
//! yet dispatched are cancelled with it, but a request already delivered to a
//! tool provider is not recalled and may still run to completion there.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentFactory, AgentRequest};
use crate::aggregator::{DisplaySink, StreamAggregator, TraceStatus};
use crate::connection::Connector;
use crate::error::Error;
use crate::event::EventStream;
use crate::memory::{ThreadId, ThreadMemory};
use crate::message::Message;
use crate::registry::ProviderRegistry;
use crate::tool_config::ToolProviderConfigs;

pub const TIMEOUT_RANGE_SECS: RangeInclusive<u64> = 60..=300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const MAX_STEPS_RANGE: RangeInclusive<usize> = 10..=200;
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Fixed instruction preamble handed to every agent.
pub const DEFAULT_PREAMBLE: &str = "\
You are a smart agent with the ability to use tools. \
Analyze the user's question and call the appropriate tools to answer it. \
If a tool returns an error, explain the problem to the user instead of guessing. \
Answer in the same language as the question, concisely, and cite which tool results you relied on.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    User(String),
    Assistant(String),
    /// Tool trace of the assistant turn it follows.
    ToolTrace(String),
}

impl Turn {
    pub fn role(&self) -> &'static str {
        match self {
            Turn::User(_) => "user",
            Turn::Assistant(_) => "assistant",
            Turn::ToolTrace(_) => "assistant_tool",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::User(text) | Turn::Assistant(text) | Turn::ToolTrace(text) => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    id: ThreadId,
    turns: Vec<Turn>,
}

impl ConversationThread {
    pub fn new() -> Self {
        Self {
            id: ThreadId::generate(),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> &ThreadId {
        &self.id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Append a completed exchange. The tool trace is kept only when non-empty.
    pub fn commit(&mut self, question: &str, answer: &str, tool_trace: &str) {
        self.turns.push(Turn::User(question.to_string()));
        self.turns.push(Turn::Assistant(answer.to_string()));
        if !tool_trace.is_empty() {
            self.turns.push(Turn::ToolTrace(tool_trace.to_string()));
        }
    }

    /// Message context for the agent. Tool traces are display-only.
    pub fn messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .filter_map(|turn| match turn {
                Turn::User(text) => Some(Message::user(text.as_str())),
                Turn::Assistant(text) => Some(Message::assistant(text.as_str())),
                Turn::ToolTrace(_) => None,
            })
            .collect()
    }
}

impl Default for ConversationThread {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    NotInitialized,
    InternalError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::NotInitialized => write!(f, "not initialized"),
            FailureKind::InternalError => write!(f, "internal error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResult {
    Success { answer: String, tool_trace: String },
    Failure { kind: FailureKind, message: String },
}

impl TurnResult {
    /// Classify a turn error for the user.
    fn from_error(err: Error) -> Self {
        let (kind, message) = match &err {
            Error::NotInitialized => (
                FailureKind::NotInitialized,
                format!("{err}. Apply a tool configuration first."),
            ),
            Error::Timeout(_) => (FailureKind::Timeout, err.to_string()),
            _ => (FailureKind::InternalError, format!("{err}\n\n{err:?}")),
        };
        TurnResult::Failure { kind, message }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TurnResult::Success { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub max_steps: usize,
    pub preamble: String,
}

impl SessionSettings {
    /// Settings with the user-adjustable limits clamped to their allowed ranges.
    pub fn new(timeout_secs: u64, max_steps: usize, preamble: impl Into<String>) -> Self {
        Self {
            timeout: Duration::from_secs(clamp_timeout(timeout_secs)),
            max_steps: clamp_steps(max_steps),
            preamble: preamble.into(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS, DEFAULT_MAX_STEPS, DEFAULT_PREAMBLE)
    }
}

fn clamp_timeout(secs: u64) -> u64 {
    secs.clamp(*TIMEOUT_RANGE_SECS.start(), *TIMEOUT_RANGE_SECS.end())
}

fn clamp_steps(steps: usize) -> usize {
    steps.clamp(*MAX_STEPS_RANGE.start(), *MAX_STEPS_RANGE.end())
}

pub struct Session {
    connector: Arc<dyn Connector>,
    agent_factory: Arc<dyn AgentFactory>,
    settings: SessionSettings,
    state: SessionState,
    registry: ProviderRegistry,
    agent: Option<Arc<dyn Agent>>,
    memory: Arc<ThreadMemory>,
    thread: ConversationThread,
}

impl Session {
    pub fn new(
        connector: Arc<dyn Connector>,
        agent_factory: Arc<dyn AgentFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            agent_factory,
            settings,
            state: SessionState::Uninitialized,
            registry: ProviderRegistry::empty(),
            agent: None,
            memory: Arc::new(ThreadMemory::new()),
            thread: ConversationThread::new(),
        }
    }

    /// Build the tool registry for `configs` and an agent over it.
    ///
    /// Any previous registry is closed first. On failure every partially
    /// opened provider is released, the session is left uninitialized and
    /// the error is returned.
    pub async fn initialize(&mut self, configs: &ToolProviderConfigs) -> Result<(), Error> {
        self.state = SessionState::Initializing;
        self.agent = None;

        if let Err(err) = self.registry.rebuild(self.connector.as_ref(), configs).await {
            error!(error = %err, provider = err.provider(), "Session initialization failed");
            self.state = SessionState::Uninitialized;
            return Err(err);
        }

        self.memory = Arc::new(ThreadMemory::new());
        let agent = self.agent_factory.build(
            self.registry.tools().clone(),
            Arc::clone(&self.memory),
            &self.settings.preamble,
        );
        self.agent = Some(agent);
        self.state = SessionState::Ready;

        info!(
            providers = self.registry.connection_count(),
            tools = self.registry.len(),
            thread = %self.thread.id(),
            "Session initialized"
        );
        Ok(())
    }

    /// Run one user turn, pushing display updates to `sink` as events arrive.
    ///
    /// History is only extended when the turn completes normally.
    pub async fn submit_turn(&mut self, text: &str, sink: &mut dyn DisplaySink) -> TurnResult {
        let agent = match (&self.state, &self.agent) {
            (SessionState::Ready, Some(agent)) => Arc::clone(agent),
            _ => return TurnResult::from_error(Error::NotInitialized),
        };

        self.state = SessionState::Processing;

        let mut messages = self.thread.messages();
        messages.push(Message::user(text));
        let request = AgentRequest {
            thread_id: self.thread.id().clone(),
            messages,
            max_steps: self.settings.max_steps,
        };

        let limit = self.settings.timeout;
        debug!(thread = %request.thread_id, max_steps = request.max_steps, timeout = ?limit, "Submitting turn");

        let outcome = tokio::time::timeout(limit, drive_turn(agent.run(request), sink)).await;
        self.state = SessionState::Ready;

        match outcome {
            Ok(Ok((answer, tool_trace))) => {
                if !tool_trace.is_empty() {
                    sink.update_tool_trace(&tool_trace, TraceStatus::Complete);
                }
                self.thread.commit(text, &answer, &tool_trace);
                debug!(turns = self.thread.turns().len(), "Turn committed");
                TurnResult::Success { answer, tool_trace }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Turn failed");
                TurnResult::from_error(err)
            }
            Err(_) => {
                warn!(timeout = ?limit, "Turn timed out");
                TurnResult::from_error(Error::timeout(format!(
                    "response time exceeded the {limit:?} limit. Try again later or raise the timeout."
                )))
            }
        }
    }

    /// Start a new thread with empty history. The registry is untouched.
    pub fn reset(&mut self) {
        self.memory.forget(self.thread.id());
        self.thread = ConversationThread::new();
        info!(thread = %self.thread.id(), "Conversation reset");
    }

    /// Close every tool provider and drop the agent.
    pub async fn shutdown(&mut self) {
        self.agent = None;
        self.registry.close().await;
        self.state = SessionState::Uninitialized;
    }

    /// Returns the applied value.
    pub fn set_timeout_secs(&mut self, secs: u64) -> u64 {
        let secs = clamp_timeout(secs);
        self.settings.timeout = Duration::from_secs(secs);
        secs
    }

    /// Returns the applied value.
    pub fn set_max_steps(&mut self, steps: usize) -> usize {
        let steps = clamp_steps(steps);
        self.settings.max_steps = steps;
        steps
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn thread_id(&self) -> &ThreadId {
        self.thread.id()
    }

    pub fn history(&self) -> &[Turn] {
        self.thread.turns()
    }

    /// Open provider connections, including providers that expose no tools.
    pub fn provider_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn provider_tools(&self) -> IndexMap<String, Vec<String>> {
        self.registry.providers()
    }
}

async fn drive_turn(
    mut events: EventStream,
    sink: &mut dyn DisplaySink,
) -> Result<(String, String), Error> {
    let mut aggregator = StreamAggregator::new();
    while let Some(event) = events.next().await {
        aggregator.feed(event?).apply(sink);
    }
    Ok(aggregator.finish())
}
