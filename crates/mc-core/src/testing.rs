//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde_json::Value;

use crate::agent::{Agent, AgentFactory, AgentRequest};
use crate::connection::{Connection, Connector};
use crate::error::Error;
use crate::event::{EventStream, StreamEvent};
use crate::memory::ThreadMemory;
use crate::message::StreamChunk;
use crate::provider::{CompletionRequest, Provider, StreamResult};
use crate::tool::{Tool, ToolDefinition, ToolOutput, ToolRegistry};
use crate::tool_config::ToolProviderConfig;

/// A mock provider that replays pre-configured chunk sequences.
pub struct MockProvider {
    streams: Mutex<VecDeque<Vec<StreamChunk>>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue the chunks returned by the next stream() call.
    /// Sequences are returned in FIFO order.
    pub fn queue_chunks(&self, chunks: Vec<StreamChunk>) {
        self.streams.lock().unwrap().push_back(chunks);
    }

    /// Queue a plain text answer split into the given deltas.
    pub fn queue_text(&self, deltas: &[&str]) {
        let mut chunks = vec![StreamChunk::Start {
            model: "mock-model".to_string(),
        }];
        chunks.extend(deltas.iter().map(|d| StreamChunk::Delta {
            content: d.to_string(),
        }));
        chunks.push(StreamChunk::Done { usage: None });
        self.queue_chunks(chunks);
    }

    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        self.captured_requests.lock().unwrap().push(request);
        match self.streams.lock().unwrap().pop_front() {
            Some(chunks) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok)))),
            None => Err(Error::internal("No mock stream queued")),
        }
    }
}

/// A tool that always answers with the same text.
pub struct StaticTool {
    name: String,
    provider: String,
    output: String,
}

impl StaticTool {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name.as_str(), "Static test tool")
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolOutput, Error> {
        Ok(ToolOutput::success(self.output.as_str()))
    }
}

/// Connection lifecycle events recorded by [`MockConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Opened(String),
    OpenFailed(String),
    Closed(String),
}

#[derive(Default)]
struct ConnectorState {
    log: Vec<LifecycleEvent>,
    open: usize,
    max_open: usize,
}

/// In-memory connector whose connections echo their invocations.
///
/// Providers not configured with [`MockConnector::with_tools`] open with an
/// empty tool list.
#[derive(Default)]
pub struct MockConnector {
    tools: IndexMap<String, Vec<String>>,
    failing: HashSet<String>,
    failing_list: HashSet<String>,
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, provider: &str, tools: &[&str]) -> Self {
        self.tools.insert(
            provider.to_string(),
            tools.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    /// Opening this provider fails.
    pub fn failing(mut self, provider: &str) -> Self {
        self.failing.insert(provider.to_string());
        self
    }

    /// This provider opens but fails to list its tools.
    pub fn failing_list(mut self, provider: &str) -> Self {
        self.failing_list.insert(provider.to_string());
        self
    }

    pub fn log(&self) -> Vec<LifecycleEvent> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open
    }

    /// Highest number of simultaneously open connections seen so far.
    pub fn max_concurrent_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        name: &str,
        _config: &ToolProviderConfig,
    ) -> Result<Arc<dyn Connection>, Error> {
        let mut state = self.state.lock().unwrap();
        if self.failing.contains(name) {
            state.log.push(LifecycleEvent::OpenFailed(name.to_string()));
            return Err(Error::connection(name, "connection refused"));
        }

        state.log.push(LifecycleEvent::Opened(name.to_string()));
        state.open += 1;
        state.max_open = state.max_open.max(state.open);

        Ok(Arc::new(MockConnection {
            provider: name.to_string(),
            tools: self.tools.get(name).cloned().unwrap_or_default(),
            fail_list: self.failing_list.contains(name),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockConnection {
    provider: String,
    tools: Vec<String>,
    fail_list: bool,
    closed: AtomicBool,
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, Error> {
        if self.fail_list {
            return Err(Error::internal("tools/list failed"));
        }
        Ok(self
            .tools
            .iter()
            .map(|name| ToolDefinition::new(name.as_str(), format!("{} tool", self.provider)))
            .collect())
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::invocation(tool, "connection closed"));
        }
        Ok(ToolOutput::success(format!(
            "{}/{}({})",
            self.provider, tool, arguments
        )))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.log.push(LifecycleEvent::Closed(self.provider.clone()));
        state.open = state.open.saturating_sub(1);
    }
}

/// What a [`ScriptedAgent`] does for one run.
#[derive(Debug, Clone)]
pub enum AgentScript {
    /// Emit the events, then end normally.
    Events(Vec<StreamEvent>),
    /// Emit the events, then fail with an internal error.
    Fail {
        events: Vec<StreamEvent>,
        message: String,
    },
    /// Emit the events, then never finish.
    Hang(Vec<StreamEvent>),
}

/// Record of one [`AgentFactory::build`] call.
#[derive(Debug, Clone)]
pub struct AgentBuild {
    pub tools: Vec<String>,
    pub preamble: String,
}

#[derive(Default)]
struct ScriptQueue {
    scripts: Mutex<VecDeque<AgentScript>>,
    requests: Mutex<Vec<AgentRequest>>,
}

/// Agent factory whose agents replay queued scripts in order.
///
/// Runs with no queued script emit nothing and end normally.
#[derive(Default)]
pub struct ScriptedAgentFactory {
    queue: Arc<ScriptQueue>,
    builds: Mutex<Vec<AgentBuild>>,
}

impl ScriptedAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, script: AgentScript) {
        self.queue.scripts.lock().unwrap().push_back(script);
    }

    /// Every request received by agents built from this factory.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.queue.requests.lock().unwrap().clone()
    }

    pub fn builds(&self) -> Vec<AgentBuild> {
        self.builds.lock().unwrap().clone()
    }
}

impl AgentFactory for ScriptedAgentFactory {
    fn build(
        &self,
        tools: ToolRegistry,
        _memory: Arc<ThreadMemory>,
        preamble: &str,
    ) -> Arc<dyn Agent> {
        self.builds.lock().unwrap().push(AgentBuild {
            tools: tools.names().into_iter().map(str::to_string).collect(),
            preamble: preamble.to_string(),
        });
        Arc::new(ScriptedAgent {
            queue: Arc::clone(&self.queue),
        })
    }
}

pub struct ScriptedAgent {
    queue: Arc<ScriptQueue>,
}

impl Agent for ScriptedAgent {
    fn run(&self, request: AgentRequest) -> EventStream {
        self.queue.requests.lock().unwrap().push(request);
        let script = self
            .queue
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AgentScript::Events(Vec::new()));

        match script {
            AgentScript::Events(events) => Box::pin(stream::iter(events.into_iter().map(Ok))),
            AgentScript::Fail { events, message } => Box::pin(
                stream::iter(events.into_iter().map(Ok))
                    .chain(stream::once(async move { Err(Error::internal(message)) })),
            ),
            AgentScript::Hang(events) => Box::pin(
                stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
            ),
        }
    }
}
