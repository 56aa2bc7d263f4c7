//! mc-core: Core types and components for mcpchat
//!
//! This crate provides the tool-provider configuration model, the
//! multi-provider tool registry, the agent interface with its built-in ReAct
//! implementation, the streaming event aggregator and the session controller.

pub mod agent;
pub mod aggregator;
pub mod connection;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod registry;
pub mod session;
pub mod tool;
pub mod tool_config;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{Agent, AgentFactory, AgentRequest, ReactAgent, ReactAgentFactory};
pub use aggregator::{DisplaySink, DisplayUpdate, StreamAggregator, TraceStatus};
pub use connection::{Connection, Connector};
pub use error::Error;
pub use event::{EventStream, StreamEvent, ToolCallChunk, ToolCallDelta};
pub use memory::{ThreadId, ThreadMemory};
pub use message::{Message, Role, StreamChunk, ToolCall, Usage};
pub use provider::{CompletionRequest, GenerationOptions, Provider, StreamResult};
pub use registry::ProviderRegistry;
pub use session::{
    ConversationThread, FailureKind, Session, SessionSettings, SessionState, Turn, TurnResult,
    DEFAULT_MAX_STEPS, DEFAULT_PREAMBLE, DEFAULT_TIMEOUT_SECS, MAX_STEPS_RANGE,
    TIMEOUT_RANGE_SECS,
};
pub use tool::{Tool, ToolDefinition, ToolOutput, ToolRegistry};
pub use tool_config::{Launch, ToolProviderConfig, ToolProviderConfigs, TransportKind};

pub type Result<T> = std::result::Result<T, Error>;
