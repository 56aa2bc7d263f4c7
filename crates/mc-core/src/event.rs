use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Ordered stream of events produced by an agent for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// One event of an agent's incremental output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of answer text.
    TextDelta(String),
    /// Part of a tool invocation the model is composing.
    ToolCallDelta(ToolCallDelta),
    /// Raw output of a finished tool invocation.
    ToolResult { tool: String, output: String },
}

impl StreamEvent {
    pub fn text(fragment: impl Into<String>) -> Self {
        StreamEvent::TextDelta(fragment.into())
    }

    pub fn arguments(fragment: impl Into<String>) -> Self {
        StreamEvent::ToolCallDelta(ToolCallDelta::Arguments(fragment.into()))
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>) -> Self {
        StreamEvent::ToolCallDelta(ToolCallDelta::Chunk(ToolCallChunk {
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }))
    }

    pub fn tool_result(tool: impl Into<String>, output: impl Into<String>) -> Self {
        StreamEvent::ToolResult {
            tool: tool.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallDelta {
    /// Partial argument text, appended verbatim.
    Arguments(String),
    /// A discrete chunk descriptor, rendered as its own block.
    Chunk(ToolCallChunk),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}
