//! Folds an agent's event stream into the two display buffers of a turn.

use crate::event::{StreamEvent, ToolCallChunk, ToolCallDelta};

/// Whether the tool trace may still grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    InProgress,
    Complete,
}

/// Receiver of incremental display updates.
///
/// Each call replaces the whole content of one region with the given text.
pub trait DisplaySink {
    fn update_answer(&mut self, text: &str);

    fn update_tool_trace(&mut self, text: &str, status: TraceStatus);
}

/// Redisplay instruction produced for every fed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUpdate {
    Answer(String),
    ToolTrace { text: String, status: TraceStatus },
}

impl DisplayUpdate {
    pub fn apply(&self, sink: &mut dyn DisplaySink) {
        match self {
            DisplayUpdate::Answer(text) => sink.update_answer(text),
            DisplayUpdate::ToolTrace { text, status } => sink.update_tool_trace(text, *status),
        }
    }
}

/// Transient buffers for the turn in progress. Pure append-only fold.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    answer: String,
    tool_trace: String,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: StreamEvent) -> DisplayUpdate {
        match event {
            StreamEvent::TextDelta(fragment) => {
                self.answer.push_str(&fragment);
                DisplayUpdate::Answer(self.answer.clone())
            }
            StreamEvent::ToolCallDelta(ToolCallDelta::Arguments(fragment)) => {
                self.tool_trace.push_str(&fragment);
                self.trace_update()
            }
            StreamEvent::ToolCallDelta(ToolCallDelta::Chunk(chunk)) => {
                self.tool_trace.push_str(&render_chunk(&chunk));
                self.trace_update()
            }
            StreamEvent::ToolResult { tool, output } => {
                self.tool_trace.push_str(&render_result(&tool, &output));
                self.trace_update()
            }
        }
    }

    fn trace_update(&self) -> DisplayUpdate {
        DisplayUpdate::ToolTrace {
            text: self.tool_trace.clone(),
            status: TraceStatus::InProgress,
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn tool_trace(&self) -> &str {
        &self.tool_trace
    }

    /// Final `(answer, tool_trace)` buffers.
    pub fn finish(self) -> (String, String) {
        (self.answer, self.tool_trace)
    }
}

fn render_chunk(chunk: &ToolCallChunk) -> String {
    let body = serde_json::to_string_pretty(chunk).unwrap_or_default();
    format!("\n```json\n{body}\n```\n")
}

fn render_result(tool: &str, output: &str) -> String {
    let output = output.trim_end();
    format!("\n**Tool result** `{tool}`\n```\n{output}\n```\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        answers: Vec<String>,
        traces: Vec<(String, TraceStatus)>,
    }

    impl DisplaySink for RecordingSink {
        fn update_answer(&mut self, text: &str) {
            self.answers.push(text.to_string());
        }

        fn update_tool_trace(&mut self, text: &str, status: TraceStatus) {
            self.traces.push((text.to_string(), status));
        }
    }

    #[test]
    fn test_text_deltas_accumulate_with_update_per_event() {
        let mut aggregator = StreamAggregator::new();
        let mut sink = RecordingSink::default();

        for fragment in ["Hello, ", "world!"] {
            aggregator.feed(StreamEvent::text(fragment)).apply(&mut sink);
        }

        assert_eq!(sink.answers, vec!["Hello, ", "Hello, world!"]);
        assert!(sink.traces.is_empty());

        let (answer, trace) = aggregator.finish();
        assert_eq!(answer, "Hello, world!");
        assert!(trace.is_empty());
    }

    #[test]
    fn test_argument_fragments_append_in_order() {
        let mut aggregator = StreamAggregator::new();
        aggregator.feed(StreamEvent::arguments("{\"loca"));
        let update = aggregator.feed(StreamEvent::arguments("tion\": \"Seoul\"}"));

        assert_eq!(
            update,
            DisplayUpdate::ToolTrace {
                text: "{\"location\": \"Seoul\"}".to_string(),
                status: TraceStatus::InProgress,
            }
        );
        assert!(aggregator.answer().is_empty());
    }

    #[test]
    fn test_chunk_descriptor_rendered_as_block() {
        let mut aggregator = StreamAggregator::new();
        aggregator.feed(StreamEvent::tool_call("toolu_1", "get_weather"));

        let trace = aggregator.tool_trace();
        assert!(trace.contains("```json"));
        assert!(trace.contains("\"name\": \"get_weather\""));
        assert!(trace.contains("\"id\": \"toolu_1\""));
        assert!(!trace.contains("arguments"));
    }

    #[test]
    fn test_tool_result_block_follows_call() {
        let mut aggregator = StreamAggregator::new();
        aggregator.feed(StreamEvent::tool_call("toolu_1", "get_weather"));
        aggregator.feed(StreamEvent::arguments("{\"location\": \"Seoul\"}"));
        let update = aggregator.feed(StreamEvent::tool_result("get_weather", "It's always Sunny in Seoul\n"));
        aggregator.feed(StreamEvent::text("Sunny."));

        let DisplayUpdate::ToolTrace { text, status } = update else {
            panic!("expected tool trace update");
        };
        assert_eq!(status, TraceStatus::InProgress);
        assert!(text.ends_with("**Tool result** `get_weather`\n```\nIt's always Sunny in Seoul\n```\n"));

        let call_at = text.find("get_weather").unwrap();
        let args_at = text.find("Seoul\"}").unwrap();
        let result_at = text.find("**Tool result**").unwrap();
        assert!(call_at < args_at && args_at < result_at);

        assert_eq!(aggregator.answer(), "Sunny.");
    }
}
