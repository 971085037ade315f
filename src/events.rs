use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// One observable step of an agent session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant text, in the order the model produced it.
    Text(String),
    ToolCall { name: String, args: Value },
    ToolResult { name: String, output: String },
}

/// The response side of a single agent request. Ends when the session ends.
pub type EventStream<'a> = BoxStream<'a, Result<AgentEvent>>;

/// Everything seen on an event stream, kept for the report fallback.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    texts: Vec<String>,
    tool_calls: usize,
    tool_results: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Text(text) => {
                if !text.trim().is_empty() {
                    self.texts.push(text.clone());
                }
            }
            AgentEvent::ToolCall { .. } => self.tool_calls += 1,
            AgentEvent::ToolResult { .. } => self.tool_results += 1,
        }
    }

    pub fn text(&self) -> String {
        self.texts.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    pub fn tool_results(&self) -> usize {
        self.tool_results
    }
}
