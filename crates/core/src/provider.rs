//! ChatProvider trait — the abstraction over the streaming chat transport.
//!
//! A provider accepts an ordered message history plus a tool catalog and
//! yields a stream of typed events: text fragments, tool-invocation
//! request/result pairs (spliced in by the invocation middleware), usage
//! metadata, and a final `Done` marker. Errors surface through the stream
//! as `ProviderError` values carrying an optional HTTP-like status.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name across the merged catalog
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One streaming chat request: full history plus the current tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g. "claude-sonnet-4-20250514")
    pub model: String,

    /// The conversation messages, system message first
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// Token usage for one completed turn.
///
/// `cached_tokens` counts input tokens the upstream provider served from its
/// prompt cache at a reduced rate; they are a subset of `input_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
}

impl Usage {
    /// Fold another usage report into this one (multi-round turns).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// One fragment of a streaming response.
///
/// Every fragment kind is represented explicitly; consumers match
/// exhaustively rather than inspecting open-ended content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial assistant text.
    Text { delta: String },

    /// The model requested a tool invocation.
    ToolCallRequest {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool invocation completed; its result was spliced into the stream.
    ToolCallResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Final usage metadata for the turn (emitted once, before `Done`).
    UsageMetadata { usage: Usage, model: String },

    /// The stream is complete.
    Done,
}

/// The streaming chat transport.
///
/// The session orchestrator calls `stream()` once per attempt; tool
/// execution happens below this seam (see the invocation middleware), so
/// from the caller's perspective a turn is one event stream that runs to
/// `Done` or an error.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// A human-readable name for this provider (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Issue a streaming request and receive typed events.
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_sums_counters() {
        let mut a = Usage {
            input_tokens: 100,
            output_tokens: 20,
            cached_tokens: 50,
        };
        a.merge(&Usage {
            input_tokens: 40,
            output_tokens: 10,
            cached_tokens: 0,
        });
        assert_eq!(a.input_tokens, 140);
        assert_eq!(a.output_tokens, 30);
        assert_eq!(a.cached_tokens, 50);
        assert_eq!(a.total_tokens(), 170);
    }

    #[test]
    fn stream_event_serialization() {
        let event = StreamEvent::ToolCallRequest {
            id: "call_1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "/tmp/x"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call_request""#));
        assert!(json.contains(r#""name":"read_file""#));

        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        match back {
            StreamEvent::ToolCallRequest { name, .. } => assert_eq!(name, "read_file"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn chat_request_defaults() {
        let json = r#"{"model":"test-model","messages":[]}"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
        assert!(req.tools.is_empty());
    }
}
