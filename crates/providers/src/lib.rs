//! Chat transport implementations for Quill.
//!
//! `AnthropicClient` speaks the Messages API over SSE and emits typed
//! stream events. `ToolInvocationLayer` wraps any `ChatProvider` and
//! executes tool calls the model requests mid-stream, splicing the results
//! back into the event sequence — callers above the layer see one
//! uninterrupted turn.

pub mod anthropic;
pub mod invocation;

pub use anthropic::AnthropicClient;
pub use invocation::ToolInvocationLayer;
