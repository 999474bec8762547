//! # Quill Core
//!
//! Domain types, traits, and error definitions for the Quill agent REPL.
//! This crate has **zero framework dependencies** — it defines the domain
//! model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, FailureKind, ProviderError, Result, StoreError, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{ChatProvider, ChatRequest, StreamEvent, ToolDefinition, Usage};
pub use tool::{ToolCall, ToolExecutor, ToolOutput};
