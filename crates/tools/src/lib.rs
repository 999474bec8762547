//! Tool provider processes and the merged tool catalog.
//!
//! A tool provider is an independently-running process exposing named,
//! invocable actions over a structured stdio protocol (newline-delimited
//! JSON-RPC 2.0). This crate launches the configured providers, performs
//! the capability handshake — which also registers a sampling callback the
//! provider may use to request model completions on the session's behalf —
//! queries each for its tool list, and merges everything into one
//! immutable-per-session catalog.
//!
//! Protocol methods:
//! - `initialize`      — client → provider, advertises the sampling capability
//! - `tools/list`      — client → provider, returns the provider's tools
//! - `tools/call`      — client → provider, executes one tool
//! - `sampling/complete` — provider → client, asks for a model completion

pub mod protocol;
pub mod provider;
pub mod registry;

pub use protocol::ToolSpec;
pub use provider::{SamplingHandler, ToolProvider};
pub use registry::ProviderRegistry;
