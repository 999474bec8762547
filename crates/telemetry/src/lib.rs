//! Usage accounting and cost tracking for Quill sessions.
//!
//! Converts the raw token counts reported by the chat endpoint into durable
//! accounting records, running session totals, and an end-of-session JSON
//! report, using a built-in per-model pricing table with config overrides.

pub mod ledger;
pub mod pricing;
pub mod record;

pub use ledger::UsageLedger;
pub use pricing::{ModelPricing, PricingTable};
pub use record::{ContextAlert, SessionReport, SessionSummary, UsageRecord};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to write report to {path}: {reason}")]
    ReportWrite { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
