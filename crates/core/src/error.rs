//! Error types for the Quill domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum; `FailureKind` is the session-level classification
//! of a transport failure into exactly one retry/terminate bucket.

use thiserror::Error;

/// The top-level error type for all Quill operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Rate limited by provider: {message}")]
    RateLimited { message: String },

    #[error("Quota exhausted: {message}")]
    QuotaExhausted { message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Handshake with provider '{provider}' failed: {reason}")]
    Handshake { provider: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// --- Failure classification ---

/// Session-level classification of a transport failure.
///
/// Every `ProviderError` maps to exactly one bucket:
/// - `TerminalQuota` ends the session (after a best-effort snapshot)
/// - `RetryableRateLimit` backs off and retries the same history
/// - `Terminal` fails the turn only; the session continues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RetryableRateLimit,
    TerminalQuota,
    Terminal,
}

/// Substrings marking a permanent resource-exhaustion signal, as
/// distinguished from ordinary rate limiting.
const QUOTA_MARKERS: &[&str] = &["quota", "credit balance", "insufficient_quota"];

/// Substrings marking ordinary rate limiting.
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "overloaded"];

impl FailureKind {
    pub fn classify(err: &ProviderError) -> Self {
        match err {
            ProviderError::QuotaExhausted { .. } => Self::TerminalQuota,
            ProviderError::RateLimited { .. } => Self::RetryableRateLimit,
            ProviderError::Api { status, message } => {
                let lower = message.to_lowercase();
                if *status == 402 || QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
                    Self::TerminalQuota
                } else if *status == 429 || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
                    Self::RetryableRateLimit
                } else {
                    Self::Terminal
                }
            }
            _ => Self::Terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_variant_is_terminal_quota() {
        let err = ProviderError::QuotaExhausted {
            message: "monthly budget reached".into(),
        };
        assert_eq!(FailureKind::classify(&err), FailureKind::TerminalQuota);
    }

    #[test]
    fn quota_marker_in_api_message() {
        let err = ProviderError::Api {
            status: 400,
            message: "Your credit balance is too low".into(),
        };
        assert_eq!(FailureKind::classify(&err), FailureKind::TerminalQuota);
    }

    #[test]
    fn status_429_is_retryable() {
        let err = ProviderError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(FailureKind::classify(&err), FailureKind::RetryableRateLimit);
    }

    #[test]
    fn rate_limit_marker_is_retryable() {
        let err = ProviderError::Api {
            status: 529,
            message: "Overloaded".into(),
        };
        assert_eq!(FailureKind::classify(&err), FailureKind::RetryableRateLimit);
    }

    #[test]
    fn quota_beats_rate_limit_on_ambiguous_message() {
        // A 429 whose body names quota exhaustion is session-ending, not
        // a transient limit.
        let err = ProviderError::Api {
            status: 429,
            message: "insufficient_quota: plan limit reached".into(),
        };
        assert_eq!(FailureKind::classify(&err), FailureKind::TerminalQuota);
    }

    #[test]
    fn network_errors_are_terminal_for_the_turn() {
        let err = ProviderError::Network("connection reset".into());
        assert_eq!(FailureKind::classify(&err), FailureKind::Terminal);
    }

    #[test]
    fn error_display_includes_status() {
        let err = Error::Provider(ProviderError::Api {
            status: 500,
            message: "internal".into(),
        });
        assert!(err.to_string().contains("500"));
    }
}
