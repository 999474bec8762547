//! Data model for usage records, session summaries, and the session report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed turn's accounting, produced once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Input tokens reported by the endpoint (cached tokens included).
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// Input tokens served from the provider's prompt cache.
    pub cached_tokens: u32,
    /// Cost in USD, computed from the pricing table at record time.
    pub cost: f64,
    /// Model the turn ran against.
    pub model: String,
    /// Estimated tokens in history when the turn completed.
    pub context_length: u32,
    /// The model's maximum context window.
    pub max_context_length: u32,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Context utilization ratio for this record, in `[0, 1]`-ish range
    /// (can exceed 1.0 if the estimate overshoots the window).
    pub fn utilization(&self) -> f64 {
        if self.max_context_length == 0 {
            return 0.0;
        }
        self.context_length as f64 / self.max_context_length as f64
    }
}

/// Severity of a context-near-limit warning.
///
/// Thresholds are fixed: utilization ≥ 90% is high severity, ≥ 70% low,
/// below that no warning is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextAlert {
    Low,
    High,
}

const HIGH_UTILIZATION: f64 = 0.90;
const LOW_UTILIZATION: f64 = 0.70;

impl ContextAlert {
    /// Classify a utilization ratio; `None` below the warning floor.
    pub fn for_utilization(utilization: f64) -> Option<Self> {
        if utilization >= HIGH_UTILIZATION {
            Some(Self::High)
        } else if utilization >= LOW_UTILIZATION {
            Some(Self::Low)
        } else {
            None
        }
    }
}

/// Running totals for the session, recomputed incrementally on every record.
///
/// Not persisted on its own: fully reconstructable by replaying the usage
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Number of completed turns recorded.
    pub requests: u64,
    /// Total input tokens across the session.
    pub total_input_tokens: u64,
    /// Total output tokens across the session.
    pub total_output_tokens: u64,
    /// Total cached input tokens across the session.
    pub total_cached_tokens: u64,
    /// Total cost in USD.
    pub total_cost: f64,
    /// Largest context ever used, in tokens.
    pub max_context_length: u32,
    /// Arithmetic mean of per-record utilization ratios (unweighted).
    pub avg_context_utilization: f64,
    /// When the session (ledger) started.
    pub started_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            requests: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cached_tokens: 0,
            total_cost: 0.0,
            max_context_length: 0,
            avg_context_utilization: 0.0,
            started_at,
        }
    }

    /// Fold one record into the running totals.
    pub(crate) fn absorb(&mut self, record: &UsageRecord) {
        self.requests += 1;
        self.total_input_tokens += record.input_tokens as u64;
        self.total_output_tokens += record.output_tokens as u64;
        self.total_cached_tokens += record.cached_tokens as u64;
        self.total_cost += record.cost;
        self.max_context_length = self.max_context_length.max(record.context_length);
        // Incremental unweighted mean over per-record ratios.
        let n = self.requests as f64;
        self.avg_context_utilization += (record.utilization() - self.avg_context_utilization) / n;
    }

    /// Wall-clock session duration so far.
    pub fn duration(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }
}

/// The end-of-session report written next to the conversation snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub summary: SessionSummary,
    pub history: Vec<UsageRecord>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(context: u32, max: u32) -> UsageRecord {
        UsageRecord {
            input_tokens: 100,
            output_tokens: 50,
            cached_tokens: 0,
            cost: 0.001,
            model: "test-model".into(),
            context_length: context,
            max_context_length: max,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn utilization_ratio() {
        let r = record(50, 200);
        assert!((r.utilization() - 0.25).abs() < 1e-10);
    }

    #[test]
    fn utilization_zero_window() {
        let r = record(50, 0);
        assert_eq!(r.utilization(), 0.0);
    }

    #[test]
    fn alert_thresholds() {
        assert_eq!(ContextAlert::for_utilization(0.95), Some(ContextAlert::High));
        assert_eq!(ContextAlert::for_utilization(0.90), Some(ContextAlert::High));
        assert_eq!(ContextAlert::for_utilization(0.80), Some(ContextAlert::Low));
        assert_eq!(ContextAlert::for_utilization(0.70), Some(ContextAlert::Low));
        assert_eq!(ContextAlert::for_utilization(0.69), None);
        assert_eq!(ContextAlert::for_utilization(0.0), None);
    }

    #[test]
    fn summary_absorbs_records() {
        let mut summary = SessionSummary::new(Utc::now());
        summary.absorb(&record(100, 200)); // 0.5
        summary.absorb(&record(150, 200)); // 0.75

        assert_eq!(summary.requests, 2);
        assert_eq!(summary.total_input_tokens, 200);
        assert_eq!(summary.total_output_tokens, 100);
        assert!((summary.total_cost - 0.002).abs() < 1e-10);
        assert_eq!(summary.max_context_length, 150);
        // Unweighted mean of 0.5 and 0.75
        assert!((summary.avg_context_utilization - 0.625).abs() < 1e-10);
    }

    #[test]
    fn mean_is_unweighted_not_token_weighted() {
        let mut summary = SessionSummary::new(Utc::now());
        // One tiny-context record and one huge-context record with equal
        // ratios would both be weighted equally by a token-weighted mean,
        // so use differing ratios to tell the two apart.
        summary.absorb(&record(10, 100)); // 0.1
        summary.absorb(&record(90_000, 100_000)); // 0.9
        assert!((summary.avg_context_utilization - 0.5).abs() < 1e-10);
    }
}
