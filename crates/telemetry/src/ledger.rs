//! The usage ledger — append-only accounting of completed turns.
//!
//! Thread-safe via `RwLock` like the rest of the telemetry layer, although
//! the session drives it from a single logical thread: `record` is called
//! exactly once per completed turn.

use crate::TelemetryError;
use crate::pricing::PricingTable;
use crate::record::{SessionReport, SessionSummary, UsageRecord};
use chrono::Utc;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Converts raw token counts into usage records and running totals.
pub struct UsageLedger {
    pricing: PricingTable,
    history: RwLock<Vec<UsageRecord>>,
    summary: RwLock<SessionSummary>,
}

impl UsageLedger {
    /// Create a ledger with default pricing.
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    /// Create a ledger with a custom pricing table.
    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            history: RwLock::new(Vec::new()),
            summary: RwLock::new(SessionSummary::new(Utc::now())),
        }
    }

    /// Get a reference to the pricing table.
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record one completed turn.
    ///
    /// Looks up the model's price, computes the cost (cached tokens billed
    /// at the discounted rate, fresh input at full rate), appends an
    /// immutable record to the history, and folds it into the summary.
    pub fn record(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cached_tokens: u32,
        model: &str,
        context_length: u32,
        max_context_length: u32,
    ) -> UsageRecord {
        let cost = self
            .pricing
            .compute_cost(model, input_tokens, output_tokens, cached_tokens);

        let record = UsageRecord {
            input_tokens,
            output_tokens,
            cached_tokens,
            cost,
            model: model.to_string(),
            context_length,
            max_context_length,
            timestamp: Utc::now(),
        };

        debug!(
            model,
            input_tokens, output_tokens, cached_tokens, cost, "Recorded turn usage"
        );

        self.summary.write().unwrap().absorb(&record);
        self.history.write().unwrap().push(record.clone());
        record
    }

    /// Point-in-time session summary. O(1): maintained incrementally.
    pub fn summary(&self) -> SessionSummary {
        self.summary.read().unwrap().clone()
    }

    /// Number of records so far.
    pub fn record_count(&self) -> usize {
        self.history.read().unwrap().len()
    }

    /// Full usage history (cloned snapshot).
    pub fn history(&self) -> Vec<UsageRecord> {
        self.history.read().unwrap().clone()
    }

    /// Serialize `{summary, history, generated_at}` to a JSON file.
    ///
    /// A write failure is reported to the caller but is never fatal to the
    /// session; callers log and continue.
    pub fn save_report(&self, path: &Path) -> Result<(), TelemetryError> {
        let report = SessionReport {
            summary: self.summary(),
            history: self.history(),
            generated_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&report)?;

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %path.display(), error = %e, "Failed to create report directory");
                return Err(TelemetryError::ReportWrite {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        std::fs::write(path, json).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to write session report");
            TelemetryError::ReportWrite {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ModelPricing;

    fn test_ledger() -> UsageLedger {
        let pricing = PricingTable::empty();
        pricing.set("test-model", ModelPricing::new(1.0, 3.0));
        UsageLedger::with_pricing(pricing)
    }

    #[test]
    fn record_computes_cost() {
        let ledger = test_ledger();
        let record = ledger.record(10, 6, 0, "test-model", 16, 200_000);
        // (10 * 1.0 + 6 * 3.0) / 1M
        assert!((record.cost - 0.000028).abs() < 1e-12);
        assert_eq!(ledger.record_count(), 1);
    }

    #[test]
    fn cost_never_negative_and_monotone() {
        let ledger = test_ledger();
        let small = ledger.record(10, 5, 0, "test-model", 10, 1000);
        let big = ledger.record(100, 50, 0, "test-model", 10, 1000);
        assert!(small.cost >= 0.0);
        assert!(big.cost >= small.cost);
    }

    #[test]
    fn summary_accumulates() {
        let ledger = test_ledger();
        ledger.record(100, 50, 0, "test-model", 1000, 10_000);
        ledger.record(200, 80, 20, "test-model", 2000, 10_000);

        let summary = ledger.summary();
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.total_input_tokens, 300);
        assert_eq!(summary.total_output_tokens, 130);
        assert_eq!(summary.total_cached_tokens, 20);
        assert_eq!(summary.max_context_length, 2000);
        // Mean of 0.1 and 0.2
        assert!((summary.avg_context_utilization - 0.15).abs() < 1e-10);
    }

    #[test]
    fn history_is_append_only_values() {
        let ledger = test_ledger();
        let first = ledger.record(10, 5, 0, "test-model", 10, 100);
        ledger.record(20, 5, 0, "test-model", 20, 100);

        let history = ledger.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].input_tokens, first.input_tokens);
        assert_eq!(history[0].timestamp, first.timestamp);
    }

    #[test]
    fn save_report_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let ledger = test_ledger();
        ledger.record(10, 6, 0, "test-model", 16, 200_000);
        ledger.save_report(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let report: SessionReport = serde_json::from_str(&content).unwrap();
        assert_eq!(report.summary.requests, 1);
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.history[0].model, "test-model");
    }

    #[test]
    fn save_report_failure_is_reported_not_panicking() {
        let ledger = test_ledger();
        let result = ledger.save_report(Path::new("/proc/definitely/not/writable.json"));
        assert!(result.is_err());
    }
}
