//! The presentation port.
//!
//! All user-facing output goes through this trait so the turn logic stays
//! testable without a terminal and free of ambient formatting state.
//! Every failure surfaces as a single severity-tagged line.

use quill_telemetry::{ContextAlert, SessionSummary};
use std::io::Write;
use std::time::Duration;

/// User-facing output sink for the session.
pub trait Console: Send + Sync {
    /// Neutral progress line.
    fn status(&self, message: &str);

    /// Low-severity problem line.
    fn warn(&self, message: &str);

    /// High-severity problem line.
    fn error(&self, message: &str);

    /// A streamed fragment of assistant text (no trailing newline).
    fn stream_text(&self, delta: &str);

    /// The streamed response finished; close the line.
    fn turn_ended(&self);

    /// One-line summary of a tool invocation request.
    fn tool_call(&self, name: &str, args: &str);

    /// One-line summary of a tool invocation result.
    fn tool_result(&self, name: &str, success: bool, output: &str);

    /// A rate-limit retry is about to sleep.
    fn retry(&self, attempt: u32, max_attempts: u32, delay: Duration);

    /// Context utilization crossed a warning threshold.
    fn context_alert(&self, alert: ContextAlert, utilization: f64);

    /// Render the running session summary.
    fn summary(&self, summary: &SessionSummary);

    /// Render the command help.
    fn help(&self);

    /// Print the input prompt (no trailing newline).
    fn prompt(&self);
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

/// ANSI-colored terminal console.
pub struct TerminalConsole;

impl TerminalConsole {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for TerminalConsole {
    fn status(&self, message: &str) {
        println!("{DIM}· {message}{RESET}");
    }

    fn warn(&self, message: &str) {
        eprintln!("{YELLOW}! {message}{RESET}");
    }

    fn error(&self, message: &str) {
        eprintln!("{RED}✗ {message}{RESET}");
    }

    fn stream_text(&self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn turn_ended(&self) {
        println!();
    }

    fn tool_call(&self, name: &str, args: &str) {
        println!("{CYAN}→ {name} {args}{RESET}");
    }

    fn tool_result(&self, name: &str, success: bool, output: &str) {
        if success {
            println!("{CYAN}← {name}: {output}{RESET}");
        } else {
            println!("{YELLOW}← {name} failed: {output}{RESET}");
        }
    }

    fn retry(&self, attempt: u32, max_attempts: u32, delay: Duration) {
        eprintln!(
            "{YELLOW}! rate limited (attempt {attempt}/{max_attempts}), retrying in {}s{RESET}",
            delay.as_secs()
        );
    }

    fn context_alert(&self, alert: ContextAlert, utilization: f64) {
        let percent = utilization * 100.0;
        match alert {
            ContextAlert::High => {
                self.error(&format!("context window {percent:.0}% full"));
            }
            ContextAlert::Low => {
                self.warn(&format!("context window {percent:.0}% full"));
            }
        }
    }

    fn summary(&self, summary: &SessionSummary) {
        let minutes = summary.duration().num_seconds() as f64 / 60.0;
        println!();
        println!("  requests:        {}", summary.requests);
        println!(
            "  tokens:          {} in / {} out ({} cached)",
            summary.total_input_tokens, summary.total_output_tokens, summary.total_cached_tokens
        );
        println!("  cost:            ${:.4}", summary.total_cost);
        println!("  max context:     {} tokens", summary.max_context_length);
        println!(
            "  avg utilization: {:.1}%",
            summary.avg_context_utilization * 100.0
        );
        println!("  duration:        {minutes:.1} min");
        println!();
    }

    fn help(&self) {
        println!();
        println!("  exit | quit   end the session");
        println!("  summary       show usage and cost so far");
        println!("  clear         archive and reset the conversation");
        println!("  resume        reload the latest saved conversation");
        println!("  retry         re-send your previous message");
        println!("  help          this text");
        println!();
    }

    fn prompt(&self) {
        print!("you > ");
        let _ = std::io::stdout().flush();
    }
}

/// Test double that records every line it is given.
///
/// Entries are tagged with their channel (`status:`, `warn:`, `error:`,
/// `retry:`, …); streamed text accumulates separately.
#[derive(Default)]
pub struct RecordingConsole {
    entries: std::sync::Mutex<Vec<String>>,
    streamed: std::sync::Mutex<String>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tagged line recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// All streamed text concatenated.
    pub fn streamed(&self) -> String {
        self.streamed.lock().unwrap().clone()
    }

    /// Entries starting with the given tag.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(tag))
            .collect()
    }

    fn record(&self, line: String) {
        self.entries.lock().unwrap().push(line);
    }
}

impl Console for RecordingConsole {
    fn status(&self, message: &str) {
        self.record(format!("status: {message}"));
    }

    fn warn(&self, message: &str) {
        self.record(format!("warn: {message}"));
    }

    fn error(&self, message: &str) {
        self.record(format!("error: {message}"));
    }

    fn stream_text(&self, delta: &str) {
        self.streamed.lock().unwrap().push_str(delta);
    }

    fn turn_ended(&self) {}

    fn tool_call(&self, name: &str, args: &str) {
        self.record(format!("tool_call: {name} {args}"));
    }

    fn tool_result(&self, name: &str, success: bool, output: &str) {
        self.record(format!("tool_result: {name} {success} {output}"));
    }

    fn retry(&self, attempt: u32, max_attempts: u32, delay: Duration) {
        self.record(format!(
            "retry: attempt {attempt}/{max_attempts} delay {}s",
            delay.as_secs()
        ));
    }

    fn context_alert(&self, alert: ContextAlert, utilization: f64) {
        self.record(format!("context_alert: {alert:?} {utilization:.2}"));
    }

    fn summary(&self, summary: &SessionSummary) {
        self.record(format!("summary: {} requests", summary.requests));
    }

    fn help(&self) {
        self.record("help:".into());
    }

    fn prompt(&self) {}
}
