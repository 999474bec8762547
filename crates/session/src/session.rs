//! The per-turn state machine.
//!
//! `Session` owns the conversation exclusively for the lifetime of a run.
//! Each turn moves `Dispatching → Streaming → {Completed | RetryWait →
//! Streaming | Terminal}`; control commands are intercepted before the
//! Dispatching step and never reach the model.

use crate::commands::SessionCommand;
use crate::console::Console;
use crate::history::InputHistory;
use quill_config::SessionConfig;
use quill_core::error::{FailureKind, ProviderError};
use quill_core::message::{Conversation, Message, MessageToolCall};
use quill_core::provider::{ChatProvider, ChatRequest, StreamEvent, Usage};
use quill_store::{SnapshotStore, SnapshotTag};
use quill_telemetry::{ContextAlert, UsageLedger};
use quill_tools::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the REPL should do after one handled input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Return to the prompt.
    Continue,
    /// End the session (exit command or quota exhaustion).
    Exit,
}

/// Bounded exponential backoff for rate-limited attempts.
///
/// The delay doubles from `initial` and is capped at `cap`; attempts count
/// up to `max_attempts` regardless of the cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl From<&SessionConfig> for RetryPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            initial: Duration::from_secs(config.initial_backoff_secs),
            cap: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

/// Static knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_context_tokens: u32,
}

/// Drives one interactive session to completion.
pub struct Session {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ProviderRegistry>,
    ledger: UsageLedger,
    store: SnapshotStore,
    console: Arc<dyn Console>,
    conversation: Conversation,
    options: SessionOptions,
    retry: RetryPolicy,
}

/// Messages and usage reconstructed from one completed stream.
struct StreamedTurn {
    messages: Vec<Message>,
    usage: Option<(Usage, String)>,
}

impl Session {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ProviderRegistry>,
        ledger: UsageLedger,
        store: SnapshotStore,
        console: Arc<dyn Console>,
        options: SessionOptions,
    ) -> Self {
        let conversation = Conversation::with_system(&options.system_prompt);
        Self {
            provider,
            registry,
            ledger,
            store,
            console,
            conversation,
            options,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (tests, config).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn console(&self) -> Arc<dyn Console> {
        self.console.clone()
    }

    /// The live conversation (read-only view).
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Handle one line of user input: intercept control commands, run a
    /// turn otherwise. Empty input is a no-op.
    pub async fn handle_input(
        &mut self,
        input: &str,
        history: &mut InputHistory,
    ) -> TurnOutcome {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return TurnOutcome::Continue;
        }

        match SessionCommand::parse(trimmed) {
            Some(SessionCommand::Exit) => TurnOutcome::Exit,
            Some(SessionCommand::Summary) => {
                self.console.summary(&self.ledger.summary());
                TurnOutcome::Continue
            }
            Some(SessionCommand::Help) => {
                self.console.help();
                TurnOutcome::Continue
            }
            Some(SessionCommand::Clear) => {
                self.clear();
                TurnOutcome::Continue
            }
            Some(SessionCommand::Resume) => {
                self.resume();
                TurnOutcome::Continue
            }
            Some(SessionCommand::Retry) => match history.last() {
                Some(previous) => {
                    let previous = previous.to_string();
                    self.run_turn(&previous).await
                }
                None => {
                    self.console.warn("nothing to retry yet");
                    TurnOutcome::Continue
                }
            },
            None => {
                history.remember(trimmed);
                self.run_turn(trimmed).await
            }
        }
    }

    /// Snapshot the current history, then reset it to the system prompt.
    fn clear(&mut self) {
        if let Err(e) = self.store.save(&self.conversation, SnapshotTag::PreClear) {
            warn!(error = %e, "Pre-clear snapshot failed");
            self.console.warn(&format!("could not archive conversation: {e}"));
        }
        self.conversation = Conversation::with_system(&self.options.system_prompt);
        self.console.status("conversation cleared");
    }

    /// Replace the live history with the latest persisted snapshot.
    fn resume(&mut self) {
        self.conversation = self.store.load_latest(&self.options.system_prompt);
        self.console.status(&format!(
            "resumed conversation ({} messages)",
            self.conversation.len()
        ));
    }

    /// Drive one full turn: append the user message, stream with retry,
    /// commit the outcome.
    async fn run_turn(&mut self, input: &str) -> TurnOutcome {
        let pre_turn_len = self.conversation.len();
        self.conversation.push(Message::user(input));

        // Catalog snapshot: immutable for the whole turn including retries.
        let tools = self.registry.definitions();

        let mut delay = self.retry.initial;
        let mut attempt: u32 = 1;

        loop {
            let request = ChatRequest {
                model: self.options.model.clone(),
                messages: self.conversation.messages.clone(),
                temperature: self.options.temperature,
                max_tokens: self.options.max_tokens,
                tools: tools.clone(),
            };

            match self.stream_once(request).await {
                Ok(turn) => {
                    self.commit_turn(turn);
                    return TurnOutcome::Continue;
                }
                Err(e) => match FailureKind::classify(&e) {
                    FailureKind::TerminalQuota => {
                        info!("Quota exhausted, ending session");
                        if let Err(se) = self
                            .store
                            .save(&self.conversation, SnapshotTag::QuotaExceeded)
                        {
                            warn!(error = %se, "Quota snapshot failed");
                        }
                        // Show the raw provider message before exiting.
                        self.console.error(&format!("quota exhausted: {e}"));
                        return TurnOutcome::Exit;
                    }
                    FailureKind::RetryableRateLimit => {
                        if attempt >= self.retry.max_attempts {
                            self.console.error(&format!(
                                "rate limited, giving up after {attempt} attempts"
                            ));
                            self.conversation.rollback_to(pre_turn_len);
                            return TurnOutcome::Continue;
                        }
                        self.console.retry(attempt, self.retry.max_attempts, delay);
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(self.retry.cap);
                        attempt += 1;
                    }
                    FailureKind::Terminal => {
                        self.console.error(&format!("turn failed: {e}"));
                        self.conversation.rollback_to(pre_turn_len);
                        return TurnOutcome::Continue;
                    }
                },
            }
        }
    }

    /// Consume one event stream, reconstructing the assistant/tool messages
    /// it implies. Returns an error as soon as the stream fails; nothing is
    /// committed in that case.
    async fn stream_once(&self, request: ChatRequest) -> Result<StreamedTurn, ProviderError> {
        let mut rx = self.provider.stream(request).await?;

        let mut messages: Vec<Message> = Vec::new();
        let mut text = String::new();
        let mut pending_calls: Vec<MessageToolCall> = Vec::new();
        let mut usage: Option<(Usage, String)> = None;

        while let Some(item) = rx.recv().await {
            match item? {
                StreamEvent::Text { delta } => {
                    self.console.stream_text(&delta);
                    text.push_str(&delta);
                }
                StreamEvent::ToolCallRequest { id, name, arguments } => {
                    self.console.tool_call(&name, &preview(&arguments.to_string()));
                    pending_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: arguments.to_string(),
                    });
                }
                StreamEvent::ToolCallResult {
                    id,
                    name,
                    output,
                    success,
                } => {
                    self.console.tool_result(&name, success, &preview(&output));
                    // The first result after a batch of requests closes the
                    // assistant message carrying those requests.
                    if !pending_calls.is_empty() {
                        messages.push(Message::assistant_with_calls(
                            std::mem::take(&mut text),
                            std::mem::take(&mut pending_calls),
                        ));
                    }
                    messages.push(Message::tool_result(id, output));
                }
                StreamEvent::UsageMetadata { usage: u, model } => {
                    usage = Some((u, model));
                }
                StreamEvent::Done => break,
            }
        }

        self.console.turn_ended();

        // Trailing assistant content.
        if !pending_calls.is_empty() {
            messages.push(Message::assistant_with_calls(text, pending_calls));
        } else if !text.is_empty() {
            messages.push(Message::assistant(text));
        }

        Ok(StreamedTurn { messages, usage })
    }

    /// Commit a successful turn: history, ledger, snapshot.
    fn commit_turn(&mut self, turn: StreamedTurn) {
        for message in turn.messages {
            self.conversation.push(message);
        }

        if let Some((usage, model)) = turn.usage {
            let record = self.ledger.record(
                usage.input_tokens,
                usage.output_tokens,
                usage.cached_tokens,
                &model,
                self.conversation.estimated_tokens() as u32,
                self.options.max_context_tokens,
            );
            if let Some(alert) = ContextAlert::for_utilization(record.utilization()) {
                self.console.context_alert(alert, record.utilization());
            }
        } else {
            debug!("Stream completed without usage metadata");
        }

        // Persistence failures never fail the turn.
        if let Err(e) = self.store.save(&self.conversation, SnapshotTag::Conversation) {
            warn!(error = %e, "Conversation snapshot failed");
            self.console.warn(&format!("could not save conversation: {e}"));
        }
    }

    /// Write the end-of-session report. Called exactly once, on the way out.
    pub fn finish(&self) {
        let path = self.store.report_path();
        match self.ledger.save_report(&path) {
            Ok(()) => self
                .console
                .status(&format!("session report written to {}", path.display())),
            Err(e) => warn!(error = %e, "Session report not written"),
        }
    }
}

/// Single-line preview of tool arguments/output for progress lines.
fn preview(s: &str) -> String {
    const MAX: usize = 120;
    let one_line = s.replace('\n', " ");
    if one_line.chars().count() <= MAX {
        one_line
    } else {
        let truncated: String = one_line.chars().take(MAX).collect();
        format!("{truncated}…")
    }
}
