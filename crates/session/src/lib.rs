//! The session orchestrator — the heart of Quill.
//!
//! One REPL turn flows through exactly one pass of the loop:
//!
//! 1. **Read** a user line (or intercept a control command)
//! 2. **Append** the user message and snapshot the tool catalog
//! 3. **Stream** the response, surfacing text and tool call/result pairs
//! 4. **Classify** the outcome: success, retryable rate limit, quota
//!    exhaustion, or a terminal turn failure
//! 5. **Account** the usage, **persist** a conversation snapshot, repeat
//!
//! All failure handling is self-contained: rate limits back off and retry
//! with the same history, quota exhaustion ends the session after a
//! best-effort snapshot, anything else fails only the current turn.

pub mod commands;
pub mod console;
pub mod history;
pub mod repl;
pub mod session;

pub use commands::SessionCommand;
pub use console::{Console, RecordingConsole, TerminalConsole};
pub use history::InputHistory;
pub use repl::run_repl;
pub use session::{RetryPolicy, Session, SessionOptions, TurnOutcome};
