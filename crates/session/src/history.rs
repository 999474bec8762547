//! Input history for the repeat-last command.
//!
//! An explicit object constructed by the REPL at session start and torn
//! down with it — never a process-wide static.

/// Remembers the most recent submitted user turn.
#[derive(Debug, Default)]
pub struct InputHistory {
    last: Option<String>,
}

impl InputHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submitted user turn (control commands are not recorded).
    pub fn remember(&mut self, input: &str) {
        self.last = Some(input.to_string());
    }

    /// The previous user turn, if any.
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}
