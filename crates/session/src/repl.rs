//! The interactive line loop.
//!
//! A single logical thread of control: read one line, hand it to the
//! session, repeat until the session says to exit or stdin closes. The
//! input history lives here, constructed at session start and dropped with
//! the loop.

use crate::history::InputHistory;
use crate::session::{Session, TurnOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Drive the session against stdin until exit/EOF, then write the report.
pub async fn run_repl(session: &mut Session) -> std::io::Result<()> {
    let console = session.console();
    let mut history = InputHistory::new();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    console.prompt();
    loop {
        match lines.next_line().await? {
            Some(line) => match session.handle_input(&line, &mut history).await {
                TurnOutcome::Continue => console.prompt(),
                TurnOutcome::Exit => break,
            },
            None => break, // EOF (Ctrl+D)
        }
    }

    session.finish();
    Ok(())
}
