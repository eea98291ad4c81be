//! Interactive mode for `fixer chat`: the same reasoning/tool loop, driven by a
//! human instead of an issue, with no git lifecycle around it.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::budget::TokenBudgetGuard;
use crate::io::engine::Engine;
use crate::io::sleep::Sleeper;
use crate::io::tools::ToolRegistry;
use crate::io::transport::RateLimitedTransport;
use crate::session::ConversationEngine;

pub struct ChatOptions<'a> {
    pub system_prompt: &'a str,
    /// Engine requests allowed for one user line.
    pub max_turns: u32,
}

/// Read user lines from `input` until EOF, answering each one on `output`.
///
/// The conversation persists across lines. Returns the number of lines answered.
#[instrument(skip_all)]
pub fn run_chat<E, S, R, W>(
    transport: &RateLimitedTransport<E, S>,
    guard: TokenBudgetGuard,
    registry: &ToolRegistry,
    options: &ChatOptions<'_>,
    input: R,
    mut output: W,
) -> Result<usize>
where
    E: Engine,
    S: Sleeper,
    R: BufRead,
    W: Write,
{
    let mut session =
        ConversationEngine::new(transport, guard, registry.schemas(), options.system_prompt);
    writeln!(output, "Chat with the engine (Ctrl+D to exit)")?;

    let mut answered = 0;
    let mut lines = input.lines();
    loop {
        write!(output, "\nYou: ")?;
        output.flush()?;
        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };
        let line = line.context("read input")?;
        if line.trim().is_empty() {
            continue;
        }
        session.push_user(line);

        let started = session.requests();
        loop {
            if session.requests() - started >= options.max_turns {
                return Err(anyhow!(
                    "no final answer after {} engine requests",
                    options.max_turns
                ));
            }
            let turn = session.send()?;
            let calls = turn.tool_calls();
            if calls.is_empty() {
                writeln!(output, "\nAssistant: {}", turn.text().trim())?;
                break;
            }
            for call in calls {
                debug!(tool = %call.name, "chat tool call");
                writeln!(output, "[tool] {}", call.name)?;
            }
            session.answer_tool_calls(&turn, registry)?;
        }
        answered += 1;
    }
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backoff::BackoffPolicy;
    use crate::core::budget::TokenBudget;
    use crate::io::config::ToolsConfig;
    use crate::test_support::{RecordingSleeper, ScriptedEngine, text_turn, tool_turn};
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn answers_each_line_and_keeps_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("notes.txt"), "remember me").expect("write");
        let registry = ToolRegistry::new(temp.path(), ToolsConfig::default()).expect("registry");

        let engine = ScriptedEngine::new();
        engine.push_turn(tool_turn("tu_1", "read_file", json!({"file_path": "notes.txt"})));
        engine.push_turn(text_turn("It says: remember me"));
        engine.push_turn(text_turn("You asked about notes.txt"));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        let mut out = Vec::new();
        let answered = run_chat(
            &transport,
            TokenBudgetGuard::new(TokenBudget::default()),
            &registry,
            &ChatOptions {
                system_prompt: "",
                max_turns: 5,
            },
            Cursor::new("what is in notes.txt?\n\nwhat did I ask?\n"),
            &mut out,
        )
        .expect("chat");

        assert_eq!(answered, 2);
        let printed = String::from_utf8(out).expect("utf8");
        assert!(printed.contains("[tool] read_file"));
        assert!(printed.contains("Assistant: It says: remember me"));
        assert!(printed.contains("Assistant: You asked about notes.txt"));
        // user, assistant, results, assistant, user
        assert_eq!(engine.requests()[2].len(), 5);
    }

    #[test]
    fn runaway_tool_loop_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = ToolRegistry::new(temp.path(), ToolsConfig::default()).expect("registry");
        let engine = ScriptedEngine::new();
        engine.push_turn(tool_turn("tu_1", "list_files", json!({})));
        engine.push_turn(tool_turn("tu_2", "list_files", json!({})));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        let err = run_chat(
            &transport,
            TokenBudgetGuard::new(TokenBudget::default()),
            &registry,
            &ChatOptions {
                system_prompt: "",
                max_turns: 2,
            },
            Cursor::new("list\n"),
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no final answer"));
    }
}
