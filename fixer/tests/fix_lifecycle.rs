//! End-to-end issue lifecycle against a real git remote and a scripted engine.
//!
//! Each test clones a throwaway bare remote, lets a scripted engine drive the
//! tools, and checks what ended up on the remote and in the local clone.

use std::fs;
use std::time::Duration;

use fixer::agent::AgentLoop;
use fixer::core::backoff::BackoffPolicy;
use fixer::core::budget::TokenBudget;
use fixer::core::types::{FixOutcome, Issue};
use fixer::io::budget::TokenBudgetGuard;
use fixer::io::config::{AgentConfig, ToolsConfig};
use fixer::io::engine::EngineCallError;
use fixer::io::git::Git;
use fixer::io::transport::RateLimitedTransport;
use fixer::test_support::{RecordingSleeper, ScriptedEngine, TestRemote, text_turn, tool_turn};
use serde_json::json;

fn agent<'a>(
    remote: &TestRemote,
    engine: &'a ScriptedEngine,
    sleeper: &'a RecordingSleeper,
) -> AgentLoop<&'a ScriptedEngine, &'a RecordingSleeper> {
    AgentLoop::new(
        remote.workspace(),
        RateLimitedTransport::new(engine, sleeper, BackoffPolicy::default()),
        TokenBudgetGuard::new(TokenBudget::default()),
        &ToolsConfig::default(),
        &AgentConfig::default(),
        "You fix issues.",
    )
    .expect("agent")
}

/// Search, snippet, edit, confirm: the path a well-behaved engine takes.
fn script_fix(engine: &ScriptedEngine) {
    engine.push_turn(tool_turn(
        "tu_search",
        "find_code_patterns",
        json!({"pattern": "def add", "file_filter": "*.py"}),
    ));
    engine.push_turn(tool_turn(
        "tu_read",
        "read_code_snippet",
        json!({"file_path": "calc.py", "line_numbers": [1]}),
    ));
    engine.push_turn(tool_turn(
        "tu_edit",
        "edit_file",
        json!({"file_path": "calc.py", "old_str": "a - b", "new_str": "a + b"}),
    ));
    engine.push_turn(text_turn("Fixed add() to return the sum."));
}

#[test]
fn successful_issue_is_pushed_with_one_commit() {
    let remote = TestRemote::new().expect("remote");
    let engine = ScriptedEngine::new();
    script_fix(&engine);
    let sleeper = RecordingSleeper::default();
    let agent = agent(&remote, &engine, &sleeper);

    let outcome = agent.fix_issue(&Issue::new(7, "add() subtracts", "2 + 2 should be 4"));

    let web_url = remote.url().trim_end_matches(".git").to_string();
    let expected_url = format!("{web_url}/compare/main...fix-issue-7?expand=1");
    assert_eq!(
        outcome,
        FixOutcome::Pushed {
            branch: "fix-issue-7".to_string(),
            compare_url: expected_url,
        }
    );
    assert_eq!(
        remote.subjects("fix-issue-7").expect("log"),
        vec!["Fix #7: add() subtracts".to_string(), "seed".to_string()]
    );
    assert_eq!(
        remote.show("fix-issue-7", "calc.py").expect("show"),
        "def add(a, b):\n    return a + b\n"
    );
    assert_eq!(
        remote.show("main", "calc.py").expect("show"),
        TestRemote::SEED_CALC
    );
    assert_eq!(engine.remaining(), 0);

    // Every tool result was fed back; the search found the definition.
    let requests = engine.requests();
    let search_result = serde_json::to_value(&requests[1][2]).expect("json");
    let text = search_result["results"][0]["text"].as_str().expect("text");
    assert!(text.starts_with("calc.py:1:def add"), "{text}");
}

#[cfg(unix)]
#[test]
fn rejected_push_rolls_back_to_base() {
    let remote = TestRemote::new().expect("remote");
    remote.reject_pushes().expect("hook");
    let engine = ScriptedEngine::new();
    script_fix(&engine);
    let sleeper = RecordingSleeper::default();
    let agent = agent(&remote, &engine, &sleeper);

    let outcome = agent.fix_issue(&Issue::new(7, "add() subtracts", ""));

    let FixOutcome::Failed { error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(error.contains("push"), "{error}");
    let root = agent.workspace().root();
    let git = Git::new(root);
    assert_eq!(git.current_branch().expect("branch"), "main");
    assert!(!git.branch_exists("fix-issue-7").expect("exists"));
    assert_eq!(
        fs::read_to_string(root.join("calc.py")).expect("read"),
        TestRemote::SEED_CALC
    );
    assert!(!remote.has_branch("fix-issue-7"));
}

#[test]
fn retrying_an_issue_starts_from_a_clean_branch() {
    let remote = TestRemote::new().expect("remote");
    let engine = ScriptedEngine::new();
    // First attempt: edit, then a fatal engine error leaves nothing behind.
    engine.push_turn(tool_turn(
        "tu_1",
        "edit_file",
        json!({"file_path": "calc.py", "old_str": "a - b", "new_str": "a * b"}),
    ));
    engine.push_error(EngineCallError::Status {
        status: 401,
        message: "invalid x-api-key".to_string(),
    });
    // Second attempt succeeds.
    script_fix(&engine);
    let sleeper = RecordingSleeper::default();
    let agent = agent(&remote, &engine, &sleeper);
    let issue = Issue::new(7, "add() subtracts", "");

    assert!(!agent.fix_issue(&issue).is_success());
    let outcome = agent.fix_issue(&issue);

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(
        remote.show("fix-issue-7", "calc.py").expect("show"),
        "def add(a, b):\n    return a + b\n"
    );
    assert_eq!(remote.subjects("fix-issue-7").expect("log").len(), 2);
}

#[test]
fn throttling_and_connection_errors_are_absorbed() {
    let remote = TestRemote::new().expect("remote");
    let engine = ScriptedEngine::new();
    engine.push_error(EngineCallError::Connection("reset".to_string()));
    engine.push_error(EngineCallError::Throttled {
        retry_after: Some(Duration::from_secs(2)),
        reset_at: Some("2026-10-16T12:00:00Z".to_string()),
        message: "rate limited".to_string(),
    });
    script_fix(&engine);
    let sleeper = RecordingSleeper::default();
    let agent = agent(&remote, &engine, &sleeper);

    assert!(agent.fix_issue(&Issue::new(3, "t", "")).is_success());
    assert_eq!(
        sleeper.slept(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}
