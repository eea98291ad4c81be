//! Batch driver for `fixer run`: one issue at a time, with a cooldown in between.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::agent::AgentLoop;
use crate::core::types::{FixOutcome, Issue};
use crate::io::engine::Engine;
use crate::io::sleep::Sleeper;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReport {
    pub issue: Issue,
    pub outcome: FixOutcome,
}

/// Summary of a batch invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub reports: Vec<IssueReport>,
    /// The batch stopped early because of an interrupt.
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Keep only the requested issue numbers, in the order requested.
///
/// An empty `wanted` keeps everything. Unknown numbers are an error so a typo does
/// not silently turn into a no-op run.
pub fn select_issues(open: Vec<Issue>, wanted: &[u64]) -> Result<Vec<Issue>> {
    if wanted.is_empty() {
        return Ok(open);
    }
    let mut selected = Vec::with_capacity(wanted.len());
    for number in wanted {
        let issue = open
            .iter()
            .find(|issue| issue.number == *number)
            .ok_or_else(|| anyhow!("issue #{number} is not an open issue"))?;
        selected.push(issue.clone());
    }
    Ok(selected)
}

/// Run every issue through `agent`. Per-issue failures never stop the batch; an
/// interrupt does, before the next issue starts.
#[instrument(skip_all, fields(issues = issues.len()))]
pub fn run_batch<E, S, F>(
    agent: &AgentLoop<E, S>,
    issues: &[Issue],
    cooldown: Duration,
    mut on_issue: F,
) -> BatchOutcome
where
    E: Engine,
    S: Sleeper,
    F: FnMut(&Issue, &FixOutcome),
{
    let mut outcome = BatchOutcome::default();
    for (idx, issue) in issues.iter().enumerate() {
        if idx > 0 && !cooldown.is_zero() && !agent.sleeper().interrupted() {
            info!(secs = cooldown.as_secs(), "cooling down before next issue");
            agent.sleeper().sleep(cooldown);
        }
        if agent.sleeper().interrupted() {
            warn!(skipped = issues.len() - idx, "interrupted, stopping batch");
            outcome.interrupted = true;
            break;
        }
        info!(issue = issue.number, title = %issue.title, "processing issue");
        let result = agent.fix_issue(issue);
        match &result {
            FixOutcome::Pushed { compare_url, .. } => {
                info!(issue = issue.number, compare_url = %compare_url, "issue fixed");
            }
            FixOutcome::Failed { error } => {
                warn!(issue = issue.number, error = %error, "issue failed");
            }
        }
        on_issue(issue, &result);
        outcome.reports.push(IssueReport {
            issue: issue.clone(),
            outcome: result,
        });
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backoff::BackoffPolicy;
    use crate::core::budget::TokenBudget;
    use crate::io::budget::TokenBudgetGuard;
    use crate::io::config::{AgentConfig, ToolsConfig};
    use crate::agent::INTERRUPTED;
    use crate::io::engine::EngineCallError;
    use crate::io::sleep::InterruptFlag;
    use crate::io::transport::RateLimitedTransport;
    use crate::test_support::{RecordingSleeper, ScriptedEngine, TestRemote, text_turn, tool_turn};
    use serde_json::json;

    #[test]
    fn select_keeps_requested_order() {
        let open = vec![Issue::new(1, "a", ""), Issue::new(2, "b", ""), Issue::new(3, "c", "")];
        let picked = select_issues(open.clone(), &[3, 1]).expect("select");
        let numbers: Vec<u64> = picked.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![3, 1]);
        assert_eq!(select_issues(open.clone(), &[]).expect("all").len(), 3);
        assert!(select_issues(open, &[4]).is_err());
    }

    #[test]
    fn failure_does_not_stop_batch_and_cooldown_is_between_issues() {
        let remote = TestRemote::new().expect("remote");
        let engine = ScriptedEngine::new();
        // Issue 1: fatal engine error.
        engine.push_error(EngineCallError::Status {
            status: 500,
            message: "overloaded".to_string(),
        });
        // Issue 2: one edit, then done.
        engine.push_turn(tool_turn(
            "tu_1",
            "edit_file",
            json!({"file_path": "calc.py", "old_str": "a - b", "new_str": "a + b"}),
        ));
        engine.push_turn(text_turn("done"));
        let sleeper = RecordingSleeper::default();
        let agent = AgentLoop::new(
            remote.workspace(),
            RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default()),
            TokenBudgetGuard::new(TokenBudget::default()),
            &ToolsConfig::default(),
            &AgentConfig::default(),
            "sys",
        )
        .expect("agent");

        let issues = vec![Issue::new(1, "first", ""), Issue::new(2, "second", "")];
        let mut seen = Vec::new();
        let outcome = run_batch(&agent, &issues, Duration::from_secs(20), |issue, result| {
            seen.push((issue.number, result.is_success()));
        });

        assert_eq!(seen, vec![(1, false), (2, true)]);
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(20)]);
        assert!(remote.has_branch("fix-issue-2"));
        assert!(!remote.has_branch("fix-issue-1"));
    }

    #[test]
    fn interrupt_stops_before_next_issue() {
        let remote = TestRemote::new().expect("remote");
        let engine = ScriptedEngine::new();
        engine.push_turn(tool_turn(
            "tu_1",
            "edit_file",
            json!({"file_path": "calc.py", "old_str": "a - b", "new_str": "a + b"}),
        ));
        engine.push_turn(text_turn("done"));
        let flag = InterruptFlag::new();
        engine.interrupt_after(1, flag.clone());
        let sleeper = RecordingSleeper::with_interrupt(flag);
        let agent = AgentLoop::new(
            remote.workspace(),
            RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default()),
            TokenBudgetGuard::new(TokenBudget::default()),
            &ToolsConfig::default(),
            &AgentConfig::default(),
            "sys",
        )
        .expect("agent");

        let issues = vec![Issue::new(1, "first", ""), Issue::new(2, "second", "")];
        let outcome = run_batch(&agent, &issues, Duration::from_secs(20), |_, _| {});

        assert!(outcome.interrupted);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(
            outcome.reports[0].outcome,
            FixOutcome::Failed {
                error: INTERRUPTED.to_string()
            }
        );
        assert!(sleeper.slept().is_empty());
        assert_eq!(engine.requests().len(), 1);
        assert!(!remote.has_branch("fix-issue-1"));
        assert!(!remote.has_branch("fix-issue-2"));
    }
}
