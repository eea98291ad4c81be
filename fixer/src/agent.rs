//! Per-issue agent loop.
//!
//! One issue moves through an explicit state machine:
//!
//! ```text
//! BranchSetup -> Reasoning <-> ToolExecution
//!                    |              |
//!                    v              v
//!            FinalizeSuccess   FinalizeFailure
//! ```
//!
//! Any error or panic in a state (including a failed publish) ends in
//! `FinalizeFailure`, which rolls the clone back to the base branch and deletes the
//! issue branch. So does an interrupt, noticed at the next state transition. The
//! outcome is always returned as a value; nothing escapes to the batch driver.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing::{error, info, instrument, warn};

use crate::core::conversation::AssistantTurn;
use crate::core::naming::branch_name;
use crate::core::types::{FixOutcome, Issue};
use crate::io::budget::TokenBudgetGuard;
use crate::io::config::{AgentConfig, ToolsConfig};
use crate::io::engine::Engine;
use crate::io::prompt::PromptEngine;
use crate::io::sleep::Sleeper;
use crate::io::tools::ToolRegistry;
use crate::io::transcript::{Transcript, write_transcript};
use crate::io::transport::RateLimitedTransport;
use crate::io::workspace::RepositoryWorkspace;
use crate::session::ConversationEngine;

/// Failure reason recorded when Ctrl-C abandons an issue.
pub const INTERRUPTED: &str = "interrupted";

/// Where one issue currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    BranchSetup,
    Reasoning,
    /// The assistant turn whose tool calls are pending.
    ToolExecution(AssistantTurn),
    FinalizeSuccess,
    FinalizeFailure(String),
}

impl AgentState {
    fn name(&self) -> &'static str {
        match self {
            AgentState::BranchSetup => "branch_setup",
            AgentState::Reasoning => "reasoning",
            AgentState::ToolExecution(_) => "tool_execution",
            AgentState::FinalizeSuccess => "finalize_success",
            AgentState::FinalizeFailure(_) => "finalize_failure",
        }
    }
}

pub struct AgentLoop<E, S> {
    workspace: RepositoryWorkspace,
    registry: ToolRegistry,
    transport: RateLimitedTransport<E, S>,
    guard: TokenBudgetGuard,
    prompts: PromptEngine,
    system_prompt: String,
    max_turns: u32,
    transcript_dir: Option<PathBuf>,
}

impl<E: Engine, S: Sleeper> AgentLoop<E, S> {
    pub fn new(
        workspace: RepositoryWorkspace,
        transport: RateLimitedTransport<E, S>,
        guard: TokenBudgetGuard,
        tools: &ToolsConfig,
        agent: &AgentConfig,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let registry = ToolRegistry::new(workspace.root(), tools.clone())?;
        Ok(Self {
            workspace,
            registry,
            transport,
            guard,
            prompts: PromptEngine::new(),
            system_prompt: system_prompt.into(),
            max_turns: agent.max_turns,
            transcript_dir: agent.transcript_dir.clone(),
        })
    }

    pub fn workspace(&self) -> &RepositoryWorkspace {
        &self.workspace
    }

    pub fn sleeper(&self) -> &S {
        self.transport.sleeper()
    }

    /// Process one issue to a terminal outcome.
    #[instrument(skip_all, fields(issue = issue.number))]
    pub fn fix_issue(&self, issue: &Issue) -> FixOutcome {
        let branch = branch_name(issue.number);
        let mut session = ConversationEngine::new(
            &self.transport,
            self.guard,
            self.registry.schemas(),
            &self.system_prompt,
        );

        let mut state = AgentState::BranchSetup;
        let outcome = loop {
            if self.sleeper().interrupted() && !matches!(state, AgentState::FinalizeFailure(_)) {
                warn!(state = state.name(), "interrupted, abandoning issue");
                state = AgentState::FinalizeFailure(INTERRUPTED.to_string());
            }
            info!(state = state.name(), "agent state");
            let phase = state.name();
            state = match state {
                AgentState::BranchSetup => {
                    match guarded(phase, || self.setup(issue, &mut session)) {
                        Ok(()) => AgentState::Reasoning,
                        Err(reason) => AgentState::FinalizeFailure(reason),
                    }
                }
                AgentState::Reasoning => guarded(phase, || self.reason(&mut session))
                    .unwrap_or_else(AgentState::FinalizeFailure),
                AgentState::ToolExecution(turn) => {
                    guarded(phase, || self.execute_tools(&branch, &turn, &mut session))
                        .unwrap_or_else(AgentState::FinalizeFailure)
                }
                AgentState::FinalizeSuccess => {
                    match guarded(phase, || Ok(self.workspace.commit_and_push(issue)?)) {
                        Ok(compare_url) => {
                            break FixOutcome::Pushed {
                                branch: branch.clone(),
                                compare_url,
                            };
                        }
                        Err(reason) => AgentState::FinalizeFailure(reason),
                    }
                }
                AgentState::FinalizeFailure(reason) => {
                    error!(error = %reason, "issue failed, rolling back");
                    if let Err(cleanup) = self.workspace.discard_and_delete_branch(issue) {
                        warn!(error = %cleanup, "rollback incomplete");
                    }
                    break FixOutcome::Failed { error: reason };
                }
            };
        };

        self.record(issue, &outcome, &session);
        outcome
    }

    fn setup(&self, issue: &Issue, session: &mut ConversationEngine<'_, E, S>) -> Result<()> {
        self.workspace.ensure_cloned()?;
        self.workspace.branch_for(issue)?;
        let prompt = self.prompts.render_fix_issue(issue, self.guard.budget(), 0)?;
        session.push_user(prompt);
        Ok(())
    }

    fn reason(&self, session: &mut ConversationEngine<'_, E, S>) -> Result<AgentState> {
        if session.requests() >= self.max_turns {
            return Err(anyhow!(
                "gave up after {} engine requests without a final answer",
                session.requests()
            ));
        }
        let turn = session.send()?;
        if turn.tool_calls().is_empty() {
            info!(reply = %turn.text(), "engine finished");
            return Ok(AgentState::FinalizeSuccess);
        }
        Ok(AgentState::ToolExecution(turn))
    }

    fn execute_tools(
        &self,
        branch: &str,
        turn: &AssistantTurn,
        session: &mut ConversationEngine<'_, E, S>,
    ) -> Result<AgentState> {
        let edits = turn.tool_calls().iter().any(|call| {
            self.registry
                .parse(&call.name, &call.arguments)
                .is_ok_and(|invocation| invocation.mutates_workspace())
        });
        if edits {
            self.workspace.ensure_on_issue_branch(branch)?;
        }
        let results = session.answer_tool_calls(turn, &self.registry)?;
        let failed = results.iter().filter(|r| r.is_error).count();
        info!(calls = results.len(), failed, "tool calls answered");
        Ok(AgentState::Reasoning)
    }

    fn record(&self, issue: &Issue, outcome: &FixOutcome, session: &ConversationEngine<'_, E, S>) {
        let Some(dir) = &self.transcript_dir else {
            return;
        };
        let transcript = Transcript {
            issue,
            outcome,
            engine_requests: session.requests(),
            turns: session.conversation().turns(),
        };
        match write_transcript(dir, &transcript) {
            Ok(path) => info!(path = %path.display(), "transcript written"),
            Err(err) => warn!(error = %format!("{err:#}"), "failed to write transcript"),
        }
    }
}

/// Run one state's work, turning errors and panics into a failure reason.
fn guarded<T, F>(phase: &str, step: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(format!("panic during {phase}: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
