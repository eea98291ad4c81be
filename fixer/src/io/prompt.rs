//! Task prompt rendering for one issue.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::budget::TokenBudget;
use crate::core::types::Issue;

const FIX_ISSUE_TEMPLATE: &str = include_str!("prompts/fix_issue.md");

#[derive(Debug, Serialize)]
struct IssueContext<'a> {
    number: u64,
    title: &'a str,
    body: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("fix_issue", FIX_ISSUE_TEMPLATE)
            .expect("fix_issue template should be valid");
        Self { env }
    }

    /// First user turn for `issue`. `used_tokens` feeds the budget hint.
    pub fn render_fix_issue(
        &self,
        issue: &Issue,
        budget: TokenBudget,
        used_tokens: u64,
    ) -> Result<String> {
        let template = self.env.get_template("fix_issue")?;
        let rendered = template.render(context! {
            issue => IssueContext {
                number: issue.number,
                title: issue.title.trim(),
                body: issue.body.trim(),
            },
            remaining_tokens => budget.remaining(used_tokens),
            ceiling => budget.ceiling,
        })?;
        debug!(bytes = rendered.len(), issue = issue.number, "rendered task prompt");
        Ok(rendered)
    }
}
