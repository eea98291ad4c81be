//! Shared deterministic types for fixer core logic.
//!
//! These types define stable contracts between the issue source, the agent loop
//! and the batch driver. They carry no I/O handles.

use serde::{Deserialize, Serialize};

/// An open issue fetched from the tracker. Immutable for one processing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl Issue {
    pub fn new(number: u64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Terminal result of processing one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FixOutcome {
    /// Changes were committed and pushed to `branch`.
    Pushed { branch: String, compare_url: String },
    /// The workspace was rolled back; `error` explains why.
    Failed { error: String },
}

impl FixOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FixOutcome::Pushed { .. })
    }
}
