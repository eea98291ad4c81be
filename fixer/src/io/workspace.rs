//! The on-disk clone and its per-issue branch lifecycle.
//!
//! Every issue runs on its own `fix-issue-<n>` branch rebuilt from the remote base
//! branch. Finalization either publishes that branch or discards it entirely, so a
//! failed issue never leaks edits into the next one.

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::naming::{branch_name, commit_message, compare_url};
use crate::core::types::Issue;
use crate::io::config::RepositoryConfig;
use crate::io::git::{CommitAuthor, Git};

/// A failed workspace transition. Fatal for the issue.
#[derive(Debug, Error)]
#[error("workspace {op} failed: {cause:#}")]
pub struct WorkspaceError {
    pub op: &'static str,
    pub cause: anyhow::Error,
}

impl WorkspaceError {
    fn new(op: &'static str, cause: anyhow::Error) -> Self {
        Self { op, cause }
    }
}

trait OpContext<T> {
    fn op(self, op: &'static str) -> Result<T, WorkspaceError>;
}

impl<T> OpContext<T> for anyhow::Result<T> {
    fn op(self, op: &'static str) -> Result<T, WorkspaceError> {
        self.map_err(|cause| WorkspaceError::new(op, cause))
    }
}

/// Snapshot of where the clone currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceState {
    pub repo_path: PathBuf,
    pub current_branch: String,
    pub base_branch: String,
}

impl WorkspaceState {
    pub fn on_base(&self) -> bool {
        self.current_branch == self.base_branch
    }
}

pub struct RepositoryWorkspace {
    git: Git,
    repo_url: String,
    clone_url: SecretString,
    base_branch: String,
    remote: String,
    author: CommitAuthor,
}

impl RepositoryWorkspace {
    /// `clone_url` may embed credentials and is only ever handed to `git clone`.
    pub fn new(repo: &RepositoryConfig, author: CommitAuthor, clone_url: SecretString) -> Self {
        Self {
            git: Git::new(&repo.local_path),
            repo_url: repo.url.clone(),
            clone_url,
            base_branch: repo.base_branch.clone(),
            remote: repo.remote.clone(),
            author,
        }
    }

    pub fn root(&self) -> &Path {
        self.git.workdir()
    }

    fn base_ref(&self) -> String {
        format!("{}/{}", self.remote, self.base_branch)
    }

    /// Clone the repository unless a clone is already present.
    #[instrument(skip_all, fields(path = %self.root().display()))]
    pub fn ensure_cloned(&self) -> Result<(), WorkspaceError> {
        if self.root().join(".git").exists() {
            debug!("clone already present");
            return Ok(());
        }
        info!("cloning repository");
        Git::clone_into(self.clone_url.expose_secret(), self.root()).op("clone")?;
        Ok(())
    }

    /// Check out the base branch and make it identical to the remote's.
    #[instrument(skip_all, fields(base = %self.base_branch))]
    pub fn reset_to_base(&self) -> Result<(), WorkspaceError> {
        self.git.checkout_branch(&self.base_branch).op("checkout base")?;
        self.git.fetch(&self.remote).op("fetch")?;
        self.git
            .reset_hard(Some(&self.base_ref()))
            .op("reset to base")?;
        self.git.clean_untracked().op("clean")?;
        Ok(())
    }

    /// Put the clone on a fresh issue branch built from the remote base.
    ///
    /// An existing branch from an earlier attempt is reused but reset, so nothing
    /// it carried survives.
    #[instrument(skip_all, fields(issue = issue.number))]
    pub fn branch_for(&self, issue: &Issue) -> Result<String, WorkspaceError> {
        self.reset_to_base()?;
        let branch = branch_name(issue.number);
        if self.git.branch_exists(&branch).op("inspect branches")? {
            info!(branch = %branch, "reusing existing branch");
            self.git.checkout_branch(&branch).op("checkout branch")?;
            self.git
                .reset_hard(Some(&self.base_ref()))
                .op("reset branch")?;
            self.git.clean_untracked().op("clean")?;
        } else {
            info!(branch = %branch, "creating branch");
            self.git.checkout_new_branch(&branch).op("create branch")?;
        }
        Ok(branch)
    }

    pub fn state(&self) -> Result<WorkspaceState, WorkspaceError> {
        let current_branch = self.git.current_branch().op("read branch")?;
        Ok(WorkspaceState {
            repo_path: self.root().to_path_buf(),
            current_branch,
            base_branch: self.base_branch.clone(),
        })
    }

    /// Refuse to proceed unless the clone is on `branch` and `branch` is not the base.
    pub fn ensure_on_issue_branch(&self, branch: &str) -> Result<(), WorkspaceError> {
        let state = self.state()?;
        if state.on_base() || state.current_branch != branch {
            return Err(WorkspaceError::new(
                "edit guard",
                anyhow!(
                    "expected branch '{branch}' but '{}' is checked out",
                    state.current_branch
                ),
            ));
        }
        Ok(())
    }

    /// Commit everything on the issue branch and push it. Returns the compare URL.
    #[instrument(skip_all, fields(issue = issue.number))]
    pub fn commit_and_push(&self, issue: &Issue) -> Result<String, WorkspaceError> {
        let branch = branch_name(issue.number);
        self.ensure_on_issue_branch(&branch)?;
        self.git.add_all().op("stage")?;
        if !self
            .git
            .commit_staged(&commit_message(issue), &self.author)
            .op("commit")?
        {
            return Err(WorkspaceError::new(
                "commit",
                anyhow!("no changes were made for issue #{}", issue.number),
            ));
        }
        self.git.push_branch(&self.remote, &branch).op("push")?;
        let url = compare_url(&self.repo_url, &self.base_branch, &branch);
        info!(branch = %branch, compare_url = %url, "branch published");
        Ok(url)
    }

    /// Throw away every trace of the issue: edits, untracked files and the branch.
    ///
    /// All steps are attempted even if an earlier one fails; the first failure is
    /// returned.
    #[instrument(skip_all, fields(issue = issue.number))]
    pub fn discard_and_delete_branch(&self, issue: &Issue) -> Result<(), WorkspaceError> {
        let branch = branch_name(issue.number);
        let mut first_error: Option<WorkspaceError> = None;
        let mut record = |result: Result<(), WorkspaceError>| {
            if let Err(err) = result {
                warn!(error = %err, "cleanup step failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        };

        record(self.git.reset_hard(None).op("discard changes"));
        record(self.git.clean_untracked().op("clean"));
        record(
            self.git
                .checkout_branch(&self.base_branch)
                .op("checkout base"),
        );
        match self.git.branch_exists(&branch).op("inspect branches") {
            Ok(true) => record(self.git.delete_branch(&branch).op("delete branch")),
            Ok(false) => {}
            Err(err) => record(Err(err)),
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                debug!(branch = %branch, "branch discarded");
                Ok(())
            }
        }
    }
}
