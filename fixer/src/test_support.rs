//! Test-only doubles: a scripted engine, a recording sleeper and a throwaway
//! git remote with a seeded `main` branch.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use serde_json::Value;
use tempfile::TempDir;

use crate::core::conversation::{AssistantBlock, AssistantTurn, ToolCall, Turn};
use crate::io::config::RepositoryConfig;
use crate::io::engine::{Engine, EngineCallError, EngineRequest};
use crate::io::git::CommitAuthor;
use crate::io::sleep::{InterruptFlag, Sleeper};
use crate::io::workspace::RepositoryWorkspace;

/// Assistant turn with a single text block.
pub fn text_turn(text: &str) -> AssistantTurn {
    AssistantTurn::new(vec![AssistantBlock::Text {
        text: text.to_string(),
    }])
}

/// Assistant turn with a single tool call.
pub fn tool_turn(call_id: &str, name: &str, arguments: Value) -> AssistantTurn {
    AssistantTurn::new(vec![AssistantBlock::ToolCall(ToolCall {
        call_id: call_id.to_string(),
        name: name.to_string(),
        arguments,
    })])
}

/// Engine that replays queued responses and records every completion request.
///
/// An exhausted completion script answers with HTTP 400 so a test that sends
/// more requests than planned fails fast instead of spinning. Token counts
/// default to zero once their queue is empty.
#[derive(Default)]
pub struct ScriptedEngine {
    completions: RefCell<VecDeque<Result<AssistantTurn, EngineCallError>>>,
    token_counts: RefCell<VecDeque<Result<u64, EngineCallError>>>,
    requests: RefCell<Vec<Vec<Turn>>>,
    interrupt_after: RefCell<Option<(usize, InterruptFlag)>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&self, turn: AssistantTurn) {
        self.completions.borrow_mut().push_back(Ok(turn));
    }

    pub fn push_error(&self, err: EngineCallError) {
        self.completions.borrow_mut().push_back(Err(err));
    }

    pub fn push_token_count(&self, count: Result<u64, EngineCallError>) {
        self.token_counts.borrow_mut().push_back(count);
    }

    /// Raise `flag` while answering the `completions`-th completion request.
    pub fn interrupt_after(&self, completions: usize, flag: InterruptFlag) {
        *self.interrupt_after.borrow_mut() = Some((completions, flag));
    }

    /// Completion responses not consumed yet.
    pub fn remaining(&self) -> usize {
        self.completions.borrow().len()
    }

    /// Turn history of every completion request, in order.
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.borrow().clone()
    }
}

impl Engine for ScriptedEngine {
    fn complete(&self, request: &EngineRequest<'_>) -> Result<AssistantTurn, EngineCallError> {
        self.requests.borrow_mut().push(request.turns.to_vec());
        if let Some((after, flag)) = &*self.interrupt_after.borrow()
            && self.requests.borrow().len() == *after
        {
            flag.raise();
        }
        self.completions
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(EngineCallError::Status {
                    status: 400,
                    message: "scripted engine exhausted".to_string(),
                })
            })
    }

    fn count_tokens(&self, _request: &EngineRequest<'_>) -> Result<u64, EngineCallError> {
        self.token_counts.borrow_mut().pop_front().unwrap_or(Ok(0))
    }
}

/// Sleeper that returns immediately and remembers what it was asked to wait.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
    interrupt: InterruptFlag,
}

impl RecordingSleeper {
    /// A sleeper that reports `flag` through [`Sleeper::interrupted`].
    pub fn with_interrupt(flag: InterruptFlag) -> Self {
        Self {
            slept: RefCell::default(),
            interrupt: flag,
        }
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }
}

/// A bare repository standing in for the hosting platform, seeded with `main`.
pub struct TestRemote {
    temp: TempDir,
    remote: PathBuf,
    clones: Cell<u32>,
}

impl TestRemote {
    pub const SEED_CALC: &'static str = "def add(a, b):\n    return a - b\n";

    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let seed = temp.path().join("seed");
        fs::create_dir_all(&seed).context("create seed dir")?;
        git(&seed, &["init", "--quiet", "--initial-branch=main"])?;
        fs::write(seed.join("calc.py"), Self::SEED_CALC).context("write calc.py")?;
        fs::write(seed.join("README.md"), "# calc\n").context("write README.md")?;
        commit_all(&seed, "seed")?;

        let remote = temp.path().join("remote.git");
        git(
            temp.path(),
            &[
                "clone",
                "--quiet",
                "--bare",
                &seed.to_string_lossy(),
                &remote.to_string_lossy(),
            ],
        )?;
        Ok(Self {
            temp,
            remote,
            clones: Cell::new(0),
        })
    }

    /// Scratch directory owning the remote and every clone.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// The remote's location, usable as a clone URL.
    pub fn url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Repository settings pointing at this remote with a not-yet-cloned workdir.
    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            url: self.url(),
            local_path: self.temp.path().join("workspace"),
            ..RepositoryConfig::default()
        }
    }

    pub fn workspace(&self) -> RepositoryWorkspace {
        RepositoryWorkspace::new(
            &self.repository_config(),
            CommitAuthor {
                name: "tester".to_string(),
                email: "tester@example.com".to_string(),
            },
            SecretString::from(self.url()),
        )
    }

    /// A fresh independent clone, for tests that only need a working tree.
    pub fn clone_workdir(&self) -> Result<PathBuf> {
        let n = self.clones.get() + 1;
        self.clones.set(n);
        let dest = self.temp.path().join(format!("clone-{n}"));
        git(
            self.temp.path(),
            &["clone", "--quiet", &self.url(), &dest.to_string_lossy()],
        )?;
        Ok(dest)
    }

    /// Stage and commit everything in `workdir`.
    pub fn commit_in(&self, workdir: &Path, message: &str) -> Result<()> {
        commit_all(workdir, message)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        git(
            &self.remote,
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
        .is_ok()
    }

    /// Commit subjects on `branch` in the remote, newest first.
    pub fn subjects(&self, branch: &str) -> Result<Vec<String>> {
        let out = git(&self.remote, &["log", "--format=%s", branch])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Contents of `path` at the tip of `branch` in the remote.
    pub fn show(&self, branch: &str, path: &str) -> Result<String> {
        git(&self.remote, &["show", &format!("{branch}:{path}")])
    }

    /// Make every subsequent push to the remote fail.
    #[cfg(unix)]
    pub fn reject_pushes(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let hook = self.remote.join("hooks").join("pre-receive");
        fs::create_dir_all(self.remote.join("hooks")).context("create hooks dir")?;
        fs::write(&hook, "#!/bin/sh\necho 'pushes are disabled' >&2\nexit 1\n")
            .context("write pre-receive hook")?;
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))
            .context("chmod pre-receive hook")?;
        Ok(())
    }
}

fn commit_all(workdir: &Path, message: &str) -> Result<()> {
    git(workdir, &["add", "--all"])?;
    git(
        workdir,
        &[
            "-c",
            "user.name=tester",
            "-c",
            "user.email=tester@example.com",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "-m",
            message,
        ],
    )?;
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
