//! Fixer configuration: `fixer.toml` plus credentials from the environment.
//!
//! The configuration is loaded once at startup and passed by reference into the
//! workspace, the transport and the agent loop. Nothing else reads the process
//! environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffPolicy;
use crate::core::budget::TokenBudget;
use crate::core::naming::owner_and_repo;
use crate::core::snippet::SnippetLimits;
use crate::io::git::CommitAuthor;

pub const DEFAULT_CONFIG_PATH: &str = "fixer.toml";

/// Fixer configuration (TOML).
///
/// Missing fields fall back to the defaults below, so an empty file is valid
/// apart from the repository URL, which may also come from `GITHUB_REPO_URL`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FixerConfig {
    pub repository: RepositoryConfig,
    pub engine: EngineConfig,
    pub budget: BudgetConfig,
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Web URL of the repository (`https://github.com/<owner>/<repo>`).
    pub url: String,
    /// Tracker owner; derived from `url` when empty.
    pub owner: String,
    /// Tracker repository name; derived from `url` when empty.
    pub name: String,
    /// Where the working clone lives.
    pub local_path: PathBuf,
    pub base_branch: String,
    pub remote: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            owner: String::new(),
            name: String::new(),
            local_path: PathBuf::from("cloned_repo"),
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
        }
    }
}

impl RepositoryConfig {
    /// `(owner, name)` for the issue tracker.
    pub fn slug(&self) -> Result<(String, String)> {
        if !self.owner.is_empty() && !self.name.is_empty() {
            return Ok((self.owner.clone(), self.name.clone()));
        }
        owner_and_repo(&self.url).ok_or_else(|| {
            anyhow!(
                "cannot derive owner/repo from '{}' (set repository.owner and repository.name)",
                self.url
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// System preamble sent with every request and counted by the budget guard.
    pub system_prompt: String,
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1024,
            system_prompt: "You are a careful software engineer fixing issues in a git repository."
                .to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Conversation size (tokens) above which the guard pauses before sending.
    pub token_ceiling: u64,
    pub cooldown_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let budget = TokenBudget::default();
        Self {
            token_ceiling: budget.ceiling,
            cooldown_secs: budget.cooldown.as_secs(),
        }
    }
}

impl BudgetConfig {
    pub fn token_budget(&self) -> TokenBudget {
        TokenBudget {
            ceiling: self.token_ceiling,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(self.initial_delay_secs),
            max: Duration::from_secs(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Engine requests allowed per issue before giving up.
    pub max_turns: u32,
    /// Pause between two issues of a batch.
    pub issue_cooldown_secs: u64,
    /// When set, one JSON transcript per issue is written here.
    pub transcript_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 40,
            issue_cooldown_secs: 20,
            transcript_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub search_timeout_ms: u64,
    pub search_max_results: usize,
    pub snippet_max_lines: usize,
    pub snippet_context: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let limits = SnippetLimits::default();
        Self {
            search_timeout_ms: 5_000,
            search_max_results: 5,
            snippet_max_lines: limits.max_lines,
            snippet_context: limits.context,
        }
    }
}

impl ToolsConfig {
    pub fn snippet_limits(&self) -> SnippetLimits {
        SnippetLimits {
            context: self.snippet_context,
            max_lines: self.snippet_max_lines,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub author_name: String,
    pub author_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: "issue-fixer".to_string(),
            author_email: "issue-fixer@users.noreply.github.com".to_string(),
        }
    }
}

impl GitConfig {
    pub fn author(&self) -> CommitAuthor {
        CommitAuthor {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }
}

impl FixerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repository.base_branch.trim().is_empty() {
            return Err(anyhow!("repository.base_branch must not be empty"));
        }
        if self.repository.remote.trim().is_empty() {
            return Err(anyhow!("repository.remote must not be empty"));
        }
        if self.engine.model.trim().is_empty() {
            return Err(anyhow!("engine.model must not be empty"));
        }
        if self.engine.max_tokens == 0 {
            return Err(anyhow!("engine.max_tokens must be > 0"));
        }
        if self.engine.request_timeout_secs == 0 {
            return Err(anyhow!("engine.request_timeout_secs must be > 0"));
        }
        if self.retry.initial_delay_secs == 0 {
            return Err(anyhow!("retry.initial_delay_secs must be > 0"));
        }
        if self.retry.max_delay_secs < self.retry.initial_delay_secs {
            return Err(anyhow!("retry.max_delay_secs must be >= initial_delay_secs"));
        }
        if self.agent.max_turns == 0 {
            return Err(anyhow!("agent.max_turns must be > 0"));
        }
        if self.tools.search_timeout_ms == 0 {
            return Err(anyhow!("tools.search_timeout_ms must be > 0"));
        }
        if self.tools.search_max_results == 0 {
            return Err(anyhow!("tools.search_max_results must be > 0"));
        }
        if self.tools.snippet_max_lines < 2 {
            return Err(anyhow!("tools.snippet_max_lines must be >= 2"));
        }
        Ok(())
    }

    /// Apply `GITHUB_REPO_URL` / `GITHUB_OWNER` / `GITHUB_REPO` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("GITHUB_REPO_URL")
            && !url.trim().is_empty()
        {
            self.repository.url = url.trim().to_string();
        }
        if let Ok(owner) = env::var("GITHUB_OWNER")
            && !owner.trim().is_empty()
        {
            self.repository.owner = owner.trim().to_string();
        }
        if let Ok(name) = env::var("GITHUB_REPO")
            && !name.trim().is_empty()
        {
            self.repository.name = name.trim().to_string();
        }
    }
}

/// Secrets read from the environment. Never serialized or logged.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub engine_api_key: SecretString,
    pub github_username: String,
    pub github_token: SecretString,
}

impl Credentials {
    /// Read `ANTHROPIC_API_KEY`, `GITHUB_USERNAME` and `GITHUB_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let engine_api_key = env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY not set")?;
        let github_token = env::var("GITHUB_TOKEN").unwrap_or_default();
        let github_username = env::var("GITHUB_USERNAME").unwrap_or_default();
        Ok(Self {
            engine_api_key: SecretString::from(engine_api_key),
            github_username,
            github_token: SecretString::from(github_token),
        })
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixerConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixerConfig> {
    if !path.exists() {
        let cfg = FixerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
