//! Autonomous issue fixer.
//!
//! Fetches open issues, lets a tool-calling reasoning engine fix each one in a
//! local clone, and pushes one `fix-issue-<n>` branch per successful issue.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fixer::agent::AgentLoop;
use fixer::batch::{run_batch, select_issues};
use fixer::chat::{ChatOptions, run_chat};
use fixer::core::types::{FixOutcome, Issue};
use fixer::exit_codes;
use fixer::io::budget::TokenBudgetGuard;
use fixer::io::config::{
    Credentials, DEFAULT_CONFIG_PATH, FixerConfig, load_config, write_config,
};
use fixer::io::engine::AnthropicEngine;
use fixer::io::git::authenticated_url;
use fixer::io::issues::{GithubIssues, IssueSource};
use fixer::io::sleep::{InterruptFlag, ThreadSleeper};
use fixer::io::tools::ToolRegistry;
use fixer::io::transport::RateLimitedTransport;
use fixer::io::workspace::RepositoryWorkspace;
use fixer::logging;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "fixer",
    version,
    about = "Fix open issues with a tool-calling reasoning engine"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the open issues of the configured repository.
    Issues,
    /// Fix open issues one at a time and push a branch for each success.
    Run {
        /// Only process these issue numbers (repeatable). Defaults to every open issue.
        #[arg(long = "issue", value_name = "N")]
        issues: Vec<u64>,
    },
    /// Talk to the engine interactively, with tools rooted at a directory.
    Chat {
        /// Directory the tools operate on (defaults to the current directory).
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Issues => cmd_issues(&cli.config),
        Command::Run { issues } => cmd_run(&cli.config, &issues),
        Command::Chat { root } => cmd_chat(&cli.config, root),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &FixerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn load(path: &Path) -> Result<FixerConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

fn open_issues(cfg: &FixerConfig, creds: &Credentials) -> Result<Vec<Issue>> {
    let (owner, name) = cfg.repository.slug()?;
    let source = GithubIssues::new(&creds.github_token)?;
    source
        .list_open_issues(&owner, &name)
        .with_context(|| format!("list open issues of {owner}/{name}"))
}

fn cmd_issues(config: &Path) -> Result<i32> {
    let cfg = load(config)?;
    let creds = Credentials::from_env()?;
    for issue in open_issues(&cfg, &creds)? {
        println!("#{} {}", issue.number, issue.title);
    }
    Ok(exit_codes::OK)
}

fn cmd_run(config: &Path, wanted: &[u64]) -> Result<i32> {
    let cfg = load(config)?;
    if cfg.repository.url.trim().is_empty() {
        bail!("repository.url is not set (config file or GITHUB_REPO_URL)");
    }
    let creds = Credentials::from_env()?;
    let issues = select_issues(open_issues(&cfg, &creds)?, wanted)?;
    if issues.is_empty() {
        println!("no open issues");
        return Ok(exit_codes::OK);
    }
    info!(count = issues.len(), "issues selected");

    let interrupt = InterruptFlag::new();
    install_interrupt_handler(interrupt.clone())?;
    let engine = AnthropicEngine::new(&cfg.engine, creds.engine_api_key.clone())?;
    let transport = RateLimitedTransport::new(
        engine,
        ThreadSleeper::new(interrupt),
        cfg.retry.policy(),
    );
    let clone_url = authenticated_url(
        &cfg.repository.url,
        &creds.github_username,
        creds.github_token.expose_secret(),
    );
    let workspace = RepositoryWorkspace::new(
        &cfg.repository,
        cfg.git.author(),
        SecretString::from(clone_url),
    );
    let agent = AgentLoop::new(
        workspace,
        transport,
        TokenBudgetGuard::new(cfg.budget.token_budget()),
        &cfg.tools,
        &cfg.agent,
        cfg.engine.system_prompt.clone(),
    )?;

    let cooldown = Duration::from_secs(cfg.agent.issue_cooldown_secs);
    let outcome = run_batch(&agent, &issues, cooldown, print_outcome);
    println!(
        "{} fixed, {} failed",
        outcome.succeeded(),
        outcome.failed()
    );
    if outcome.interrupted {
        warn!("run interrupted");
        return Ok(exit_codes::INTERRUPTED);
    }
    Ok(if outcome.failed() == 0 {
        exit_codes::OK
    } else {
        exit_codes::PARTIAL
    })
}

/// First Ctrl-C asks the batch to roll back and stop; a second one exits at once.
fn install_interrupt_handler(flag: InterruptFlag) -> Result<()> {
    ctrlc::set_handler(move || {
        if flag.is_raised() {
            std::process::exit(exit_codes::INTERRUPTED);
        }
        eprintln!("interrupt received, rolling back the current issue (Ctrl-C again to abort)");
        flag.raise();
    })
    .context("install Ctrl-C handler")
}

fn print_outcome(issue: &Issue, outcome: &FixOutcome) {
    match outcome {
        FixOutcome::Pushed {
            branch,
            compare_url,
        } => println!("#{} pushed {branch}: {compare_url}", issue.number),
        FixOutcome::Failed { error } => println!("#{} failed: {error}", issue.number),
    }
}

fn cmd_chat(config: &Path, root: Option<PathBuf>) -> Result<i32> {
    let cfg = load(config)?;
    let creds = Credentials::from_env()?;
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let registry = ToolRegistry::new(&root, cfg.tools.clone())?;
    let engine = AnthropicEngine::new(&cfg.engine, creds.engine_api_key.clone())?;
    let transport = RateLimitedTransport::new(engine, ThreadSleeper::default(), cfg.retry.policy());

    let stdin = io::stdin();
    run_chat(
        &transport,
        TokenBudgetGuard::new(cfg.budget.token_budget()),
        &registry,
        &ChatOptions {
            system_prompt: &cfg.engine.system_prompt,
            max_turns: cfg.agent.max_turns,
        },
        stdin.lock(),
        io::stdout().lock(),
    )?;
    Ok(exit_codes::OK)
}
