//! Autonomous issue fixer.
//!
//! For each open issue the fixer drives a tool-calling reasoning engine against a
//! local clone of the repository, then publishes the result as a branch or rolls
//! the clone back. The crate is split into:
//!
//! - **[`core`]**: Pure, deterministic logic (conversation model, tool arguments,
//!   backoff, budget decisions, snippet windows, naming). No I/O.
//! - **[`io`]**: Side-effecting adapters (git, engine and issue HTTP clients, tools,
//!   config, sleeping). Behind traits where tests need doubles.
//!
//! Orchestration modules ([`agent`], [`batch`], [`chat`], [`session`]) wire the two
//! together for the CLI commands.

pub mod agent;
pub mod batch;
pub mod chat;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
