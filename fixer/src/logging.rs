//! Tracing setup for the fixer binary.
//!
//! Diagnostics go to stderr so that stdout stays reserved for command output
//! (outcome lines, issue listings, chat replies). Conversation transcripts are a
//! separate product artifact (see `io::transcript`) and do not depend on
//! `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,fixer=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn,fixer=info`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=fixer=debug fixer run --issue 7
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
