//! Stable exit codes for fixer CLI commands.

/// Command succeeded; for `run`, every issue was fixed.
pub const OK: i32 = 0;
/// Setup failed (config, credentials, clone, issue listing) or another error occurred.
pub const INVALID: i32 = 1;
/// `fixer run` finished but at least one issue failed.
pub const PARTIAL: i32 = 2;
/// `fixer run` was stopped by Ctrl-C; the current issue was rolled back.
pub const INTERRUPTED: i32 = 130;
