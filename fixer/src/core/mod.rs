//! Deterministic, pure logic shared by the fixer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod budget;
pub mod conversation;
pub mod naming;
pub mod snippet;
pub mod tool_args;
pub mod types;
