//! Side-effecting adapters: git, subprocesses, HTTP clients, files and sleeping.

pub mod budget;
pub mod config;
pub mod engine;
pub mod git;
pub mod issues;
pub mod process;
pub mod prompt;
pub mod sleep;
pub mod tools;
pub mod transcript;
pub mod transport;
pub mod workspace;
