//! Per-issue conversation transcripts (`<transcript_dir>/issue-<n>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::conversation::Turn;
use crate::core::types::{FixOutcome, Issue};

#[derive(Debug, Serialize)]
pub struct Transcript<'a> {
    pub issue: &'a Issue,
    pub outcome: &'a FixOutcome,
    pub engine_requests: u32,
    pub turns: &'a [Turn],
}

pub fn transcript_path(dir: &Path, issue_number: u64) -> PathBuf {
    dir.join(format!("issue-{issue_number}.json"))
}

/// Write (or overwrite) the transcript for one issue.
pub fn write_transcript(dir: &Path, transcript: &Transcript<'_>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create transcript dir {}", dir.display()))?;
    let path = transcript_path(dir, transcript.issue.number);
    let mut buf = serde_json::to_string_pretty(transcript).context("serialize transcript")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
