//! Types for test run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::{CheckpointResult, CheckpointStatus};

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

impl Outcome {
    /// Process exit code for a runner reporting this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Pass => 0,
            Outcome::Fail => 1,
            Outcome::Error => 2,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Result of a complete test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub app_name: String,

    pub test_name: String,

    /// Aggregated outcome
    pub overall: Outcome,

    /// Per-checkpoint results, in the order the checkpoints were requested
    pub results: Vec<CheckpointResult>,

    /// The failure that aborted the run, if any
    pub error: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
}

impl Verdict {
    /// Aggregate checkpoint results into an outcome.
    ///
    /// ERROR if the run aborted or any result is ERROR, else FAIL if any result
    /// is MISMATCH (or NEW while new baselines are not accepted), else PASS.
    pub fn summarize(results: &[CheckpointResult], aborted: bool, accept_new: bool) -> Outcome {
        let any = |status: CheckpointStatus| results.iter().any(|r| r.status == status);

        if aborted || any(CheckpointStatus::Error) {
            Outcome::Error
        } else if any(CheckpointStatus::Mismatch) || (!accept_new && any(CheckpointStatus::New)) {
            Outcome::Fail
        } else {
            Outcome::Pass
        }
    }

    pub fn is_pass(&self) -> bool {
        self.overall == Outcome::Pass
    }

    /// Run duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Write `verdict` as pretty JSON under `dir`, returning the file path
pub fn write_report(dir: &Path, verdict: &Verdict) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let filename = format!(
        "{}_{}_{}.json",
        sanitize_name(&verdict.app_name),
        sanitize_name(&verdict.test_name),
        verdict.started_at.format("%Y%m%d_%H%M%S_%3f")
    );
    let path = dir.join(filename);
    fs::write(&path, serde_json::to_string_pretty(verdict)?)?;

    Ok(path)
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
