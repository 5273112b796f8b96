// Core types for the visual checkpoint protocol

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::harness::types::TestIdentity;
use crate::session::SessionHandle;

/// Status of one checkpoint as reported by the visual backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// Matches the baseline
    Match,
    /// Differs from the baseline
    Mismatch,
    /// No baseline existed; this capture becomes the baseline
    New,
    /// The checkpoint could not be evaluated
    Error,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckpointStatus::Match => "MATCH",
            CheckpointStatus::Mismatch => "MISMATCH",
            CheckpointStatus::New => "NEW",
            CheckpointStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Outcome of one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResult {
    /// Checkpoint label
    pub label: String,

    /// Final (or provisional, before close) status
    pub status: CheckpointStatus,

    /// Why the checkpoint errored, for ERROR results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckpointResult {
    pub fn new(label: impl Into<String>, status: CheckpointStatus) -> Self {
        Self {
            label: label.into(),
            status,
            detail: None,
        }
    }

    /// An ERROR result carrying the reason
    pub fn error(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: CheckpointStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

/// One checkpoint to capture, tied to the live browser it is captured from
#[derive(Debug, Clone, Copy)]
pub struct CheckpointRequest<'h> {
    pub label: &'h str,
    pub session: &'h SessionHandle,
}

/// Captured image submitted to the backend for one checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointUpload {
    pub label: String,

    /// PNG-encoded image data
    pub image: Vec<u8>,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,
}

/// Backend-assigned identifier of an open checkpoint session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendSessionId(pub String);

impl std::fmt::Display for BackendSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a checkpoint session runs, sent along when it opens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub host: String,
    pub started_at: DateTime<Utc>,
}

impl Environment {
    /// Describe the current host
    pub fn current() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            host,
            started_at: Utc::now(),
        }
    }
}

/// Backend acknowledgement of one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Backend step number, unique within the session
    pub step: u32,

    #[serde(default)]
    pub label: String,

    pub status: CheckpointStatus,
}

/// Backend view of a closing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReport {
    /// False while some steps are still being compared
    pub complete: bool,

    #[serde(default)]
    pub steps: Vec<StepReport>,
}

/// Result type for checkpoint client operations
pub type ClientResult<T> = Result<T, CheckpointError>;

/// Error types for checkpoint client operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend could not be reached or failed internally
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A call did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The backend answered with something unexpected
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The checkpoint image could not be captured from the browser
    #[error("Capture failed: {0}")]
    Capture(String),
}

/// A visual-diff service speaking the open/check/close protocol.
///
/// `check` may answer with a provisional status; `close` and `poll` report
/// `complete: true` once every step has its final status.
#[async_trait]
pub trait VisualBackend: Send + Sync {
    /// Open a checkpoint session for a test
    async fn open(
        &self,
        identity: &TestIdentity,
        environment: &Environment,
    ) -> ClientResult<BackendSessionId>;

    /// Submit one checkpoint image
    async fn check(
        &self,
        session: &BackendSessionId,
        upload: &CheckpointUpload,
    ) -> ClientResult<StepReport>;

    /// Ask the backend to finalize and close the session
    async fn close(&self, session: &BackendSessionId) -> ClientResult<CloseReport>;

    /// Fetch the current state of a closing session
    async fn poll(&self, session: &BackendSessionId) -> ClientResult<CloseReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&CheckpointStatus::Mismatch).unwrap(), "\"mismatch\"");
        let status: CheckpointStatus = serde_json::from_str("\"new\"").unwrap();
        assert_eq!(status, CheckpointStatus::New);
        assert_eq!(CheckpointStatus::Match.to_string(), "MATCH");
    }

    #[test]
    fn test_close_report_without_steps() {
        let report: CloseReport = serde_json::from_str(r#"{"complete": false}"#).unwrap();
        assert!(!report.complete);
        assert!(report.steps.is_empty());
    }

    #[test]
    fn test_error_result_serializes_detail() {
        let result = CheckpointResult::error("Hello World", "timed out");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "timed out");

        let ok = serde_json::to_value(CheckpointResult::new("A", CheckpointStatus::Match)).unwrap();
        assert!(ok.get("detail").is_none());
    }
}
