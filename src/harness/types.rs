use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::browser::BrowserOptions;
use crate::checkpoint::{CheckpointError, ClientSettings};
use crate::runner::Verdict;
use crate::session::SessionError;

/// Identifies one checkpoint session on the visual backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIdentity {
    app_name: String,
    test_name: String,
}

impl TestIdentity {
    /// Create an identity. Both names must be non-empty.
    pub fn new(app_name: impl Into<String>, test_name: impl Into<String>) -> HarnessResult<Self> {
        let app_name = app_name.into();
        let test_name = test_name.into();

        if app_name.trim().is_empty() {
            return Err(HarnessError::InvalidPlan("application name is empty".to_string()));
        }
        if test_name.trim().is_empty() {
            return Err(HarnessError::InvalidPlan("test name is empty".to_string()));
        }

        Ok(Self { app_name, test_name })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }
}

impl std::fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_name, self.test_name)
    }
}

/// One action of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Load a URL in the browser
    Navigate(String),

    /// Capture a named checkpoint of the current page
    Checkpoint(String),
}

impl Step {
    pub fn navigate(url: impl Into<String>) -> Self {
        Step::Navigate(url.into())
    }

    pub fn checkpoint(label: impl Into<String>) -> Self {
        Step::Checkpoint(label.into())
    }

    /// Checkpoint label, if this step is a checkpoint
    pub fn label(&self) -> Option<&str> {
        match self {
            Step::Checkpoint(label) => Some(label.as_str()),
            Step::Navigate(_) => None,
        }
    }
}

/// A validated test identity plus its ordered steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    identity: TestIdentity,
    steps: Vec<Step>,
}

/// On-disk plan format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanFile {
    app: String,
    test: String,
    steps: Vec<Step>,
}

impl RunPlan {
    /// Validate and build a plan.
    ///
    /// Requires at least one checkpoint, non-empty labels and absolute URLs.
    pub fn new(identity: TestIdentity, steps: Vec<Step>) -> HarnessResult<Self> {
        if !steps.iter().any(|step| step.label().is_some()) {
            return Err(HarnessError::InvalidPlan(
                "plan needs at least one checkpoint".to_string(),
            ));
        }

        for step in &steps {
            match step {
                Step::Checkpoint(label) if label.trim().is_empty() => {
                    return Err(HarnessError::InvalidPlan("checkpoint label is empty".to_string()));
                }
                Step::Navigate(target) => {
                    url::Url::parse(target).map_err(|e| {
                        HarnessError::InvalidPlan(format!("invalid URL '{}': {}", target, e))
                    })?;
                }
                Step::Checkpoint(_) => {}
            }
        }

        Ok(Self { identity, steps })
    }

    /// Parse a plan from its JSON form:
    /// `{"app": "...", "test": "...", "steps": [{"navigate": "..."}, {"checkpoint": "..."}]}`
    pub fn from_json(json: &str) -> HarnessResult<Self> {
        let file: PlanFile = serde_json::from_str(json)?;
        Self::new(TestIdentity::new(file.app, file.test)?, file.steps)
    }

    /// Load a JSON plan from disk
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Labels of all checkpoint steps, in order
    pub fn checkpoint_labels(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(Step::label)
    }
}

/// How often to retry acquiring a browser or opening a checkpoint session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,

    /// Delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another attempt is allowed after `attempt` failed (1-based)
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts.max(1)
    }
}

/// Configuration for the harness execution
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Options used to start the browser
    pub browser: BrowserOptions,

    /// Bound on each browser and backend call
    pub call_timeout: Duration,

    /// Bound on closing a checkpoint session, including result finalization
    pub close_timeout: Duration,

    /// Delay between polls while the backend finalizes results
    pub poll_interval: Duration,

    /// Retry policy for acquire and open
    pub retry: RetryPolicy,

    /// Whether NEW checkpoints count as passing
    pub accept_new: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            browser: BrowserOptions::default(),
            call_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
            accept_new: true,
        }
    }
}

impl HarnessConfig {
    /// Settings handed to the checkpoint client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            call_timeout: self.call_timeout,
            close_timeout: self.close_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error types for harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Browser session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Visual backend failure
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The run was cancelled from outside
    #[error("Run cancelled")]
    Cancelled,

    /// The plan failed validation
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Returned when a run was cancelled. Resources were released before this
/// was produced; `partial` holds everything collected so far.
#[derive(Debug, Error)]
#[error("run {}/{} cancelled with {} checkpoint result(s)", .partial.app_name, .partial.test_name, .partial.results.len())]
pub struct Cancelled {
    pub partial: Verdict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> TestIdentity {
        TestIdentity::new("Demo", "Hello World").unwrap()
    }

    #[test]
    fn test_identity_rejects_empty_names() {
        assert!(TestIdentity::new("", "Hello World").is_err());
        assert!(TestIdentity::new("Demo", "   ").is_err());
        assert_eq!(identity().to_string(), "Demo/Hello World");
    }

    #[test]
    fn test_plan_requires_checkpoint() {
        let err = RunPlan::new(identity(), vec![Step::navigate("https://example.test/")]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPlan(_)));

        assert!(RunPlan::new(identity(), vec![]).is_err());
    }

    #[test]
    fn test_plan_rejects_relative_url() {
        let steps = vec![Step::navigate("helloworld"), Step::checkpoint("Hello World")];
        assert!(RunPlan::new(identity(), steps).is_err());
    }

    #[test]
    fn test_plan_rejects_empty_label() {
        let steps = vec![Step::checkpoint(" ")];
        assert!(RunPlan::new(identity(), steps).is_err());
    }

    #[test]
    fn test_plan_from_json() {
        let plan = RunPlan::from_json(
            r#"{
                "app": "Demo",
                "test": "Hello World",
                "steps": [
                    {"navigate": "https://example.test/helloworld"},
                    {"checkpoint": "Hello World"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(plan.identity(), &identity());
        assert_eq!(
            plan.steps(),
            &[
                Step::navigate("https://example.test/helloworld"),
                Step::checkpoint("Hello World"),
            ]
        );
        assert_eq!(plan.checkpoint_labels().collect::<Vec<_>>(), vec!["Hello World"]);
    }

    #[test]
    fn test_plan_from_json_malformed() {
        let err = RunPlan::from_json(r#"{"app": "Demo"}"#).unwrap_err();
        assert!(matches!(err, HarnessError::Serialization(_)));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default();
        assert!(!policy.allows_retry(1));

        let policy = RetryPolicy::attempts(3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        assert!(!RetryPolicy::attempts(0).allows_retry(1));
    }
}
