//! Visual Harness - visual regression testing against a visual-diff backend.
//!
//! This crate provides:
//! - Browser session lifecycle with guaranteed release (`SessionHandle`)
//! - A W3C WebDriver browser provider
//! - A checkpoint client for open/check/close visual-diff backends, plus an HTTP backend
//! - An orchestrator turning a plan of steps into a PASS/FAIL/ERROR verdict
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use visual_harness::{HarnessConfig, HttpBackend, Orchestrator, RunPlan, Step, TestIdentity, WebDriverProvider};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(WebDriverProvider::new("http://127.0.0.1:9515")?);
//! let backend = Arc::new(HttpBackend::new("https://visual.example.com", "api-key")?);
//! let orchestrator = Orchestrator::new(provider, backend, HarnessConfig::default());
//!
//! let plan = RunPlan::new(
//!     TestIdentity::new("Demo", "Hello World")?,
//!     vec![Step::navigate("https://example.com/helloworld"), Step::checkpoint("Hello World")],
//! )?;
//! let verdict = orchestrator.run(&plan).await;
//! std::process::exit(verdict.overall.exit_code());
//! # }
//! ```

pub mod browser;
pub mod checkpoint;
pub mod config;
pub mod harness;
pub mod runner;
pub mod session;

// Re-export runner types
pub use runner::{Outcome, Verdict, write_report};

// Re-export harness types
pub use harness::{
    Cancelled, HarnessConfig, HarnessError, HarnessResult, Orchestrator, RetryPolicy, RunPlan, Step,
    TestIdentity,
};

// Re-export browser providers
pub use browser::{BrowserError, BrowserId, BrowserOptions, BrowserProvider, BrowserResult, WebDriverProvider};

// Re-export checkpoint client and backends
pub use checkpoint::{
    CheckpointClient, CheckpointError, CheckpointResult, CheckpointSession, CheckpointStatus,
    ClientSettings, HttpBackend, VisualBackend,
};

// Re-export session management
pub use session::{SessionError, SessionHandle, SessionResult};

// Re-export configuration
pub use config::Config;
