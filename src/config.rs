//! Configuration management with environment variable support.
//!
//! This module provides configuration for the harness, supporting:
//! - Environment variables for all configurable values
//! - Defaults for everything except credentials and the backend location
//! - Validation at the boundary, before any browser is started
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VISUAL_HARNESS_API_KEY` | Visual backend API key | (required) |
//! | `VISUAL_HARNESS_SERVER_URL` | Visual backend base URL | (required) |
//! | `VISUAL_HARNESS_WEBDRIVER_URL` | WebDriver endpoint | `http://127.0.0.1:9515` |
//! | `VISUAL_HARNESS_HEADLESS` | Run the browser headless | `true` |
//! | `VISUAL_HARNESS_WINDOW_SIZE` | Browser window size (`WxH`) | `1280x800` |
//! | `VISUAL_HARNESS_APP_NAME` | Application name | `Demo` |
//! | `VISUAL_HARNESS_TEST_NAME` | Test name | `Hello World` |
//! | `VISUAL_HARNESS_TARGET_URL` | Page to check | `https://applitools.com/helloworld/` |
//! | `VISUAL_HARNESS_TIMEOUT` | Per-call timeout (seconds) | `30` |
//! | `VISUAL_HARNESS_CLOSE_TIMEOUT` | Close/finalize timeout (seconds) | `120` |
//! | `VISUAL_HARNESS_POLL_INTERVAL_MS` | Result polling interval (ms) | `500` |
//! | `VISUAL_HARNESS_RETRY_ATTEMPTS` | Attempts for acquire and open | `1` |
//! | `VISUAL_HARNESS_ACCEPT_NEW` | Count NEW checkpoints as passing | `true` |
//! | `VISUAL_HARNESS_REPORT_DIR` | Directory for verdict reports | `/tmp/visual-harness` |
//!
//! # Example
//!
//! ```bash
//! export VISUAL_HARNESS_API_KEY="..."
//! export VISUAL_HARNESS_SERVER_URL="https://visual.example.com"
//! export VISUAL_HARNESS_TARGET_URL="https://example.com/helloworld/?diff2"
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::browser::BrowserOptions;
use crate::harness::types::{HarnessConfig, HarnessError, HarnessResult, RetryPolicy};

// ============================================================================
// Default Values
// ============================================================================

/// Default WebDriver endpoint (chromedriver's default port)
pub const DEFAULT_WEBDRIVER_URL: &str = "http://127.0.0.1:9515";

/// Default application name
pub const DEFAULT_APP_NAME: &str = "Demo";

/// Default test name
pub const DEFAULT_TEST_NAME: &str = "Hello World";

/// Default page to check
pub const DEFAULT_TARGET_URL: &str = "https://applitools.com/helloworld/";

/// Default window width (pixels)
pub const DEFAULT_WINDOW_WIDTH: u32 = 1280;

/// Default window height (pixels)
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;

/// Default per-call timeout (seconds)
pub const DEFAULT_TIMEOUT: u64 = 30;

/// Default close/finalize timeout (seconds)
pub const DEFAULT_CLOSE_TIMEOUT: u64 = 120;

/// Default result polling interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default attempts for acquire and open
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 1;

/// Default report directory
pub const DEFAULT_REPORT_DIR: &str = "/tmp/visual-harness";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_API_KEY: &str = "VISUAL_HARNESS_API_KEY";
pub const ENV_SERVER_URL: &str = "VISUAL_HARNESS_SERVER_URL";
pub const ENV_WEBDRIVER_URL: &str = "VISUAL_HARNESS_WEBDRIVER_URL";
pub const ENV_HEADLESS: &str = "VISUAL_HARNESS_HEADLESS";
pub const ENV_WINDOW_SIZE: &str = "VISUAL_HARNESS_WINDOW_SIZE";
pub const ENV_APP_NAME: &str = "VISUAL_HARNESS_APP_NAME";
pub const ENV_TEST_NAME: &str = "VISUAL_HARNESS_TEST_NAME";
pub const ENV_TARGET_URL: &str = "VISUAL_HARNESS_TARGET_URL";
pub const ENV_TIMEOUT: &str = "VISUAL_HARNESS_TIMEOUT";
pub const ENV_CLOSE_TIMEOUT: &str = "VISUAL_HARNESS_CLOSE_TIMEOUT";
pub const ENV_POLL_INTERVAL_MS: &str = "VISUAL_HARNESS_POLL_INTERVAL_MS";
pub const ENV_RETRY_ATTEMPTS: &str = "VISUAL_HARNESS_RETRY_ATTEMPTS";
pub const ENV_ACCEPT_NEW: &str = "VISUAL_HARNESS_ACCEPT_NEW";
pub const ENV_REPORT_DIR: &str = "VISUAL_HARNESS_REPORT_DIR";

/// Configuration for one harness invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// Visual backend settings
    pub backend: BackendSettings,
    /// Browser settings
    pub browser: BrowserSettings,
    /// What to test
    pub target: TargetSettings,
    /// Timeouts, retries and verdict policy
    pub run: RunSettings,
    /// Where verdict reports go
    pub report_dir: PathBuf,
}

/// Visual backend settings
#[derive(Clone, Default)]
pub struct BackendSettings {
    /// Base URL of the backend
    pub server_url: String,
    /// API key, passed through untouched
    pub api_key: String,
}

/// Browser settings
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// WebDriver endpoint
    pub webdriver_url: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

/// Test identity and target page
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub app_name: String,
    pub test_name: String,
    pub url: String,
}

/// Timeouts, retries and verdict policy
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Per-call timeout (seconds)
    pub timeout: u64,
    /// Close/finalize timeout (seconds)
    pub close_timeout: u64,
    /// Result polling interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Attempts for acquire and open
    pub retry_attempts: u32,
    /// Whether NEW checkpoints count as passing
    pub accept_new: bool,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            backend: BackendSettings::from_env(),
            browser: BrowserSettings::from_env(),
            target: TargetSettings::from_env(),
            run: RunSettings::from_env(),
            report_dir: env::var(ENV_REPORT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_REPORT_DIR)),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            backend: BackendSettings::default(),
            browser: BrowserSettings::defaults(),
            target: TargetSettings::defaults(),
            run: RunSettings::defaults(),
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
        }
    }

    /// Check everything a run needs before it starts
    pub fn validate(&self) -> HarnessResult<()> {
        if self.backend.api_key.trim().is_empty() {
            return Err(HarnessError::Config(format!("{} is not set", ENV_API_KEY)));
        }
        if self.backend.server_url.trim().is_empty() {
            return Err(HarnessError::Config(format!("{} is not set", ENV_SERVER_URL)));
        }

        for (name, value) in [
            (ENV_SERVER_URL, &self.backend.server_url),
            (ENV_WEBDRIVER_URL, &self.browser.webdriver_url),
            (ENV_TARGET_URL, &self.target.url),
        ] {
            url::Url::parse(value)
                .map_err(|e| HarnessError::Config(format!("{} '{}' is not a URL: {}", name, value, e)))?;
        }

        if self.run.timeout == 0 || self.run.close_timeout == 0 {
            return Err(HarnessError::Config("timeouts must be positive".to_string()));
        }

        Ok(())
    }

    /// Harness settings derived from this configuration
    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            browser: BrowserOptions::default()
                .headless(self.browser.headless)
                .window_size(self.browser.window_width, self.browser.window_height),
            call_timeout: Duration::from_secs(self.run.timeout),
            close_timeout: Duration::from_secs(self.run.close_timeout),
            poll_interval: Duration::from_millis(self.run.poll_interval_ms),
            retry: RetryPolicy::attempts(self.run.retry_attempts),
            accept_new: self.run.accept_new,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BackendSettings {
    pub fn from_env() -> Self {
        Self {
            server_url: env::var(ENV_SERVER_URL).unwrap_or_default(),
            api_key: env::var(ENV_API_KEY).unwrap_or_default(),
        }
    }
}

// Keeps the API key out of logs
impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("server_url", &self.server_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl BrowserSettings {
    pub fn from_env() -> Self {
        let (window_width, window_height) = env::var(ENV_WINDOW_SIZE)
            .ok()
            .and_then(|s| parse_window_size(&s))
            .unwrap_or((DEFAULT_WINDOW_WIDTH, DEFAULT_WINDOW_HEIGHT));

        Self {
            webdriver_url: env::var(ENV_WEBDRIVER_URL)
                .unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string()),
            headless: env::var(ENV_HEADLESS)
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
            window_width,
            window_height,
        }
    }

    pub fn defaults() -> Self {
        Self {
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
        }
    }
}

impl TargetSettings {
    pub fn from_env() -> Self {
        Self {
            app_name: env::var(ENV_APP_NAME).unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            test_name: env::var(ENV_TEST_NAME).unwrap_or_else(|_| DEFAULT_TEST_NAME.to_string()),
            url: env::var(ENV_TARGET_URL).unwrap_or_else(|_| DEFAULT_TARGET_URL.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            test_name: DEFAULT_TEST_NAME.to_string(),
            url: DEFAULT_TARGET_URL.to_string(),
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            timeout: env::var(ENV_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT),
            close_timeout: env::var(ENV_CLOSE_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CLOSE_TIMEOUT),
            poll_interval_ms: env::var(ENV_POLL_INTERVAL_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            retry_attempts: env::var(ENV_RETRY_ATTEMPTS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            accept_new: env::var(ENV_ACCEPT_NEW)
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
        }
    }

    pub fn defaults() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            accept_new: true,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a window size string ("WxH") into (width, height)
pub fn parse_window_size(size: &str) -> Option<(u32, u32)> {
    let size = size.trim().to_lowercase();
    let (w, h) = size.split_once('x')?;
    let width: u32 = w.parse().ok()?;
    let height: u32 = h.parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Parse a boolean flag ("1", "true", "yes", "on" and their negations)
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
