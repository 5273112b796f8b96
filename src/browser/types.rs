// Core types for browser automation providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for browser provider operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Error types for browser provider operations
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The automation endpoint could not be reached
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The automation endpoint answered with an error payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The automation endpoint answered with something we could not decode
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Identifier of one live browser instance, as assigned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowserId(pub String);

impl std::fmt::Display for BrowserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options used to start a browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserOptions {
    /// Browser name requested from the provider (e.g., "chrome")
    pub browser_name: String,

    /// Run without a visible window
    pub headless: bool,

    /// Window size in pixels (width, height)
    pub window_size: (u32, u32),

    /// Extra command line arguments for the browser
    pub args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            browser_name: "chrome".to_string(),
            headless: true,
            window_size: (1280, 800),
            args: Vec::new(),
        }
    }
}

impl BrowserOptions {
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// An opaque capability to start a browser, load a URL, grab the viewport
/// and stop the browser again.
///
/// Implementations:
/// - `WebDriverProvider` for any W3C WebDriver endpoint (chromedriver, geckodriver, Selenium)
#[async_trait]
pub trait BrowserProvider: Send + Sync {
    /// Start one browser instance
    async fn start(&self, options: &BrowserOptions) -> BrowserResult<BrowserId>;

    /// Load a URL in the given browser and wait for the page to settle
    async fn load(&self, id: &BrowserId, url: &str) -> BrowserResult<()>;

    /// Capture the current viewport as PNG bytes
    async fn screenshot(&self, id: &BrowserId) -> BrowserResult<Vec<u8>>;

    /// Stop the browser instance
    async fn stop(&self, id: &BrowserId) -> BrowserResult<()>;
}
