//! Browser session lifecycle.
//!
//! A `SessionHandle` owns exactly one live browser instance:
//! - Acquired once per run, before navigation
//! - Released once per run, after the checkpoint session closed
//! - Release is idempotent and never fails
//! - A handle dropped without release stops its browser in the background

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::browser::{BrowserId, BrowserOptions, BrowserProvider};

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error types for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser could not be started
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// The browser could not load the requested URL
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// The viewport could not be captured
    #[error("Screenshot capture failed: {0}")]
    Capture(String),
}

/// Ownership of one live browser instance
pub struct SessionHandle {
    provider: Arc<dyn BrowserProvider>,
    id: BrowserId,
    call_timeout: Duration,
    released: bool,
}

impl SessionHandle {
    /// Start a browser through `provider`.
    ///
    /// `call_timeout` bounds this call and every later call made through the handle.
    pub async fn acquire(
        provider: Arc<dyn BrowserProvider>,
        options: &BrowserOptions,
        call_timeout: Duration,
    ) -> SessionResult<Self> {
        debug!(browser = %options.browser_name, headless = options.headless, "Starting browser");

        let mut start = {
            let provider = Arc::clone(&provider);
            let options = options.clone();
            Box::pin(async move { provider.start(&options).await })
        };

        let id = match timeout(call_timeout, &mut start).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(SessionError::Provisioning(e.to_string())),
            Err(_) => {
                // The provider may still bring the browser up; stop it when it does.
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    if let Ok(id) = start.await {
                        warn!(browser = %id, "Browser started after timeout, stopping it");
                        if let Err(e) = provider.stop(&id).await {
                            warn!(browser = %id, error = %e, "Failed to stop late browser");
                        }
                    }
                });
                return Err(SessionError::Provisioning(format!(
                    "browser did not start within {:?}",
                    call_timeout
                )));
            }
        };

        info!(browser = %id, "Browser session acquired");

        Ok(Self {
            provider,
            id,
            call_timeout,
            released: false,
        })
    }

    /// Provider-assigned identifier of the browser
    pub fn id(&self) -> &BrowserId {
        &self.id
    }

    /// Whether `release` already ran
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Load `url` in the browser
    pub async fn navigate(&self, url: &str) -> SessionResult<()> {
        let navigation_error = |reason: String| SessionError::Navigation {
            url: url.to_string(),
            reason,
        };

        if self.released {
            return Err(navigation_error("browser session already released".to_string()));
        }

        debug!(browser = %self.id, url, "Navigating");
        match timeout(self.call_timeout, self.provider.load(&self.id, url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(navigation_error(e.to_string())),
            Err(_) => Err(navigation_error(format!(
                "page did not load within {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Capture the current viewport as PNG bytes
    pub async fn screenshot(&self) -> SessionResult<Vec<u8>> {
        if self.released {
            return Err(SessionError::Capture("browser session already released".to_string()));
        }

        match timeout(self.call_timeout, self.provider.screenshot(&self.id)).await {
            Ok(Ok(png)) => Ok(png),
            Ok(Err(e)) => Err(SessionError::Capture(e.to_string())),
            Err(_) => Err(SessionError::Capture(format!(
                "no screenshot within {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Stop the browser. Calling this more than once is a no-op.
    ///
    /// If the returned future is dropped before the stop attempt finishes,
    /// the handle stays unreleased and `Drop` stops the browser instead.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }

        match timeout(self.call_timeout, self.provider.stop(&self.id)).await {
            Ok(Ok(())) => info!(browser = %self.id, "Browser session released"),
            Ok(Err(e)) => warn!(browser = %self.id, error = %e, "Failed to stop browser"),
            Err(_) => warn!(
                browser = %self.id,
                "Browser did not stop within {:?}", self.call_timeout
            ),
        }
        self.released = true;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(browser = %self.id, "Session handle dropped without release, stopping browser in background");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let provider = Arc::clone(&self.provider);
            let id = self.id.clone();
            runtime.spawn(async move {
                if let Err(e) = provider.stop(&id).await {
                    warn!(browser = %id, error = %e, "Background browser stop failed");
                }
            });
        }
    }
}
