//! Visual checkpoint client.
//!
//! Wraps a `VisualBackend` with the session rules the harness relies on:
//! - A checkpoint session borrows the live `SessionHandle` it captures from
//! - Every backend call is bounded by a timeout
//! - `close` consumes the session and blocks until results are final
//! - A session dropped without `close`/`abort` is closed in the background

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::types::{
    BackendSessionId, CheckpointError, CheckpointRequest, CheckpointResult, CheckpointStatus,
    CheckpointUpload, ClientResult, CloseReport, Environment, VisualBackend,
};
use crate::harness::types::TestIdentity;
use crate::session::SessionHandle;

/// Timeouts used by the checkpoint client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Bound on open, check and abort calls
    pub call_timeout: Duration,
    /// Bound on close, including result finalization
    pub close_timeout: Duration,
    /// Delay between polls while results are pending
    pub poll_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Opens checkpoint sessions against a visual backend
#[derive(Clone)]
pub struct CheckpointClient {
    backend: Arc<dyn VisualBackend>,
    settings: ClientSettings,
}

impl CheckpointClient {
    pub fn new(backend: Arc<dyn VisualBackend>, settings: ClientSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Open a checkpoint session for `identity`, capturing from `handle`
    pub async fn open<'h>(
        &self,
        handle: &'h SessionHandle,
        identity: &TestIdentity,
    ) -> ClientResult<CheckpointSession<'h>> {
        if handle.is_released() {
            return Err(CheckpointError::Capture(
                "browser session already released".to_string(),
            ));
        }

        let mut open = {
            let backend = Arc::clone(&self.backend);
            let identity = identity.clone();
            let environment = Environment::current();
            Box::pin(async move { backend.open(&identity, &environment).await })
        };

        let id = match timeout(self.settings.call_timeout, &mut open).await {
            Ok(result) => result?,
            Err(_) => {
                // The backend may still create the session; close it when it does.
                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    if let Ok(id) = open.await {
                        warn!(session = %id, "Checkpoint session opened after timeout, closing it");
                        if let Err(e) = backend.close(&id).await {
                            warn!(session = %id, error = %e, "Failed to close late checkpoint session");
                        }
                    }
                });
                return Err(CheckpointError::Timeout(format!(
                    "open did not finish within {:?}",
                    self.settings.call_timeout
                )));
            }
        };

        info!(test = %identity, session = %id, "Checkpoint session opened");

        Ok(CheckpointSession {
            backend: Arc::clone(&self.backend),
            settings: self.settings.clone(),
            handle,
            id,
            submitted: Vec::new(),
            finished: false,
        })
    }
}

/// A checkpoint submitted during the session, with its backend step if any
#[derive(Debug, Clone)]
struct Submitted {
    result: CheckpointResult,
    step: Option<u32>,
}

/// An open checkpoint session. Cannot outlive the browser it captures from.
pub struct CheckpointSession<'h> {
    backend: Arc<dyn VisualBackend>,
    settings: ClientSettings,
    handle: &'h SessionHandle,
    id: BackendSessionId,
    submitted: Vec<Submitted>,
    finished: bool,
}

impl<'h> CheckpointSession<'h> {
    /// Backend-assigned session id
    pub fn id(&self) -> &BackendSessionId {
        &self.id
    }

    /// Results so far, in check order, with provisional statuses
    pub fn results(&self) -> Vec<CheckpointResult> {
        self.submitted.iter().map(|s| s.result.clone()).collect()
    }

    /// Capture the current page and submit it as checkpoint `label`.
    ///
    /// On failure an ERROR result for `label` is recorded before the error is
    /// returned, so the session's results always cover every attempted check.
    pub async fn check(&mut self, label: &str) -> ClientResult<CheckpointResult> {
        let request = CheckpointRequest {
            label,
            session: self.handle,
        };

        let outcome = match capture(request).await {
            Ok(upload) => {
                bounded(
                    "check",
                    self.settings.call_timeout,
                    self.backend.check(&self.id, &upload),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                let result = CheckpointResult::new(label, report.status);
                debug!(label, step = report.step, status = %report.status, "Checkpoint submitted");
                self.submitted.push(Submitted {
                    result: result.clone(),
                    step: Some(report.step),
                });
                Ok(result)
            }
            Err(e) => {
                self.submitted.push(Submitted {
                    result: CheckpointResult::error(label, e.to_string()),
                    step: None,
                });
                Err(e)
            }
        }
    }

    /// Close the session and wait until every result is final.
    ///
    /// Returns all results in check order.
    pub async fn close(mut self) -> ClientResult<Vec<CheckpointResult>> {
        self.finished = true;

        let backend = Arc::clone(&self.backend);
        let id = self.id.clone();
        let poll_interval = self.settings.poll_interval;

        let report = bounded("close", self.settings.close_timeout, async {
            let mut report = backend.close(&id).await?;
            while !report.complete {
                debug!(session = %id, "Waiting for checkpoint results to finalize");
                sleep(poll_interval).await;
                report = backend.poll(&id).await?;
            }
            Ok(report)
        })
        .await?;

        info!(session = %self.id, steps = report.steps.len(), "Checkpoint session closed");
        Ok(self.finalize(report))
    }

    /// Best-effort close used when a run is aborting. Never fails.
    ///
    /// Returns the results, finalized where the backend already had them.
    pub async fn abort(mut self) -> Vec<CheckpointResult> {
        self.finished = true;

        match bounded(
            "close",
            self.settings.call_timeout,
            self.backend.close(&self.id),
        )
        .await
        {
            Ok(report) => {
                info!(session = %self.id, "Checkpoint session closed after abort");
                self.finalize(report)
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Failed to close checkpoint session");
                self.results()
            }
        }
    }

    /// Apply final statuses from `report`, matched by backend step number
    fn finalize(&self, report: CloseReport) -> Vec<CheckpointResult> {
        let finals: HashMap<u32, CheckpointStatus> = report
            .steps
            .into_iter()
            .map(|step| (step.step, step.status))
            .collect();

        self.submitted
            .iter()
            .map(|submitted| {
                let mut result = submitted.result.clone();
                if let Some(status) = submitted.step.and_then(|step| finals.get(&step)) {
                    result.status = *status;
                }
                result
            })
            .collect()
    }
}

impl std::fmt::Debug for CheckpointSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointSession")
            .field("id", &self.id)
            .field("browser", self.handle.id())
            .field("submitted", &self.submitted.len())
            .finish()
    }
}

impl Drop for CheckpointSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(session = %self.id, "Checkpoint session dropped without close, closing in background");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let backend = Arc::clone(&self.backend);
            let id = self.id.clone();
            runtime.spawn(async move {
                if let Err(e) = backend.close(&id).await {
                    warn!(session = %id, error = %e, "Background checkpoint close failed");
                }
            });
        }
    }
}

/// Grab the screenshot for a request and read its dimensions
async fn capture(request: CheckpointRequest<'_>) -> ClientResult<CheckpointUpload> {
    let image = request
        .session
        .screenshot()
        .await
        .map_err(|e| CheckpointError::Capture(e.to_string()))?;

    let decoded = image::load_from_memory(&image)
        .map_err(|e| CheckpointError::Capture(format!("screenshot is not an image: {}", e)))?;

    Ok(CheckpointUpload {
        label: request.label.to_string(),
        width: decoded.width(),
        height: decoded.height(),
        image,
    })
}

/// Run a backend call under `limit`
async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CheckpointError::Timeout(format!(
            "{} did not finish within {:?}",
            operation, limit
        ))),
    }
}
