//! Scripted browser provider and visual backend for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use visual_harness::browser::{BrowserError, BrowserId, BrowserOptions, BrowserProvider, BrowserResult};
use visual_harness::checkpoint::{
    BackendSessionId, CheckpointError, CheckpointStatus, CheckpointUpload, ClientResult,
    CloseReport, Environment, StepReport, VisualBackend,
};
use visual_harness::{HarnessConfig, RetryPolicy, TestIdentity};

/// A small solid PNG
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 3, image::Rgb([200, 200, 200]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Harness settings with short timeouts
pub fn test_config() -> HarnessConfig {
    HarnessConfig {
        call_timeout: Duration::from_secs(1),
        close_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy::default(),
        ..HarnessConfig::default()
    }
}

// ============================================================================
// Browser
// ============================================================================

#[derive(Default)]
pub struct FakeBrowser {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub screenshots: AtomicUsize,
    failing_starts: AtomicUsize,
    failing_urls: Vec<String>,
    start_delay: Option<Duration>,
    pub loaded: Mutex<Vec<String>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` start attempts
    pub fn failing_starts(self, n: usize) -> Self {
        self.failing_starts.store(n, Ordering::SeqCst);
        self
    }

    /// Fail navigation to `url`
    pub fn failing_url(mut self, url: &str) -> Self {
        self.failing_urls.push(url.to_string());
        self
    }

    /// Take `delay` to start, counting the start before the delay
    pub fn slow_start(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserProvider for FakeBrowser {
    async fn start(&self, _options: &BrowserOptions) -> BrowserResult<BrowserId> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            sleep(delay).await;
        }
        if attempt < self.failing_starts.load(Ordering::SeqCst) {
            return Err(BrowserError::Connection("chromedriver not reachable".to_string()));
        }
        Ok(BrowserId(format!("browser-{}", attempt)))
    }

    async fn load(&self, _id: &BrowserId, url: &str) -> BrowserResult<()> {
        if self.failing_urls.iter().any(|u| u == url) {
            return Err(BrowserError::Protocol("unknown error: net::ERR_NAME_NOT_RESOLVED".to_string()));
        }
        self.loaded.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn screenshot(&self, _id: &BrowserId) -> BrowserResult<Vec<u8>> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(tiny_png())
    }

    async fn stop(&self, _id: &BrowserId) -> BrowserResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Visual backend
// ============================================================================

/// How the backend answers a check for one label
#[derive(Debug, Clone, Copy)]
pub enum CheckScript {
    Status(CheckpointStatus),
    /// Answer with the status after a delay
    Delayed(Duration, CheckpointStatus),
    Unavailable,
    Auth,
}

/// How the backend answers open
#[derive(Debug, Clone, Copy)]
pub enum OpenScript {
    Ok,
    Auth,
    /// Unavailable for the first `n` attempts
    Unavailable(usize),
}

pub struct FakeBackend {
    checks: HashMap<String, CheckScript>,
    finals: HashMap<String, CheckpointStatus>,
    open: OpenScript,
    open_delay: Option<Duration>,
    close_fails: bool,
    pending_polls: usize,
    reverse_close: bool,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub polls: AtomicUsize,
    next_step: AtomicU32,
    sessions: Mutex<HashMap<String, Vec<StepReport>>>,
    remaining_polls: Mutex<HashMap<String, usize>>,
    pub uploads: Mutex<Vec<(String, u32, u32)>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            checks: HashMap::new(),
            finals: HashMap::new(),
            open: OpenScript::Ok,
            open_delay: None,
            close_fails: false,
            pending_polls: 0,
            reverse_close: false,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            next_step: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
            remaining_polls: Mutex::new(HashMap::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_check(mut self, label: &str, script: CheckScript) -> Self {
        self.checks.insert(label.to_string(), script);
        self
    }

    /// Status reported for `label` once the session closes
    pub fn finalize_as(mut self, label: &str, status: CheckpointStatus) -> Self {
        self.finals.insert(label.to_string(), status);
        self
    }

    pub fn on_open(mut self, script: OpenScript) -> Self {
        self.open = script;
        self
    }

    /// Create the session right away but answer open after `delay`
    pub fn slow_open(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    /// Report the session incomplete for `n` polls after close
    pub fn pending_for(mut self, n: usize) -> Self {
        self.pending_polls = n;
        self
    }

    /// Report steps in reverse order on close
    pub fn reversed_close(mut self) -> Self {
        self.reverse_close = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sessions the backend actually created, including ones opened too late
    pub fn sessions_created(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn report(&self, session: &BackendSessionId) -> CloseReport {
        let mut steps: Vec<StepReport> = self
            .sessions
            .lock()
            .unwrap()
            .get(&session.0)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut step| {
                if let Some(status) = self.finals.get(&step.label) {
                    step.status = *status;
                }
                step
            })
            .collect();

        if self.reverse_close {
            steps.reverse();
        }

        let remaining = self
            .remaining_polls
            .lock()
            .unwrap()
            .get(&session.0)
            .copied()
            .unwrap_or(0);

        CloseReport {
            complete: remaining == 0,
            steps,
        }
    }
}

#[async_trait]
impl VisualBackend for FakeBackend {
    async fn open(
        &self,
        _identity: &TestIdentity,
        _environment: &Environment,
    ) -> ClientResult<BackendSessionId> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        match self.open {
            OpenScript::Auth => return Err(CheckpointError::Auth("invalid API key".to_string())),
            OpenScript::Unavailable(n) if attempt < n => {
                return Err(CheckpointError::Unavailable("503 Service Unavailable".to_string()));
            }
            _ => {}
        }

        let id = format!("session-{}", attempt);
        self.sessions.lock().unwrap().insert(id.clone(), Vec::new());
        self.remaining_polls
            .lock()
            .unwrap()
            .insert(id.clone(), self.pending_polls);
        if let Some(delay) = self.open_delay {
            sleep(delay).await;
        }
        Ok(BackendSessionId(id))
    }

    async fn check(
        &self,
        session: &BackendSessionId,
        upload: &CheckpointUpload,
    ) -> ClientResult<StepReport> {
        self.uploads
            .lock()
            .unwrap()
            .push((upload.label.clone(), upload.width, upload.height));

        let status = match self
            .checks
            .get(&upload.label)
            .copied()
            .unwrap_or(CheckScript::Status(CheckpointStatus::Match))
        {
            CheckScript::Status(status) => status,
            CheckScript::Delayed(delay, status) => {
                sleep(delay).await;
                status
            }
            CheckScript::Unavailable => {
                return Err(CheckpointError::Unavailable("connection reset".to_string()));
            }
            CheckScript::Auth => return Err(CheckpointError::Auth("key revoked".to_string())),
        };

        let report = StepReport {
            step: self.next_step.fetch_add(1, Ordering::SeqCst),
            label: upload.label.clone(),
            status,
        };
        self.sessions
            .lock()
            .unwrap()
            .entry(session.0.clone())
            .or_default()
            .push(report.clone());
        Ok(report)
    }

    async fn close(&self, session: &BackendSessionId) -> ClientResult<CloseReport> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.close_fails {
            return Err(CheckpointError::Unavailable("502 Bad Gateway".to_string()));
        }
        Ok(self.report(session))
    }

    async fn poll(&self, session: &BackendSessionId) -> ClientResult<CloseReport> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(remaining) = self.remaining_polls.lock().unwrap().get_mut(&session.0) {
            *remaining = remaining.saturating_sub(1);
        }
        Ok(self.report(session))
    }
}
