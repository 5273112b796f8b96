//! Test orchestrator.
//!
//! Runs one plan through the state machine
//!
//! ```text
//! INIT -> SESSION_OPEN -> CHECKPOINT_SESSION_OPEN -> (CHECKING)* -> CLOSING -> DONE
//!   \__________\__________________\___________________\______________\----> ERROR
//! ```
//!
//! Whatever step fails, the browser is released exactly once and an opened
//! checkpoint session is closed exactly once before the verdict is returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{Cancelled, HarnessConfig, HarnessError, RunPlan, Step, TestIdentity};
use crate::browser::BrowserProvider;
use crate::checkpoint::{
    CheckpointClient, CheckpointError, CheckpointResult, CheckpointSession, VisualBackend,
};
use crate::runner::Verdict;
use crate::session::{SessionError, SessionHandle};

/// Run states, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Init,
    SessionOpen,
    CheckpointSessionOpen,
    Checking,
    Closing,
    Done,
    Error,
}

/// How the step loop ended
#[derive(Debug)]
enum Stop {
    Completed,
    Aborted(HarnessError),
    Cancelled,
}

impl Stop {
    fn is_completed(&self) -> bool {
        matches!(self, Stop::Completed)
    }

    fn reason(&self) -> String {
        match self {
            Stop::Completed => "completed".to_string(),
            Stop::Aborted(e) => e.to_string(),
            Stop::Cancelled => HarnessError::Cancelled.to_string(),
        }
    }
}

/// A step future that was either cancelled or failed
enum Interrupt<E> {
    Cancelled,
    Failed(E),
}

/// Await `call` unless `cancel` fires first
async fn interruptible<T, E, F>(cancel: &CancellationToken, call: F) -> Result<T, Interrupt<E>>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        result = call => result.map_err(Interrupt::Failed),
    }
}

/// Book-keeping for one run
struct RunRecord<'p> {
    identity: &'p TestIdentity,
    state: RunState,
    started_at: DateTime<Utc>,
    results: Vec<CheckpointResult>,
}

impl<'p> RunRecord<'p> {
    fn new(identity: &'p TestIdentity) -> Self {
        Self {
            identity,
            state: RunState::Init,
            started_at: Utc::now(),
            results: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            debug!(test = %self.identity, from = ?self.state, to = ?next, "Run state changed");
            self.state = next;
        }
    }

    fn finish(mut self, stop: Stop, accept_new: bool) -> Result<Verdict, Cancelled> {
        let aborted = !stop.is_completed();
        self.transition(if aborted { RunState::Error } else { RunState::Done });

        let overall = Verdict::summarize(&self.results, aborted, accept_new);
        let verdict = Verdict {
            app_name: self.identity.app_name().to_string(),
            test_name: self.identity.test_name().to_string(),
            overall,
            results: self.results,
            error: (!stop.is_completed()).then(|| stop.reason()),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        match stop {
            Stop::Cancelled => {
                warn!(test = %self.identity, "Run cancelled");
                Err(Cancelled { partial: verdict })
            }
            Stop::Aborted(ref e) => {
                error!(test = %self.identity, error = %e, overall = %verdict.overall, "Run aborted");
                Ok(verdict)
            }
            Stop::Completed => {
                info!(test = %self.identity, overall = %verdict.overall, checkpoints = verdict.results.len(), "Run finished");
                Ok(verdict)
            }
        }
    }
}

/// Sequences browser, navigation and checkpoints for a plan.
///
/// Holds no per-run state, so one orchestrator can drive many runs at once.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn BrowserProvider>,
    client: CheckpointClient,
    config: HarnessConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn BrowserProvider>,
        backend: Arc<dyn VisualBackend>,
        config: HarnessConfig,
    ) -> Self {
        let client = CheckpointClient::new(backend, config.client_settings());
        Self {
            provider,
            client,
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute `plan` to completion and return its verdict
    pub async fn run(&self, plan: &RunPlan) -> Verdict {
        match self.run_until_cancelled(plan, &CancellationToken::new()).await {
            Ok(verdict) => verdict,
            Err(cancelled) => cancelled.partial,
        }
    }

    /// Execute `plan`, stopping early if `cancel` fires.
    ///
    /// On cancellation the checkpoint session is closed and the browser released
    /// before `Cancelled` is returned.
    pub async fn run_until_cancelled(
        &self,
        plan: &RunPlan,
        cancel: &CancellationToken,
    ) -> Result<Verdict, Cancelled> {
        let mut run = RunRecord::new(plan.identity());
        info!(test = %plan.identity(), steps = plan.steps().len(), "Starting run");

        // A single acquire attempt is never interrupted, only the waits between retries.
        let mut handle = match self.acquire(cancel).await {
            Ok(handle) => handle,
            Err(Interrupt::Cancelled) => return run.finish(Stop::Cancelled, self.config.accept_new),
            Err(Interrupt::Failed(e)) => {
                return run.finish(Stop::Aborted(e.into()), self.config.accept_new);
            }
        };
        run.transition(RunState::SessionOpen);

        let stop = if cancel.is_cancelled() {
            Stop::Cancelled
        } else {
            self.drive(&handle, plan, &mut run, cancel).await
        };

        handle.release().await;
        run.finish(stop, self.config.accept_new)
    }

    /// Run every step against `handle`, then close the checkpoint session
    async fn drive(
        &self,
        handle: &SessionHandle,
        plan: &RunPlan,
        run: &mut RunRecord<'_>,
        cancel: &CancellationToken,
    ) -> Stop {
        let steps = plan.steps();
        let mut session: Option<CheckpointSession<'_>> = None;
        let mut stop = Stop::Completed;
        // Index of the first step that was not attempted
        let mut next = steps.len();

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                stop = Stop::Cancelled;
                next = index;
                break;
            }

            match step {
                Step::Navigate(url) => match interruptible(cancel, handle.navigate(url)).await {
                    Ok(()) => {}
                    Err(Interrupt::Cancelled) => {
                        stop = Stop::Cancelled;
                        next = index;
                        break;
                    }
                    Err(Interrupt::Failed(e)) => {
                        stop = Stop::Aborted(e.into());
                        next = index + 1;
                        break;
                    }
                },
                Step::Checkpoint(label) => {
                    if session.is_none() {
                        match self.open(handle, plan.identity(), cancel).await {
                            Ok(opened) => {
                                run.transition(RunState::CheckpointSessionOpen);
                                session = Some(opened);
                            }
                            Err(Interrupt::Cancelled) => {
                                stop = Stop::Cancelled;
                                next = index;
                                break;
                            }
                            Err(Interrupt::Failed(e)) => {
                                stop = Stop::Aborted(e.into());
                                next = index;
                                break;
                            }
                        }
                    }

                    let Some(active) = session.as_mut() else {
                        continue;
                    };
                    run.transition(RunState::Checking);

                    match interruptible(cancel, active.check(label)).await {
                        Ok(result) => {
                            debug!(test = %plan.identity(), label = %label, status = %result.status, "Checkpoint captured");
                        }
                        Err(Interrupt::Failed(CheckpointError::Timeout(reason))) => {
                            warn!(test = %plan.identity(), label = %label, %reason, "Checkpoint timed out, continuing");
                        }
                        Err(Interrupt::Failed(e)) => {
                            stop = Stop::Aborted(e.into());
                            next = index + 1;
                            break;
                        }
                        Err(Interrupt::Cancelled) => {
                            stop = Stop::Cancelled;
                            next = index;
                            break;
                        }
                    }
                }
            }
        }

        run.transition(RunState::Closing);

        let Some(active) = session else {
            return stop;
        };

        if stop.is_completed() {
            let provisional = active.results();
            match active.close().await {
                Ok(results) => run.results = results,
                Err(e) => {
                    run.results = provisional;
                    stop = Stop::Aborted(e.into());
                }
            }
        } else {
            run.results = active.abort().await;
        }

        // Checkpoints the run never reached
        let reason = stop.reason();
        for label in steps[next..].iter().filter_map(Step::label) {
            run.results
                .push(CheckpointResult::error(label, format!("not attempted: {}", reason)));
        }

        stop
    }

    /// Acquire a browser, retrying per policy until `cancel` fires
    async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle, Interrupt<SessionError>> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match SessionHandle::acquire(
                Arc::clone(&self.provider),
                &self.config.browser,
                self.config.call_timeout,
            )
            .await
            {
                Ok(handle) => return Ok(handle),
                Err(e) if policy.allows_retry(attempt) => {
                    warn!(attempt, error = %e, "Browser provisioning failed, retrying");
                    if cancelled_during(cancel, policy.backoff).await {
                        return Err(Interrupt::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(Interrupt::Failed(e)),
            }
        }
    }

    /// Open a checkpoint session, retrying per policy while the backend is unavailable
    async fn open<'h>(
        &self,
        handle: &'h SessionHandle,
        identity: &TestIdentity,
        cancel: &CancellationToken,
    ) -> Result<CheckpointSession<'h>, Interrupt<CheckpointError>> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match self.client.open(handle, identity).await {
                Ok(session) => return Ok(session),
                Err(CheckpointError::Unavailable(reason)) if policy.allows_retry(attempt) => {
                    warn!(attempt, %reason, "Visual backend unavailable, retrying open");
                    if cancelled_during(cancel, policy.backoff).await {
                        return Err(Interrupt::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(Interrupt::Failed(e)),
            }
        }
    }
}

/// Wait out `delay`, returning true if `cancel` fired first
async fn cancelled_during(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = sleep(delay) => false,
    }
}
