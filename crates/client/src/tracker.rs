//! Progress tracker: the facade rendering layers talk to.
//!
//! A [`ProgressTracker`] owns at most one session at a time. A session
//! ties one [`Job`] to one [`TransportCoordinator`] and one callback set,
//! and runs as a spawned task that applies transport events and periodic
//! estimator ticks. All session state sits behind one mutex; every
//! mutation first checks that the session that produced it is still the
//! current one, so late responses from a stopped or replaced session are
//! dropped without side effects. Callbacks are always invoked after the
//! lock is released.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use jobpulse_core::classify::{ClassifiedError, ErrorKind};
use jobpulse_core::error::CoreError;
use jobpulse_core::estimator::ProgressEstimator;
use jobpulse_core::job::{validate_progress_id, Job, JobStatus};
use jobpulse_core::stage::{StageChange, StageTracker};
use jobpulse_core::types::ProgressId;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::JobService;
use crate::callbacks::ProgressCallbacks;
use crate::client::PushTransport;
use crate::config::TrackerConfig;
use crate::events::TransportEvent;
use crate::reporter::ErrorReporter;
use crate::retry::{RetryCoordinator, RetryFailure};
use crate::transport::TransportCoordinator;

/// Operation id under which job-creation requests are retried.
pub const CREATE_OPERATION_ID: &str = "create";

/// Floor for the estimator tick.
const MIN_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No job is being tracked")]
    NoActiveSession,

    #[error("No job-creation request has been submitted")]
    NothingToRetry,

    #[error(transparent)]
    Request(#[from] RetryFailure),
}

impl From<CoreError> for TrackerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument(msg) => Self::InvalidArgument(msg),
        }
    }
}

/// Tracks one server-side job at a time.
///
/// Dropping the tracker stops the current session.
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    service: Arc<dyn JobService>,
    push: Option<Arc<dyn PushTransport>>,
    config: TrackerConfig,
    retry: Arc<RetryCoordinator>,
    reporter: Arc<ErrorReporter>,
    estimator: ProgressEstimator,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    /// Bumped on every successful `start`.
    generation: u64,
    session: Option<Session>,
    /// Last tracked job, kept after its session ends.
    job: Option<Job>,
    last_request: Option<serde_json::Value>,
    last_callbacks: Option<Arc<dyn ProgressCallbacks>>,
}

struct Session {
    generation: u64,
    progress_id: ProgressId,
    stages: StageTracker,
    callbacks: Arc<dyn ProgressCallbacks>,
    cancel: CancellationToken,
    completed_notified: bool,
}

/// Callback invocations collected under the lock, delivered after it.
enum Notification {
    Stage(StageChange),
    Progress(Job),
    Complete(Job),
    Error(ClassifiedError),
}

/// What the session loop should do after handling one step.
enum Outcome {
    Continue,
    /// The job completed; dwell, then close.
    Completed,
    /// The session is over (or was already replaced).
    Closed,
}

enum Step {
    Cancelled,
    Event(Option<TransportEvent>),
    Tick,
}

impl ProgressTracker {
    /// * `push` - `None` runs poll-only regardless of configuration.
    pub fn new(
        service: Arc<dyn JobService>,
        push: Option<Arc<dyn PushTransport>>,
        config: TrackerConfig,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        let estimator = ProgressEstimator::new(config.operation_class);
        Self {
            inner: Arc::new(TrackerInner {
                service,
                push,
                config,
                retry: Arc::new(RetryCoordinator::new()),
                reporter,
                estimator,
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    /// Begin tracking `progress_id`.
    ///
    /// Starting the id that is already being tracked is a no-op. Any
    /// other active session is torn down first. Must be called from
    /// within a tokio runtime.
    pub fn start(
        &self,
        progress_id: &str,
        callbacks: Arc<dyn ProgressCallbacks>,
    ) -> Result<(), TrackerError> {
        validate_progress_id(progress_id)?;
        let inner = &self.inner;

        let (generation, cancel) = {
            let mut state = inner.lock();
            if let Some(current) = &state.session {
                if current.progress_id == progress_id {
                    tracing::info!(progress_id, "Already tracking this job");
                    return Ok(());
                }
            }
            if let Some(previous) = state.session.take() {
                tracing::info!(
                    progress_id = %previous.progress_id,
                    "Replacing active tracking session",
                );
                previous.cancel.cancel();
            }
            inner.retry.clear_all();

            state.generation += 1;
            let generation = state.generation;
            let cancel = CancellationToken::new();
            state.job = Some(Job::new(progress_id, Utc::now()));
            state.last_callbacks = Some(Arc::clone(&callbacks));
            state.session = Some(Session {
                generation,
                progress_id: progress_id.to_string(),
                stages: StageTracker::new(),
                callbacks,
                cancel: cancel.clone(),
                completed_notified: false,
            });
            (generation, cancel)
        };

        let transport = TransportCoordinator::start(
            progress_id,
            inner.config.transport.clone(),
            Arc::clone(&inner.service),
            inner.push.clone(),
            Arc::clone(&inner.retry),
            cancel.child_token(),
        );

        tracing::info!(progress_id, generation, "Tracking started");
        let handle = tokio::spawn(run_session(Arc::clone(inner), generation, transport, cancel));
        inner.reporter.watch_task(handle, "progress-session");
        Ok(())
    }

    /// Stop tracking without notifying any callback.
    pub fn stop(&self) {
        let session = self.inner.lock().session.take();
        if let Some(session) = session {
            session.cancel.cancel();
            tracing::info!(progress_id = %session.progress_id, "Tracking stopped");
        }
        self.inner.retry.clear_all();
    }

    /// Cancel the tracked job.
    ///
    /// The job is marked cancelled and `on_progress` fires immediately;
    /// the server is told in the background and a failure there is only
    /// logged.
    pub fn cancel(&self) -> Result<(), TrackerError> {
        let (session, job) = {
            let mut state = self.inner.lock();
            let session = state.session.take().ok_or(TrackerError::NoActiveSession)?;
            session.cancel.cancel();
            let job = state.job.as_mut().map(|job| {
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
                job.clone()
            });
            (session, job)
        };
        self.inner.retry.clear_all();

        if let Some(job) = job {
            session.callbacks.on_progress(&job);
        }

        let service = Arc::clone(&self.inner.service);
        let progress_id = session.progress_id;
        tracing::info!(progress_id = %progress_id, "Cancelling job");
        tokio::spawn(async move {
            match service.cancel(&progress_id).await {
                Ok(()) => tracing::info!(progress_id = %progress_id, "Server acknowledged cancel"),
                Err(e) => tracing::warn!(
                    progress_id = %progress_id,
                    error = %e,
                    "Cancel request failed",
                ),
            }
        });
        Ok(())
    }

    /// Submit a job-creation request and track the job it creates.
    ///
    /// The request is remembered for [`retry`](Self::retry).
    pub async fn submit(
        &self,
        request: serde_json::Value,
        callbacks: Arc<dyn ProgressCallbacks>,
    ) -> Result<ProgressId, TrackerError> {
        {
            let mut state = self.inner.lock();
            state.last_request = Some(request.clone());
            state.last_callbacks = Some(Arc::clone(&callbacks));
        }
        let progress_id = self.create_job(&request, callbacks.as_ref()).await?;
        self.start(&progress_id, callbacks)?;
        Ok(progress_id)
    }

    /// Re-issue the last submitted request and track the new job with
    /// the previous callbacks.
    pub async fn retry(&self) -> Result<ProgressId, TrackerError> {
        let (request, callbacks) = {
            let state = self.inner.lock();
            (state.last_request.clone(), state.last_callbacks.clone())
        };
        let (Some(request), Some(callbacks)) = (request, callbacks) else {
            return Err(TrackerError::NothingToRetry);
        };

        tracing::info!("Retrying job creation");
        let progress_id = self.create_job(&request, callbacks.as_ref()).await?;
        self.start(&progress_id, callbacks)?;
        Ok(progress_id)
    }

    /// Copy of the tracked job, including after its session ended.
    pub fn get_current_progress(&self) -> Option<Job> {
        self.inner.lock().job.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// Id of the job of the active session.
    pub fn progress_id(&self) -> Option<ProgressId> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.progress_id.clone())
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.inner.reporter
    }

    async fn create_job(
        &self,
        request: &serde_json::Value,
        callbacks: &dyn ProgressCallbacks,
    ) -> Result<ProgressId, TrackerError> {
        let inner = &self.inner;
        let result = inner
            .retry
            .run_with_retry(
                CREATE_OPERATION_ID,
                || inner.service.create(request),
                inner.config.create_max_attempts,
                &inner.config.generic_backoff,
            )
            .await;

        match result {
            Ok(progress_id) => {
                tracing::info!(progress_id = %progress_id, "Job created");
                Ok(progress_id)
            }
            Err(failure) => {
                inner.reporter.record(&failure.error);
                callbacks.on_error(&failure.error);
                Err(failure.into())
            }
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if let Some(session) = self.inner.lock().session.take() {
            session.cancel.cancel();
        }
    }
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one transport event to the session of `generation`.
    fn handle_event(&self, generation: u64, event: TransportEvent) -> Outcome {
        let mut notes = Vec::new();
        let (outcome, callbacks) = {
            let mut state = self.lock();
            let TrackerState { session, job, .. } = &mut *state;
            let (Some(session), Some(job)) = (session.as_mut(), job.as_mut()) else {
                return Outcome::Closed;
            };
            if session.generation != generation {
                return Outcome::Closed;
            }
            let callbacks = Arc::clone(&session.callbacks);

            let outcome = match event {
                TransportEvent::Snapshot { source, snapshot } => {
                    let now = Utc::now();
                    let before = job.clone();
                    if !job.apply_snapshot(&snapshot, now) {
                        tracing::trace!(
                            progress_id = %session.progress_id,
                            source = source.as_str(),
                            "Ignoring update for finished job",
                        );
                        return Outcome::Continue;
                    }
                    if snapshot.current_operation.is_some() {
                        if let Some(change) = session.stages.observe(&job.current_operation) {
                            job.stage = change.new;
                            notes.push(Notification::Stage(change));
                        }
                    }
                    self.estimator.advance(job, now);
                    if !job.differs_from(&before) {
                        tracing::trace!(
                            progress_id = %session.progress_id,
                            source = source.as_str(),
                            "Update changed nothing",
                        );
                        return Outcome::Continue;
                    }
                    notes.push(Notification::Progress(job.clone()));

                    match job.status {
                        JobStatus::Completed => {
                            if !session.completed_notified {
                                session.completed_notified = true;
                                notes.push(Notification::Complete(job.clone()));
                            }
                            tracing::info!(progress_id = %session.progress_id, "Job completed");
                            Outcome::Completed
                        }
                        JobStatus::Failed => {
                            let error = ClassifiedError::from_job_failure(&job.failure_message());
                            tracing::warn!(
                                progress_id = %session.progress_id,
                                error = %error,
                                "Job failed",
                            );
                            self.reporter.record(&error);
                            notes.push(Notification::Error(error));
                            Outcome::Closed
                        }
                        JobStatus::Cancelled => {
                            tracing::info!(progress_id = %session.progress_id, "Job cancelled by server");
                            Outcome::Closed
                        }
                        JobStatus::Initializing | JobStatus::Processing => Outcome::Continue,
                    }
                }
                TransportEvent::PushConnected => {
                    tracing::debug!(progress_id = %session.progress_id, "Push channel active");
                    Outcome::Continue
                }
                TransportEvent::PushDisconnected => {
                    tracing::debug!(progress_id = %session.progress_id, "Push channel lost, polling");
                    Outcome::Continue
                }
                TransportEvent::PollFailed(failure) => {
                    let error = if failure.exhausted {
                        ClassifiedError::poll_exhausted(&failure.error, failure.attempts)
                    } else {
                        failure.error
                    };
                    tracing::error!(
                        progress_id = %session.progress_id,
                        error = %error,
                        "Lost contact with job status",
                    );
                    self.reporter.record(&error);
                    notes.push(Notification::Error(error));
                    Outcome::Closed
                }
            };

            if matches!(outcome, Outcome::Closed) {
                end_session(&mut state);
            }
            (outcome, callbacks)
        };

        dispatch(callbacks.as_ref(), notes);
        outcome
    }

    /// Advance the synthetic estimate between server updates.
    fn handle_tick(&self, generation: u64) -> Outcome {
        let (job, callbacks) = {
            let mut state = self.lock();
            let TrackerState { session, job, .. } = &mut *state;
            let (Some(session), Some(job)) = (session.as_ref(), job.as_mut()) else {
                return Outcome::Closed;
            };
            if session.generation != generation {
                return Outcome::Closed;
            }
            if job.is_terminal() || !self.estimator.advance(job, Utc::now()) {
                return Outcome::Continue;
            }
            (job.clone(), Arc::clone(&session.callbacks))
        };

        callbacks.on_progress(&job);
        Outcome::Continue
    }

    /// Both transports ended without a terminal status.
    fn handle_transport_closed(&self, generation: u64) -> Outcome {
        let (error, callbacks) = {
            let mut state = self.lock();
            let Some(session) = state.session.as_ref() else {
                return Outcome::Closed;
            };
            if session.generation != generation {
                return Outcome::Closed;
            }
            let callbacks = Arc::clone(&session.callbacks);
            let error = ClassifiedError::new(ErrorKind::Network, "all transports closed");
            tracing::error!(progress_id = %session.progress_id, "All transports closed");
            self.reporter.record(&error);
            end_session(&mut state);
            (error, callbacks)
        };

        callbacks.on_error(&error);
        Outcome::Closed
    }

    /// End the session of `generation` after its completion dwell.
    fn close(&self, generation: u64) {
        let mut state = self.lock();
        if state
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
        {
            end_session(&mut state);
        }
    }
}

fn end_session(state: &mut TrackerState) {
    if let Some(session) = state.session.take() {
        session.cancel.cancel();
        tracing::debug!(progress_id = %session.progress_id, "Session closed");
    }
}

fn dispatch(callbacks: &dyn ProgressCallbacks, notes: Vec<Notification>) {
    for note in notes {
        match note {
            Notification::Stage(change) => callbacks.on_stage_change(change.new, change.old),
            Notification::Progress(job) => callbacks.on_progress(&job),
            Notification::Complete(job) => callbacks.on_complete(&job),
            Notification::Error(error) => callbacks.on_error(&error),
        }
    }
}

async fn run_session(
    inner: Arc<TrackerInner>,
    generation: u64,
    mut transport: TransportCoordinator,
    cancel: CancellationToken,
) {
    // `interval` panics on zero; configs that skipped `validate` still run.
    let mut ticker = tokio::time::interval(inner.config.tick_interval.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut transport_open = true;

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            event = transport.next(), if transport_open => Step::Event(event),
            _ = ticker.tick() => Step::Tick,
        };

        let outcome = match step {
            Step::Cancelled => break,
            Step::Event(Some(event)) => inner.handle_event(generation, event),
            Step::Event(None) => {
                transport_open = false;
                inner.handle_transport_closed(generation)
            }
            Step::Tick => inner.handle_tick(generation),
        };

        match outcome {
            Outcome::Continue => {}
            Outcome::Closed => break,
            Outcome::Completed => {
                transport.stop();
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(inner.config.completion_dwell) => {}
                }
                inner.close(generation);
                break;
            }
        }
    }

    transport.stop();
    tracing::debug!(generation, "Session task exited");
}
