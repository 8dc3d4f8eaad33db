//! Transport coordinator: one push subscription plus one poll loop per
//! tracked job, merged into a single deduplicated event stream.
//!
//! The push channel is preferred but treated as best-effort. The poll
//! loop is the reliability floor: it starts immediately when polling is
//! enabled and is started on demand whenever push drops. Once started it
//! keeps running until the job reaches a terminal status or the
//! coordinator is stopped, even if push comes back.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use jobpulse_core::backoff::BackoffPolicy;
use jobpulse_core::job::JobSnapshot;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::JobService;
use crate::client::{PushSubscription, PushTransport};
use crate::events::{TransportEvent, UpdateSource};
use crate::reconnect::reconnect_loop;
use crate::retry::RetryCoordinator;

/// Default ceiling for consecutive poll failures.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 5;

/// Transport behaviour for one session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub push_enabled: bool,
    pub polling_enabled: bool,
    /// Wait between successful polls.
    pub poll_interval: Duration,
    /// Failed polls tolerated before giving up.
    pub poll_max_attempts: u32,
    /// Backoff between failed polls.
    pub poll_backoff: BackoffPolicy,
    /// Backoff between push resubscription attempts.
    pub reconnect_backoff: BackoffPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            push_enabled: false,
            polling_enabled: true,
            poll_interval: Duration::from_millis(2000),
            poll_max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            poll_backoff: BackoffPolicy::poll_failure(),
            reconnect_backoff: BackoffPolicy::generic(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Disconnected,
    Connecting,
    Active,
}

/// Observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportState {
    pub push: PushState,
    pub polling_active: bool,
    pub stopped: bool,
}

/// State shared between the consumer handle and the producer tasks.
struct Shared {
    progress_id: String,
    config: TransportConfig,
    service: Arc<dyn JobService>,
    retry: Arc<RetryCoordinator>,
    cancel: CancellationToken,
    state: Mutex<TransportState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_push(&self, push: PushState) {
        self.state().push = push;
    }

    fn poll_operation_id(&self) -> String {
        format!("poll:{}", self.progress_id)
    }
}

/// Why a push pump returned.
enum PumpExit {
    Cancelled,
    Terminal,
    Dropped,
    ConsumerGone,
}

/// Consumer handle for one job's transports.
///
/// Producers stop when [`stop`](Self::stop) is called, when a terminal
/// snapshot passes through [`next`](Self::next), or when the handle is
/// dropped.
pub struct TransportCoordinator {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    last_snapshot: Option<JobSnapshot>,
}

impl TransportCoordinator {
    /// Start the producers for `progress_id`.
    ///
    /// Must be called from within a tokio runtime. `cancel` is usually a
    /// child of the owning session's token.
    pub fn start(
        progress_id: impl Into<String>,
        config: TransportConfig,
        service: Arc<dyn JobService>,
        push: Option<Arc<dyn PushTransport>>,
        retry: Arc<RetryCoordinator>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let push = push.filter(|_| config.push_enabled);
        let polling_enabled = config.polling_enabled;

        let shared = Arc::new(Shared {
            progress_id: progress_id.into(),
            config,
            service,
            retry,
            cancel,
            state: Mutex::new(TransportState {
                push: PushState::Disconnected,
                polling_active: false,
                stopped: false,
            }),
        });

        tracing::info!(
            progress_id = %shared.progress_id,
            push = push.is_some(),
            polling = polling_enabled,
            "Starting transports",
        );

        let push_started = match push {
            Some(push) => {
                shared.set_push(PushState::Connecting);
                tokio::spawn(push_loop(Arc::clone(&shared), push, tx.clone()));
                true
            }
            None => false,
        };

        if polling_enabled || !push_started {
            ensure_polling(&shared, &tx);
        }

        Self {
            shared,
            events,
            last_snapshot: None,
        }
    }

    /// Next event, with consecutive identical snapshots collapsed.
    ///
    /// A terminal snapshot stops both producers before it is returned.
    /// Returns `None` once every producer has exited and the buffered
    /// events are drained.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        loop {
            let event = self.events.recv().await?;

            if let TransportEvent::Snapshot { source, ref snapshot } = event {
                if self.last_snapshot.as_ref() == Some(snapshot) {
                    tracing::trace!(
                        progress_id = %self.shared.progress_id,
                        source = source.as_str(),
                        "Duplicate snapshot dropped",
                    );
                    continue;
                }
                self.last_snapshot = Some(snapshot.clone());

                if snapshot.is_terminal() {
                    tracing::debug!(
                        progress_id = %self.shared.progress_id,
                        source = source.as_str(),
                        "Terminal snapshot, releasing transports",
                    );
                    self.stop();
                }
            }

            return Some(event);
        }
    }

    /// Stop both producers and release their resources. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.shared.cancel.cancel();
        self.shared.retry.clear(&self.shared.poll_operation_id());
        tracing::debug!(progress_id = %self.shared.progress_id, "Transports stopped");
    }

    pub fn state(&self) -> TransportState {
        *self.shared.state()
    }

    pub fn progress_id(&self) -> &str {
        &self.shared.progress_id
    }
}

impl Drop for TransportCoordinator {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Spawn the poll loop unless it is already running.
fn ensure_polling(shared: &Arc<Shared>, tx: &mpsc::UnboundedSender<TransportEvent>) {
    {
        let mut state = shared.state();
        if state.polling_active || state.stopped || shared.cancel.is_cancelled() {
            return;
        }
        state.polling_active = true;
    }
    tracing::info!(progress_id = %shared.progress_id, "Starting status polling");
    tokio::spawn(poll_loop(Arc::clone(shared), tx.clone()));
}

async fn poll_loop(shared: Arc<Shared>, tx: mpsc::UnboundedSender<TransportEvent>) {
    let operation_id = shared.poll_operation_id();
    let progress_id = shared.progress_id.as_str();

    loop {
        let fetch = shared.retry.run_with_retry(
            &operation_id,
            || shared.service.fetch_status(progress_id),
            shared.config.poll_max_attempts,
            &shared.config.poll_backoff,
        );

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            result = fetch => Some(result),
        };

        let keep_going = match result {
            None => false,
            Some(Ok(snapshot)) => {
                let terminal = snapshot.is_terminal();
                let delivered = tx
                    .send(TransportEvent::Snapshot {
                        source: UpdateSource::Poll,
                        snapshot,
                    })
                    .is_ok();
                delivered && !terminal
            }
            Some(Err(failure)) => {
                tracing::warn!(
                    progress_id,
                    attempts = failure.attempts,
                    exhausted = failure.exhausted,
                    error = %failure.error,
                    "Status polling failed",
                );
                let _ = tx.send(TransportEvent::PollFailed(failure));
                false
            }
        };
        if !keep_going {
            break;
        }

        let cancelled = tokio::select! {
            _ = shared.cancel.cancelled() => true,
            _ = tokio::time::sleep(shared.config.poll_interval) => false,
        };
        if cancelled {
            break;
        }
    }

    shared.state().polling_active = false;
    tracing::debug!(progress_id, "Status polling ended");
}

async fn push_loop(
    shared: Arc<Shared>,
    push: Arc<dyn PushTransport>,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let progress_id = shared.progress_id.as_str();

    let initial = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        result = push.subscribe(progress_id) => result,
    };
    let mut subscription = match initial {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::warn!(progress_id, error = %e, "Push subscribe failed, falling back to polling");
            None
        }
    };

    loop {
        if let Some(mut active) = subscription.take() {
            shared.set_push(PushState::Active);
            if tx.send(TransportEvent::PushConnected).is_err() {
                break;
            }

            let exit = pump(&shared, &mut active, &tx).await;
            // Dropping the subscription leaves the room.
            drop(active);

            match exit {
                PumpExit::Dropped => {
                    shared.set_push(PushState::Disconnected);
                    tracing::warn!(progress_id, "Push channel lost");
                    let _ = tx.send(TransportEvent::PushDisconnected);
                }
                PumpExit::Cancelled | PumpExit::Terminal | PumpExit::ConsumerGone => break,
            }
        } else {
            shared.set_push(PushState::Disconnected);
        }

        ensure_polling(&shared, &tx);

        shared.set_push(PushState::Connecting);
        match reconnect_loop(
            push.as_ref(),
            progress_id,
            &shared.config.reconnect_backoff,
            &shared.cancel,
        )
        .await
        {
            Some(restored) => subscription = Some(restored),
            None => break,
        }
    }

    shared.set_push(PushState::Disconnected);
    tracing::debug!(progress_id, "Push loop ended");
}

/// Forward messages from one subscription until it ends.
async fn pump(
    shared: &Shared,
    subscription: &mut PushSubscription,
    tx: &mpsc::UnboundedSender<TransportEvent>,
) -> PumpExit {
    loop {
        let message = tokio::select! {
            _ = shared.cancel.cancelled() => return PumpExit::Cancelled,
            message = subscription.next() => message,
        };
        let Some(message) = message else {
            return PumpExit::Dropped;
        };

        let snapshot = message.into_snapshot();
        let terminal = snapshot.is_terminal();
        if tx
            .send(TransportEvent::Snapshot {
                source: UpdateSource::Push,
                snapshot,
            })
            .is_err()
        {
            return PumpExit::ConsumerGone;
        }
        if terminal {
            return PumpExit::Terminal;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use jobpulse_core::classify::{ErrorKind, RawError};
    use jobpulse_core::job::JobStatus;
    use jobpulse_core::types::ProgressId;

    use super::*;
    use crate::client::PushError;
    use crate::messages::{parse_message, PushMessage};

    /// Returns scripted responses in order, then the last one forever.
    struct ScriptedService {
        responses: Mutex<VecDeque<Result<JobSnapshot, RawError>>>,
    }

    impl ScriptedService {
        fn new(responses: Vec<Result<JobSnapshot, RawError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl JobService for ScriptedService {
        async fn fetch_status(&self, _progress_id: &str) -> Result<JobSnapshot, RawError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            }
        }

        async fn cancel(&self, _progress_id: &str) -> Result<(), RawError> {
            Ok(())
        }

        async fn create(&self, _request: &serde_json::Value) -> Result<ProgressId, RawError> {
            Ok("job-new".into())
        }
    }

    /// Hands out pre-built subscriptions, then refuses.
    struct ScriptedPush {
        subscriptions: Mutex<VecDeque<PushSubscription>>,
    }

    #[async_trait]
    impl PushTransport for ScriptedPush {
        async fn subscribe(&self, _progress_id: &str) -> Result<PushSubscription, PushError> {
            self.subscriptions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| PushError::Connection("refused".into()))
        }
    }

    fn processing(pct: f64) -> JobSnapshot {
        JobSnapshot::default()
            .with_status(JobStatus::Processing)
            .with_percentage(pct)
    }

    fn completed() -> JobSnapshot {
        JobSnapshot::default()
            .with_status(JobStatus::Completed)
            .with_percentage(100.0)
    }

    fn poll_only() -> TransportConfig {
        TransportConfig {
            poll_backoff: BackoffPolicy::poll_failure().without_jitter(),
            ..TransportConfig::default()
        }
    }

    fn start(
        config: TransportConfig,
        service: Arc<dyn JobService>,
        push: Option<Arc<dyn PushTransport>>,
    ) -> TransportCoordinator {
        TransportCoordinator::start(
            "job-1",
            config,
            service,
            push,
            Arc::new(RetryCoordinator::new()),
            CancellationToken::new(),
        )
    }

    fn progress_message(pct: u32) -> PushMessage {
        parse_message(&format!(
            r#"{{"type":"progress_update","data":{{"progress_id":"job-1","status":"processing","percentage":{pct}}}}}"#
        ))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn polling_delivers_snapshots_until_terminal() {
        let service = ScriptedService::new(vec![Ok(processing(10.0)), Ok(completed())]);
        let mut transport = start(poll_only(), service, None);

        assert_matches!(
            transport.next().await,
            Some(TransportEvent::Snapshot { source: UpdateSource::Poll, .. })
        );
        assert_matches!(
            transport.next().await,
            Some(TransportEvent::Snapshot { snapshot, .. }) if snapshot.is_terminal()
        );
        assert!(transport.next().await.is_none());
        assert!(transport.state().stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_snapshots_are_collapsed() {
        let service = ScriptedService::new(vec![
            Ok(processing(20.0)),
            Ok(processing(20.0)),
            Ok(processing(20.0)),
            Ok(processing(30.0)),
            Ok(completed()),
        ]);
        let mut transport = start(poll_only(), service, None);

        let mut seen = Vec::new();
        while let Some(event) = transport.next().await {
            if let TransportEvent::Snapshot { snapshot, .. } = event {
                seen.push(snapshot.percentage);
            }
        }
        assert_eq!(seen, vec![Some(20.0), Some(30.0), Some(100.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_polling_reports_failure() {
        let service = ScriptedService::new(vec![Err(RawError::offline())]);
        let mut transport = start(poll_only(), service, None);

        let event = transport.next().await;
        assert_matches!(event, Some(TransportEvent::PollFailed(failure)) => {
            assert!(failure.exhausted);
            assert_eq!(failure.attempts, DEFAULT_POLL_MAX_ATTEMPTS);
            assert_eq!(failure.error.kind(), ErrorKind::Network);
        });
        assert!(!transport.state().polling_active);
    }

    #[tokio::test(start_paused = true)]
    async fn push_loss_starts_polling() {
        let (push_tx, push_rx) = mpsc::channel(8);
        let push = Arc::new(ScriptedPush {
            subscriptions: Mutex::new(VecDeque::from([PushSubscription::new(
                push_rx,
                CancellationToken::new(),
            )])),
        });
        let service = ScriptedService::new(vec![Ok(processing(50.0)), Ok(completed())]);
        let config = TransportConfig {
            push_enabled: true,
            polling_enabled: false,
            ..poll_only()
        };
        let mut transport = start(config, service, Some(push));

        assert_matches!(transport.next().await, Some(TransportEvent::PushConnected));
        assert!(!transport.state().polling_active);

        push_tx.send(progress_message(25)).await.unwrap();
        assert_matches!(
            transport.next().await,
            Some(TransportEvent::Snapshot { source: UpdateSource::Push, .. })
        );

        drop(push_tx);
        assert_matches!(transport.next().await, Some(TransportEvent::PushDisconnected));
        assert_matches!(
            transport.next().await,
            Some(TransportEvent::Snapshot { source: UpdateSource::Poll, snapshot })
                if snapshot.percentage == Some(50.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_subscribe_falls_back_to_polling() {
        let push = Arc::new(ScriptedPush {
            subscriptions: Mutex::new(VecDeque::new()),
        });
        let service = ScriptedService::new(vec![Ok(completed())]);
        let config = TransportConfig {
            push_enabled: true,
            polling_enabled: false,
            ..poll_only()
        };
        let mut transport = start(config, service, Some(push));

        assert_matches!(
            transport.next().await,
            Some(TransportEvent::Snapshot { source: UpdateSource::Poll, .. })
        );
        assert!(transport.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_stream() {
        let service = ScriptedService::new(vec![Ok(processing(5.0))]);
        let mut transport = start(poll_only(), service, None);

        assert_matches!(transport.next().await, Some(TransportEvent::Snapshot { .. }));
        transport.stop();
        assert!(transport.next().await.is_none());
        assert_eq!(
            transport.state(),
            TransportState {
                push: PushState::Disconnected,
                polling_active: false,
                stopped: true,
            }
        );
    }
}
