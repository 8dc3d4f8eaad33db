//! Shared fakes for the client integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobpulse_client::api::JobService;
use jobpulse_client::callbacks::ProgressCallbacks;
use jobpulse_client::client::{PushError, PushSubscription, PushTransport};
use jobpulse_client::messages::{parse_message, PushMessage};
use jobpulse_core::classify::{ClassifiedError, ErrorKind, RawError};
use jobpulse_core::job::{Job, JobSnapshot, JobStatus};
use jobpulse_core::stage::Stage;
use jobpulse_core::types::ProgressId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// JobService
// ---------------------------------------------------------------------------

/// Status fetches wait for the test to feed a response; they stay
/// in flight until it does.
pub struct ScriptedService {
    responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<JobSnapshot, RawError>>>,
    created: Mutex<VecDeque<Result<ProgressId, RawError>>>,
    cancelled: Mutex<Vec<String>>,
    fetches: AtomicU32,
}

impl ScriptedService {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<JobSnapshot, RawError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            responses: tokio::sync::Mutex::new(rx),
            created: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(Vec::new()),
            fetches: AtomicU32::new(0),
        });
        (service, tx)
    }

    pub fn script_create(&self, results: Vec<Result<ProgressId, RawError>>) {
        self.created.lock().unwrap().extend(results);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobService for ScriptedService {
    async fn fetch_status(&self, _progress_id: &str) -> Result<JobSnapshot, RawError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().await;
        match responses.recv().await {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }

    async fn cancel(&self, progress_id: &str) -> Result<(), RawError> {
        self.cancelled.lock().unwrap().push(progress_id.to_string());
        Ok(())
    }

    async fn create(&self, _request: &serde_json::Value) -> Result<ProgressId, RawError> {
        self.created
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RawError::message("no scripted create response")))
    }
}

// ---------------------------------------------------------------------------
// PushTransport
// ---------------------------------------------------------------------------

/// Hands out subscriptions the test feeds through the returned senders;
/// refuses once they run out.
pub struct ScriptedPush {
    subscriptions: Mutex<VecDeque<PushSubscription>>,
}

impl ScriptedPush {
    pub fn with_rooms(count: usize) -> (Arc<Self>, Vec<mpsc::Sender<PushMessage>>) {
        let mut subscriptions = VecDeque::new();
        let mut senders = Vec::new();
        for _ in 0..count {
            let (tx, rx) = mpsc::channel(16);
            subscriptions.push_back(PushSubscription::new(rx, CancellationToken::new()));
            senders.push(tx);
        }
        let push = Arc::new(Self {
            subscriptions: Mutex::new(subscriptions),
        });
        (push, senders)
    }
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

pub fn push_message(json: &str) -> PushMessage {
    parse_message(json).expect("valid push message")
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Progress { display: f64, status: JobStatus },
    Stage { new: Stage, old: Stage },
    Complete { display: f64 },
    Error { kind: ErrorKind, message: String },
}

/// Forwards every callback into a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Call>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ProgressCallbacks for Recorder {
    fn on_progress(&self, job: &Job) {
        let _ = self.tx.send(Call::Progress {
            display: job.display_percentage,
            status: job.status,
        });
    }

    fn on_stage_change(&self, new: Stage, old: Stage) {
        let _ = self.tx.send(Call::Stage { new, old });
    }

    fn on_complete(&self, job: &Job) {
        let _ = self.tx.send(Call::Complete {
            display: job.display_percentage,
        });
    }

    fn on_error(&self, error: &ClassifiedError) {
        let _ = self.tx.send(Call::Error {
            kind: error.kind(),
            message: error.user_message().to_string(),
        });
    }
}

/// Next callback, failing the test if none arrives within a minute of
/// (virtual) time.
pub async fn next_call(rx: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("callback within timeout")
        .expect("recorder alive")
}

/// Drain callbacks until `done` matches one, returning everything seen.
pub async fn calls_until(
    rx: &mut mpsc::UnboundedReceiver<Call>,
    done: impl Fn(&Call) -> bool,
) -> Vec<Call> {
    let mut seen = Vec::new();
    loop {
        let call = next_call(rx).await;
        let finished = done(&call);
        seen.push(call);
        if finished {
            return seen;
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

pub fn processing(pct: f64) -> JobSnapshot {
    JobSnapshot::default()
        .with_status(JobStatus::Processing)
        .with_percentage(pct)
}

pub fn completed() -> JobSnapshot {
    JobSnapshot::default()
        .with_status(JobStatus::Completed)
        .with_percentage(100.0)
}
