//! Retry coordinator: attempt counting keyed by operation id.
//!
//! Both the user-triggered retry path and the background poll loop go
//! through [`RetryCoordinator::run_with_retry`]; nothing else touches the
//! attempt table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use jobpulse_core::backoff::BackoffPolicy;
use jobpulse_core::classify::{classify, ClassifiedError, RawError};

/// Attempt ceiling for user-triggered operations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Per-operation retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Failed invocations recorded so far.
    pub attempts: u32,
    pub last_scheduled_delay: Duration,
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("operation '{operation_id}' failed after {attempts} attempt(s): {error}")]
pub struct RetryFailure {
    pub operation_id: String,
    /// Classification of the last failure.
    pub error: ClassifiedError,
    /// Total failed invocations.
    pub attempts: u32,
    /// `true` when the ceiling was reached; `false` when the error was
    /// not recoverable and retrying was skipped.
    pub exhausted: bool,
}

/// What to do after a failed invocation.
enum Next {
    Wait(u32, Duration),
    GiveUp(u32),
}

/// Shared attempt table plus the retry loop.
#[derive(Debug, Default)]
pub struct RetryCoordinator {
    states: Mutex<HashMap<String, RetryState>>,
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` until it succeeds or the failure is terminal.
    ///
    /// A failure is terminal when its kind is not transient (only
    /// network, timeout and server failures are retried) or when `max_attempts` failed invocations have been recorded for
    /// `operation_id`. Between attempts the coordinator sleeps
    /// `policy.delay(n)` where `n` counts retries from 0. The counter is
    /// shared: a concurrent call for the same id continues the existing
    /// count instead of starting a fresh one.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        mut operation: F,
        max_attempts: u32,
        policy: &BackoffPolicy,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let max_attempts = max_attempts.max(1);

        loop {
            let raw = match operation().await {
                Ok(value) => {
                    self.clear(operation_id);
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let error = classify(&raw);
            if !error.kind().is_transient() {
                let attempts = self.take_attempts(operation_id) + 1;
                tracing::warn!(
                    operation_id,
                    kind = error.kind().as_str(),
                    recoverable = error.recoverable(),
                    "Non-transient failure, not retrying",
                );
                return Err(RetryFailure {
                    operation_id: operation_id.to_string(),
                    error,
                    attempts,
                    exhausted: false,
                });
            }

            match self.record_failure(operation_id, max_attempts, policy) {
                Next::GiveUp(attempts) => {
                    tracing::warn!(
                        operation_id,
                        attempts,
                        kind = error.kind().as_str(),
                        "Retry ceiling reached",
                    );
                    return Err(RetryFailure {
                        operation_id: operation_id.to_string(),
                        error,
                        attempts,
                        exhausted: true,
                    });
                }
                Next::Wait(attempts, delay) => {
                    tracing::info!(
                        operation_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %raw,
                        "Retrying after failure",
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Failed invocations currently recorded for `operation_id`.
    pub fn attempts(&self, operation_id: &str) -> u32 {
        self.table().get(operation_id).map_or(0, |s| s.attempts)
    }

    pub fn state(&self, operation_id: &str) -> Option<RetryState> {
        self.table().get(operation_id).cloned()
    }

    pub fn clear(&self, operation_id: &str) {
        self.table().remove(operation_id);
    }

    pub fn clear_all(&self) {
        self.table().clear();
    }

    /// Number of operations with pending retry state.
    pub fn pending(&self) -> usize {
        self.table().len()
    }

    // ---- private helpers ----

    fn table(&self) -> MutexGuard<'_, HashMap<String, RetryState>> {
        // The table holds plain counters; a panic mid-update cannot leave
        // it in a state worse than a lost increment.
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_attempts(&self, operation_id: &str) -> u32 {
        self.table()
            .remove(operation_id)
            .map_or(0, |s| s.attempts)
    }

    fn record_failure(&self, operation_id: &str, max_attempts: u32, policy: &BackoffPolicy) -> Next {
        let mut table = self.table();
        let state = table
            .entry(operation_id.to_string())
            .or_insert_with(|| RetryState {
                attempts: 0,
                last_scheduled_delay: Duration::ZERO,
            });
        state.attempts += 1;
        let attempts = state.attempts;

        if attempts >= max_attempts {
            table.remove(operation_id);
            return Next::GiveUp(attempts);
        }

        let delay = policy.delay(attempts - 1);
        state.last_scheduled_delay = delay;
        Next::Wait(attempts, delay)
    }
}
