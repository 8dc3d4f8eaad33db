//! Catch-all error reporter.
//!
//! [`ErrorReporter`] keeps a bounded history of every failure it sees and
//! broadcasts the high-severity ones to notification subscribers. It is
//! shared via `Arc<ErrorReporter>` between the tracker, the session
//! tasks, and the process panic hook.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

use jobpulse_core::classify::{classify, ClassifiedError, RawError, Severity};
use jobpulse_core::error_history::{ErrorHistory, DEFAULT_HISTORY_CAPACITY};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffer for high-severity notifications.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

pub struct ErrorReporter {
    history: Mutex<ErrorHistory>,
    notify_tx: broadcast::Sender<ClassifiedError>,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ErrorReporter {
    pub fn new(history_capacity: usize) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            history: Mutex::new(ErrorHistory::new(history_capacity)),
            notify_tx,
        }
    }

    /// Add an already-classified error to the history without notifying.
    pub fn record(&self, error: &ClassifiedError) {
        tracing::debug!(
            error_id = %error.error_id(),
            kind = error.kind().as_str(),
            "Recorded error",
        );
        self.lock_history().push(error.clone());
    }

    /// Classify and record an uncaught failure.
    ///
    /// High-severity errors are broadcast to subscribers; the classified
    /// error is returned either way so the caller can handle low and
    /// medium ones itself.
    pub fn report(&self, raw: &RawError) -> ClassifiedError {
        let error = classify(raw);
        self.record(&error);

        if error.severity() >= Severity::High {
            tracing::error!(
                error_id = %error.error_id(),
                kind = error.kind().as_str(),
                technical = error.technical_message(),
                "Unhandled failure",
            );
            // Zero receivers is fine.
            let _ = self.notify_tx.send(error.clone());
        } else {
            tracing::warn!(
                error_id = %error.error_id(),
                kind = error.kind().as_str(),
                "Unhandled failure",
            );
        }
        error
    }

    /// Receive every high-severity error reported from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClassifiedError> {
        self.notify_tx.subscribe()
    }

    /// Copy of the recorded errors, oldest first.
    pub fn history(&self) -> Vec<ClassifiedError> {
        self.lock_history().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<ClassifiedError> {
        self.lock_history().latest().cloned()
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    /// Route panics from any thread into the reporter, then run the
    /// previously installed hook.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let reporter = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(reporter) = reporter.upgrade() {
                let message = panic_message(info.payload());
                let location = info
                    .location()
                    .map(|l| format!(" at {}:{}", l.file(), l.line()))
                    .unwrap_or_default();
                reporter.report(&RawError::message(format!("panic{location}: {message}")));
            }
            previous(info);
        }));
    }

    /// Watch a spawned task and record it if it panics.
    pub fn watch_task(self: &Arc<Self>, handle: JoinHandle<()>, task_name: &'static str) {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic().as_ref());
                    reporter.report(&RawError::message(format!(
                        "task '{task_name}' panicked: {message}"
                    )));
                }
                Err(_) => tracing::debug!(task = task_name, "Task cancelled"),
            }
        });
    }

    fn lock_history(&self) -> MutexGuard<'_, ErrorHistory> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use jobpulse_core::classify::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn only_high_severity_errors_are_broadcast() {
        let reporter = ErrorReporter::default();
        let mut rx = reporter.subscribe();

        let low = reporter.report(&RawError::http(422, "bad field"));
        assert_eq!(low.severity(), Severity::Low);
        let high = reporter.report(&RawError::http(500, "boom"));
        assert_eq!(high.severity(), Severity::High);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.error_id(), high.error_id());
        assert!(rx.try_recv().is_err());
        assert_eq!(reporter.history().len(), 2);
    }

    #[test]
    fn history_is_bounded() {
        let reporter = ErrorReporter::new(3);
        for i in 0..5 {
            reporter.record(&ClassifiedError::new(ErrorKind::Unknown, format!("e{i}")));
        }
        let history = reporter.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].technical_message(), "e2");
        assert_eq!(reporter.latest().unwrap().technical_message(), "e4");

        reporter.clear_history();
        assert!(reporter.history().is_empty());
    }

    #[tokio::test]
    async fn panicking_task_is_recorded() {
        let reporter = Arc::new(ErrorReporter::default());
        let mut rx = reporter.subscribe();

        let handle = tokio::spawn(async {
            panic!("network error inside session");
        });
        reporter.watch_task(handle, "session");

        // "network error" classifies as high severity, so it is broadcast.
        let error = rx.recv().await.unwrap();
        assert_eq!(error.kind(), ErrorKind::Network);
        assert!(error.technical_message().contains("session"));
    }
}
