//! Job model: the tracked server-side operation and the snapshots that
//! describe it on the wire.
//!
//! Both transports deliver the same JSON shape ([`StatusPayload`]). It is
//! normalised into a [`JobSnapshot`] before being applied to a [`Job`].
//! The display percentage is deliberately *not* touched here; only
//! [`ProgressEstimator`](crate::estimator::ProgressEstimator) writes it.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::stage::Stage;
use crate::types::{ProgressId, Timestamp};

/// Lifecycle status of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Map a server status string onto the fixed status set.
    ///
    /// Unrecognised values are treated as `Processing`: the server is
    /// clearly doing *something*, and a terminal status must never be
    /// inferred from an unknown word.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "initializing" | "pending" | "queued" | "starting" => Self::Initializing,
            "completed" | "complete" | "done" | "success" => Self::Completed,
            "failed" | "error" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Processing,
        }
    }

    /// `true` for `completed`, `failed` and `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Raw status body as returned by the status endpoint and carried by
/// push events.
///
/// `success` defaults to `true` because push events omit it.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    #[serde(default = "default_success")]
    pub success: bool,
    pub status: Option<String>,
    pub percent_complete: Option<f64>,
    pub percentage: Option<f64>,
    pub message: Option<String>,
    pub current_operation: Option<String>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    /// Unix epoch seconds.
    pub start_time: Option<f64>,
    /// Unix epoch seconds.
    pub estimated_completion_time: Option<f64>,
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl StatusPayload {
    /// Normalise the wire body into a [`JobSnapshot`].
    ///
    /// `percent_complete` wins over `percentage`; values are clamped to
    /// 0-100 and non-finite numbers are dropped.
    pub fn into_snapshot(self) -> JobSnapshot {
        JobSnapshot {
            status: self.status.as_deref().map(JobStatus::from_wire),
            percentage: self
                .percent_complete
                .or(self.percentage)
                .filter(|p| p.is_finite())
                .map(|p| p.clamp(0.0, 100.0)),
            message: self.message,
            current_operation: self.current_operation,
            current_step: self.current_step,
            total_steps: self.total_steps,
            start_time: self.start_time.and_then(epoch_to_timestamp),
            estimated_completion_time: self.estimated_completion_time.and_then(epoch_to_timestamp),
            error: self.error,
        }
    }
}

fn epoch_to_timestamp(secs: f64) -> Option<Timestamp> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let millis = (secs * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// One observation of the job from either transport.
///
/// Every field is optional: a push event may carry only a percentage.
/// Two snapshots comparing equal are the same observation, which is what
/// transport deduplication relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub status: Option<JobStatus>,
    pub percentage: Option<f64>,
    pub message: Option<String>,
    pub current_operation: Option<String>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub start_time: Option<Timestamp>,
    pub estimated_completion_time: Option<Timestamp>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.current_operation = Some(operation.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// `true` if this snapshot reports a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(JobStatus::is_terminal)
    }
}

/// Client-side view of one tracked job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub progress_id: ProgressId,
    pub status: JobStatus,
    /// Last percentage reported by the server, if any.
    pub real_percentage: Option<f64>,
    /// Percentage shown to the user. Written only by the estimator.
    pub display_percentage: f64,
    pub current_operation: String,
    pub message: String,
    pub stage: Stage,
    pub current_step: u32,
    pub total_steps: u32,
    pub started_at: Timestamp,
    pub estimated_remaining_secs: Option<u64>,
    pub error: Option<String>,
    pub updated_at: Timestamp,
}

impl Job {
    /// A fresh job in `initializing` with a zero display percentage.
    pub fn new(progress_id: impl Into<ProgressId>, now: Timestamp) -> Self {
        Self {
            progress_id: progress_id.into(),
            status: JobStatus::Initializing,
            real_percentage: None,
            display_percentage: 0.0,
            current_operation: String::new(),
            message: String::new(),
            stage: Stage::Ocr,
            current_step: 0,
            total_steps: 0,
            started_at: now,
            estimated_remaining_secs: None,
            error: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a server snapshot into the job.
    ///
    /// Returns `false` without touching anything once the job is already
    /// terminal, so late arrivals from the slower transport cannot revive
    /// a finished job.
    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot, now: Timestamp) -> bool {
        if self.is_terminal() {
            return false;
        }

        if let Some(status) = snapshot.status {
            self.status = status;
        }
        if let Some(percentage) = snapshot.percentage {
            self.real_percentage = Some(percentage);
        }
        if let Some(ref operation) = snapshot.current_operation {
            self.current_operation.clone_from(operation);
        }
        if let Some(ref message) = snapshot.message {
            self.message.clone_from(message);
        }
        if let Some(step) = snapshot.current_step {
            self.current_step = step;
        }
        if let Some(total) = snapshot.total_steps {
            self.total_steps = total;
        }
        if let Some(started) = snapshot.start_time {
            self.started_at = started;
        }
        if let Some(eta) = snapshot.estimated_completion_time {
            self.estimated_remaining_secs = Some((eta - now).num_seconds().max(0) as u64);
        }
        if snapshot.error.is_some() {
            self.error.clone_from(&snapshot.error);
        }

        self.updated_at = now;
        true
    }

    /// `true` if anything other than `updated_at` differs from `other`.
    pub fn differs_from(&self, other: &Job) -> bool {
        Job {
            updated_at: other.updated_at,
            ..self.clone()
        } != *other
    }

    /// Text describing the failure, preferring the explicit error field.
    pub fn failure_message(&self) -> String {
        match (&self.error, self.message.is_empty()) {
            (Some(error), _) if !error.is_empty() => error.clone(),
            (_, false) => self.message.clone(),
            _ => "Processing failed".to_string(),
        }
    }
}

/// Reject empty or whitespace-only progress ids.
pub fn validate_progress_id(progress_id: &str) -> Result<(), CoreError> {
    if progress_id.trim().is_empty() {
        return Err(CoreError::InvalidArgument(
            "progress id must not be empty".to_string(),
        ));
    }
    Ok(())
}
