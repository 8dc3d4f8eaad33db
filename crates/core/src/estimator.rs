//! Display-progress estimation.
//!
//! Servers report progress sparsely and sometimes not at all for long
//! stretches. The estimator fills those gaps with a synthetic,
//! time-based curve while guaranteeing the displayed value never moves
//! backwards within one job.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};
use crate::types::Timestamp;

/// Real progress at or above this value is trusted as-is.
pub const REAL_PRECEDENCE_THRESHOLD: f64 = 90.0;

/// Synthetic progress only kicks in after this many seconds.
pub const SYNTHETIC_GRACE_SECS: f64 = 2.0;

/// Ceiling of every synthetic curve; only real data moves past it.
pub const SYNTHETIC_CEILING: f64 = 90.0;

/// Which synthetic schedule a job follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// OCR and grading jobs: tens of seconds.
    #[default]
    Document,
    /// Model training jobs: minutes.
    Training,
}

impl OperationClass {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "document" | "ocr" | "grading" => Some(Self::Document),
            "training" => Some(Self::Training),
            _ => None,
        }
    }
}

/// One linear segment: from `(start_secs, start_pct)` to
/// `(end_secs, end_pct)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start_secs: f64,
    end_secs: f64,
    start_pct: f64,
    end_pct: f64,
}

const fn seg(start_secs: f64, end_secs: f64, start_pct: f64, end_pct: f64) -> Segment {
    Segment {
        start_secs,
        end_secs,
        start_pct,
        end_pct,
    }
}

const DOCUMENT_SCHEDULE: &[Segment] = &[
    seg(0.0, 5.0, 5.0, 30.0),
    seg(5.0, 10.0, 30.0, 60.0),
    seg(10.0, 20.0, 60.0, 80.0),
    seg(20.0, 30.0, 80.0, 90.0),
];

const TRAINING_SCHEDULE: &[Segment] = &[
    seg(0.0, 10.0, 5.0, 20.0),
    seg(10.0, 30.0, 20.0, 50.0),
    seg(30.0, 60.0, 50.0, 75.0),
    seg(60.0, 120.0, 75.0, 90.0),
];

/// Synthetic percentage after `elapsed_secs` on the given schedule.
pub fn synthetic_progress(class: OperationClass, elapsed_secs: f64) -> f64 {
    let schedule = match class {
        OperationClass::Document => DOCUMENT_SCHEDULE,
        OperationClass::Training => TRAINING_SCHEDULE,
    };
    let elapsed = elapsed_secs.max(0.0);

    schedule
        .iter()
        .find(|s| elapsed < s.end_secs)
        .map(|s| {
            let fraction = (elapsed - s.start_secs) / (s.end_secs - s.start_secs);
            s.start_pct + fraction * (s.end_pct - s.start_pct)
        })
        .unwrap_or(SYNTHETIC_CEILING)
}

/// Computes display percentages for one operation class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressEstimator {
    class: OperationClass,
}

impl ProgressEstimator {
    pub fn new(class: OperationClass) -> Self {
        Self { class }
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }

    /// The display percentage `job` should show at `now`.
    ///
    /// Never below `job.display_percentage` unless the job completed, in
    /// which case it is exactly 100.
    pub fn estimate(&self, job: &Job, now: Timestamp) -> f64 {
        let previous = job.display_percentage;

        match job.status {
            JobStatus::Completed => return 100.0,
            JobStatus::Failed | JobStatus::Cancelled => return previous,
            JobStatus::Initializing | JobStatus::Processing => {}
        }

        let real = job.real_percentage.unwrap_or(0.0);
        if real >= REAL_PRECEDENCE_THRESHOLD {
            return previous.max(real).min(100.0);
        }

        let elapsed_secs = (now - job.started_at).num_milliseconds() as f64 / 1000.0;
        let synthetic = if elapsed_secs > SYNTHETIC_GRACE_SECS {
            synthetic_progress(self.class, elapsed_secs)
        } else {
            0.0
        };

        previous.max(synthetic).max(real).min(100.0)
    }

    /// Write the estimate into `job`. Returns `true` if the value changed.
    pub fn advance(&self, job: &mut Job, now: Timestamp) -> bool {
        let next = self.estimate(job, now);
        if next == job.display_percentage {
            return false;
        }
        job.display_percentage = next;
        true
    }
}
