//! Rendering collaborator interface.

use jobpulse_core::classify::ClassifiedError;
use jobpulse_core::job::Job;
use jobpulse_core::stage::Stage;

/// Receives progress notifications for one tracked job.
///
/// Every method defaults to a no-op, so implementors only override what
/// they render. Methods are called from the tracker's session task with
/// no internal lock held.
pub trait ProgressCallbacks: Send + Sync {
    /// Something visible about the job changed.
    fn on_progress(&self, _job: &Job) {}

    /// The detected pipeline stage moved from `old` to `new`.
    fn on_stage_change(&self, _new: Stage, _old: Stage) {}

    /// The job completed. Called exactly once per session.
    fn on_complete(&self, _job: &Job) {}

    /// The job failed or tracking could not continue.
    fn on_error(&self, _error: &ClassifiedError) {}
}

/// Callback set that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl ProgressCallbacks for NoopCallbacks {}
