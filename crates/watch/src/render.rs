//! Log-based rendering of tracker callbacks.
//!
//! [`LogRenderer`] turns progress notifications into `tracing` lines and
//! reports how the job ended through a channel, so `main` can pick the
//! exit code.

use jobpulse_client::callbacks::ProgressCallbacks;
use jobpulse_core::classify::ClassifiedError;
use jobpulse_core::job::{Job, JobStatus};
use jobpulse_core::stage::Stage;
use tokio::sync::mpsc;

/// Width of the textual progress bar, in cells.
const BAR_WIDTH: usize = 30;

/// How a watched job ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(Job),
    Failed(ClassifiedError),
    Cancelled,
}

pub struct LogRenderer {
    outcome_tx: mpsc::UnboundedSender<Outcome>,
}

impl LogRenderer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        (Self { outcome_tx }, outcome_rx)
    }
}

impl ProgressCallbacks for LogRenderer {
    fn on_progress(&self, job: &Job) {
        tracing::info!(progress_id = %job.progress_id, "{}", progress_line(job));
        if job.status == JobStatus::Cancelled {
            let _ = self.outcome_tx.send(Outcome::Cancelled);
        }
    }

    fn on_stage_change(&self, new: Stage, old: Stage) {
        tracing::info!(
            from = old.label(),
            to = new.label(),
            "Stage {}/{}: {}",
            new.ordinal() + 1,
            Stage::ALL.len(),
            new.label(),
        );
    }

    fn on_complete(&self, job: &Job) {
        let _ = self.outcome_tx.send(Outcome::Completed(job.clone()));
    }

    fn on_error(&self, error: &ClassifiedError) {
        let _ = self.outcome_tx.send(Outcome::Failed(error.clone()));
    }
}

/// `[#########.....................]  30% Grading (2/5) Scoring answers ~40s left`
pub fn progress_line(job: &Job) -> String {
    let mut line = format!(
        "{} {:>3}% {}",
        progress_bar(job.display_percentage, BAR_WIDTH),
        job.display_percentage.round() as u32,
        job.stage.label(),
    );
    if job.total_steps > 0 {
        line.push_str(&format!(" ({}/{})", job.current_step, job.total_steps));
    }
    let detail = if job.current_operation.is_empty() {
        &job.message
    } else {
        &job.current_operation
    };
    if !detail.is_empty() {
        line.push(' ');
        line.push_str(detail);
    }
    if let Some(secs) = job.estimated_remaining_secs {
        line.push_str(&format!(" ~{}", format_remaining(secs)));
    }
    match job.status {
        JobStatus::Initializing | JobStatus::Processing => {}
        status => line.push_str(&format!(" [{}]", status.as_str())),
    }
    line
}

/// Fixed-width bar; `percent` is clamped to 0-100.
pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

fn format_remaining(secs: u64) -> String {
    match secs {
        0..=59 => format!("{secs}s left"),
        60..=3599 => format!("{}m{:02}s left", secs / 60, secs % 60),
        _ => format!("{}h{:02}m left", secs / 3600, (secs % 3600) / 60),
    }
}
