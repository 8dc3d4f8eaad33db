//! Pure job-progress logic shared by the jobpulse client crates.
//!
//! Nothing in this crate performs I/O: the job model, error taxonomy,
//! backoff arithmetic, progress estimation and stage detection are plain
//! functions of their inputs plus an explicit clock value where time
//! matters. Backoff jitter is the only source of randomness.

pub mod backoff;
pub mod classify;
pub mod error;
pub mod error_history;
pub mod estimator;
pub mod job;
pub mod job_events;
pub mod stage;
pub mod types;
