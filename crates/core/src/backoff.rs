//! Exponential backoff with additive jitter.
//!
//! Two independent curves are used by the client: [`BackoffPolicy::generic`]
//! for user-triggered operations and push reconnects, and
//! [`BackoffPolicy::poll_failure`] for the unattended poll loop. They are
//! separate instances so each can be tuned without touching the other.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for one backoff curve.
///
/// `delay(n) = min(base * multiplier^n + uniform(0, jitter), max)`
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (attempt 0), before jitter.
    pub base_delay: Duration,
    /// Upper bound on any returned delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound of the uniformly distributed jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::generic()
    }
}

impl BackoffPolicy {
    /// Curve for generic retried operations: 1s doubling, capped at 30s.
    pub fn generic() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            max_jitter: Duration::from_millis(1000),
        }
    }

    /// Curve for poll-failure retries: 1s growing by 1.5x, capped at 10s.
    pub fn poll_failure() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 1.5,
            max_jitter: Duration::from_millis(1000),
        }
    }

    /// Same curve with jitter disabled (useful for deterministic loops).
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Delay before retry number `attempt` (0-based), with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic core of [`delay`](Self::delay) with caller-supplied
    /// jitter.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        // Beyond ~64 attempts every realistic curve is pinned at max_delay.
        let exp = attempt.min(64) as i32;
        let base_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let total_ms = base_ms + jitter.as_millis() as f64;
        let capped = total_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Lower bound of [`delay`](Self::delay) for `attempt` (no jitter,
    /// still capped).
    pub fn min_delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, Duration::ZERO)
    }
}
