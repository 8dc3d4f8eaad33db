//! Exponential-backoff resubscription for the push channel.
//!
//! When a room subscription drops, the transport coordinator calls
//! [`reconnect_loop`] to keep retrying with increasing delays until
//! either the subscription is restored or the [`CancellationToken`] is
//! triggered.

use jobpulse_core::backoff::BackoffPolicy;
use tokio_util::sync::CancellationToken;

use crate::client::{PushSubscription, PushTransport};

/// Re-join the room of `progress_id` with exponential backoff.
///
/// Waits `policy.delay(attempt)` before every attempt so that a server
/// which accepts and immediately drops connections cannot cause a tight
/// loop. Returns `Some(subscription)` once a subscription succeeds, or
/// `None` if `cancel` fires first.
pub async fn reconnect_loop(
    transport: &dyn PushTransport,
    progress_id: &str,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
) -> Option<PushSubscription> {
    let mut attempt = 0u32;

    loop {
        let delay = policy.delay(attempt);
        attempt += 1;

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        tracing::info!(
            progress_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Re-subscribing to push channel",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(progress_id, "Push reconnect cancelled");
                return None;
            }
            result = transport.subscribe(progress_id) => {
                match result {
                    Ok(subscription) => {
                        tracing::info!(progress_id, attempt, "Push channel restored");
                        return Some(subscription);
                    }
                    Err(e) => {
                        tracing::warn!(
                            progress_id,
                            error = %e,
                            "Push reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }
    }
}
