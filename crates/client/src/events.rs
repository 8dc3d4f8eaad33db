//! Events emitted by the transport coordinator.
//!
//! Both producers (the push pump and the poll loop) feed these into one
//! channel; the tracker session is the only consumer.

use jobpulse_core::job::JobSnapshot;

use crate::retry::RetryFailure;

/// Which transport delivered a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Push,
    Poll,
}

impl UpdateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// A state change observed by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new server observation of the job.
    Snapshot {
        source: UpdateSource,
        snapshot: JobSnapshot,
    },

    /// The push channel joined (or re-joined) the job room.
    PushConnected,

    /// The push channel dropped; polling takes over.
    PushDisconnected,

    /// The poll loop gave up, either on its retry ceiling or on a
    /// non-recoverable error.
    PollFailed(RetryFailure),
}
