//! Push-channel message types and parser.
//!
//! The server sends JSON frames of the shape `{"type": "<kind>", "data":
//! {...}}` into each job room. This module deserializes them into a
//! strongly-typed [`PushMessage`] and builds the outgoing room commands.

use jobpulse_core::job::{JobSnapshot, JobStatus, StatusPayload};
use jobpulse_core::job_events::{
    MSG_TYPE_JOIN, MSG_TYPE_LEAVE, MSG_TYPE_PROCESSING_COMPLETE, MSG_TYPE_PROCESSING_ERROR,
    MSG_TYPE_PROGRESS_UPDATE,
};
use serde::Deserialize;

/// All known server-to-client push messages.
///
/// Deserialized via the adjacently-tagged `"type"` field with associated
/// `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushMessage {
    /// Intermediate progress snapshot.
    #[serde(rename = "progress_update")]
    ProgressUpdate(PushData),

    /// The job finished successfully.
    #[serde(rename = "processing_complete")]
    ProcessingComplete(PushData),

    /// The job failed.
    #[serde(rename = "processing_error")]
    ProcessingError(PushData),
}

/// Payload shared by every push message: the status body plus the room
/// key it was emitted for.
#[derive(Debug, Clone, Deserialize)]
pub struct PushData {
    /// Absent when the server relies on room scoping alone.
    #[serde(default)]
    pub progress_id: Option<String>,
    #[serde(flatten)]
    pub payload: StatusPayload,
}

impl PushMessage {
    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProgressUpdate(_) => MSG_TYPE_PROGRESS_UPDATE,
            Self::ProcessingComplete(_) => MSG_TYPE_PROCESSING_COMPLETE,
            Self::ProcessingError(_) => MSG_TYPE_PROCESSING_ERROR,
        }
    }

    pub fn data(&self) -> &PushData {
        match self {
            Self::ProgressUpdate(d) | Self::ProcessingComplete(d) | Self::ProcessingError(d) => d,
        }
    }

    /// `true` if the message targets `progress_id` (or carries no id).
    pub fn is_for(&self, progress_id: &str) -> bool {
        self.data()
            .progress_id
            .as_deref()
            .map_or(true, |id| id == progress_id)
    }

    /// Normalise into a [`JobSnapshot`].
    ///
    /// Completion and error events force the terminal status even when
    /// the body omits it; an error event without an `error` field falls
    /// back to its message.
    pub fn into_snapshot(self) -> JobSnapshot {
        match self {
            Self::ProgressUpdate(d) => d.payload.into_snapshot(),
            Self::ProcessingComplete(d) => {
                let mut snapshot = d.payload.into_snapshot();
                snapshot.status = Some(JobStatus::Completed);
                snapshot
            }
            Self::ProcessingError(d) => {
                let mut snapshot = d.payload.into_snapshot();
                snapshot.status = Some(JobStatus::Failed);
                if snapshot.error.is_none() {
                    snapshot.error = snapshot.message.clone();
                }
                snapshot
            }
        }
    }
}

/// Parse a push text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log and continue.
pub fn parse_message(text: &str) -> Result<PushMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Frame subscribing to the room of `progress_id`.
pub fn join_frame(progress_id: &str) -> String {
    room_frame(MSG_TYPE_JOIN, progress_id)
}

/// Frame leaving the room of `progress_id`.
pub fn leave_frame(progress_id: &str) -> String {
    room_frame(MSG_TYPE_LEAVE, progress_id)
}

fn room_frame(kind: &str, progress_id: &str) -> String {
    serde_json::json!({
        "type": kind,
        "data": { "progress_id": progress_id },
    })
    .to_string()
}
