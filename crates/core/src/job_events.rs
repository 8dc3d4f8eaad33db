//! Push-channel message type constants for job progress rooms.
//!
//! Used by the client push transport when joining/leaving a job room and
//! when dispatching server-sent events.

/// Client -> server: subscribe to the room keyed by a progress id.
pub const MSG_TYPE_JOIN: &str = "join";

/// Client -> server: leave the room keyed by a progress id.
pub const MSG_TYPE_LEAVE: &str = "leave";

/// Server -> client: progress snapshot for the job.
pub const MSG_TYPE_PROGRESS_UPDATE: &str = "progress_update";

/// Server -> client: the job completed successfully.
pub const MSG_TYPE_PROCESSING_COMPLETE: &str = "processing_complete";

/// Server -> client: the job failed.
pub const MSG_TYPE_PROCESSING_ERROR: &str = "processing_error";
