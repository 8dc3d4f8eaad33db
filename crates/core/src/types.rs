/// Opaque server-assigned identifier of a tracked job.
pub type ProgressId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
