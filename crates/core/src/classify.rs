//! Error taxonomy and classifier.
//!
//! Every failure the client sees (a transport exception, an HTTP status,
//! or a bare message from the server) is funnelled through [`classify`]
//! into an immutable [`ClassifiedError`]. The classifier is total: any
//! input yields a result, defaulting to `unknown`.

use serde::Serialize;

use crate::types::Timestamp;

/// Broad failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Validation,
    Server,
    Timeout,
    FileProcessing,
    Training,
    Authentication,
    Permission,
    Unknown,
}

impl ErrorKind {
    /// Kinds worth retrying locally before surfacing.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }

    /// `false` only for authentication and permission failures.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Authentication | Self::Permission)
    }

    pub fn default_severity(self) -> Severity {
        match self {
            Self::Network | Self::Server => Severity::High,
            Self::Validation => Severity::Low,
            _ => Severity::Medium,
        }
    }

    /// Fixed user-facing message for the kind.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Network => "Connection problem. Please check your internet connection.",
            Self::Validation => "Some of the submitted information is invalid.",
            Self::Server => "The server ran into a problem. Please try again shortly.",
            Self::Timeout => "The request took too long. Please try again.",
            Self::FileProcessing => "The file could not be processed.",
            Self::Training => "Model training failed.",
            Self::Authentication => "Your session has expired. Please sign in again.",
            Self::Permission => "You do not have permission to perform this action.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    pub fn action(self) -> RecoveryAction {
        match self {
            Self::Authentication => RecoveryAction::Reauthenticate,
            Self::Permission => RecoveryAction::RequestAccess,
            Self::Validation => RecoveryAction::FixInput,
            Self::Network | Self::Server | Self::Timeout | Self::Unknown => RecoveryAction::Retry,
            Self::FileProcessing | Self::Training => RecoveryAction::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::FileProcessing => "file_processing",
            Self::Training => "training",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Hint for the rendering layer on what the user can do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Reauthenticate,
    RequestAccess,
    FixInput,
    None,
}

/// An unclassified failure as observed at the I/O boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawError {
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
    /// Free text from the exception or the server body.
    pub message: String,
    /// The request never produced a response (connect/reset/DNS).
    pub transport: bool,
    /// The host is known to be offline.
    pub offline: bool,
}

impl RawError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transport: true,
            ..Default::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            message: "No network connectivity".to_string(),
            offline: true,
            ..Default::default()
        }
    }
}

impl std::fmt::Display for RawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RawError {}

/// Structured, immutable description of a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedError {
    kind: ErrorKind,
    severity: Severity,
    recoverable: bool,
    user_message: String,
    technical_message: String,
    status: Option<u16>,
    action: RecoveryAction,
    error_id: uuid::Uuid,
    timestamp: Timestamp,
}

impl ClassifiedError {
    /// Build an error of a given kind with that kind's defaults.
    pub fn new(kind: ErrorKind, technical_message: impl Into<String>) -> Self {
        Self::build(kind, None, kind.user_message().to_string(), technical_message.into())
    }

    /// Classify a failure message reported by the job itself, keeping the
    /// job's message as the user-facing text.
    pub fn from_job_failure(message: &str) -> Self {
        let kind = classify_kind(&RawError::message(message));
        let user_message = if message.trim().is_empty() {
            kind.user_message().to_string()
        } else {
            message.to_string()
        };
        Self::build(kind, None, user_message, message.to_string())
    }

    /// Network-kind error raised when the poll loop exhausts its retry
    /// ceiling. The last underlying failure is kept as technical detail.
    pub fn poll_exhausted(last: &ClassifiedError, attempts: u32) -> Self {
        Self::new(
            ErrorKind::Network,
            format!(
                "status polling gave up after {attempts} attempts: {}",
                last.technical_message
            ),
        )
    }

    fn build(
        kind: ErrorKind,
        status: Option<u16>,
        user_message: String,
        technical_message: String,
    ) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            recoverable: kind.is_recoverable(),
            user_message,
            technical_message,
            status,
            action: kind.action(),
            error_id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn technical_message(&self) -> &str {
        &self.technical_message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn action(&self) -> RecoveryAction {
        self.action
    }

    pub fn error_id(&self) -> uuid::Uuid {
        self.error_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.technical_message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Message fragments that signal a transport-level failure.
const TRANSPORT_MARKERS: &[&str] = &[
    "failed to fetch",
    "network error",
    "networkerror",
    "connection refused",
    "connection reset",
];

/// Keyword rules for status-less failures, evaluated in order.
const MESSAGE_RULES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::FileProcessing, &["file", "upload", "processing"]),
    (ErrorKind::Training, &["training", "model"]),
    (ErrorKind::Timeout, &["timeout", "timed out"]),
    (ErrorKind::Validation, &["validation", "invalid"]),
];

/// Classify a raw failure. Total and deterministic in `kind`.
pub fn classify(raw: &RawError) -> ClassifiedError {
    let kind = classify_kind(raw);
    ClassifiedError::build(
        kind,
        raw.status,
        kind.user_message().to_string(),
        raw.to_string(),
    )
}

fn classify_kind(raw: &RawError) -> ErrorKind {
    let lowered = raw.message.to_lowercase();

    if raw.offline || raw.transport || TRANSPORT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return ErrorKind::Network;
    }

    if let Some(status) = raw.status {
        return match status {
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            408 | 504 => ErrorKind::Timeout,
            400..=499 => ErrorKind::Validation,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };
    }

    MESSAGE_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_and_transport_failures_are_network() {
        for raw in [
            RawError::offline(),
            RawError::transport("dns lookup failed"),
            RawError::message("TypeError: Failed to fetch"),
            RawError::http(500, "connection reset by peer"),
        ] {
            let err = classify(&raw);
            assert_eq!(err.kind(), ErrorKind::Network, "{raw:?}");
            assert_eq!(err.severity(), Severity::High);
            assert!(err.recoverable());
        }
    }

    #[test]
    fn http_statuses_map_to_kinds() {
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Permission),
            (408, ErrorKind::Timeout),
            (504, ErrorKind::Timeout),
            (422, ErrorKind::Validation),
            (404, ErrorKind::Validation),
            (500, ErrorKind::Server),
            (503, ErrorKind::Server),
            (302, ErrorKind::Unknown),
        ];
        for (status, kind) in cases {
            assert_eq!(classify(&RawError::http(status, "x")).kind(), kind, "status {status}");
        }
    }

    #[test]
    fn auth_and_permission_are_not_recoverable() {
        let auth = classify(&RawError::http(401, "expired"));
        assert!(!auth.recoverable());
        assert_eq!(auth.action(), RecoveryAction::Reauthenticate);

        let perm = classify(&RawError::http(403, "nope"));
        assert!(!perm.recoverable());
        assert_eq!(perm.action(), RecoveryAction::RequestAccess);
    }

    #[test]
    fn server_errors_are_high_severity() {
        let err = classify(&RawError::http(502, "bad gateway"));
        assert_eq!(err.severity(), Severity::High);
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn message_keywords_apply_only_without_status() {
        assert_eq!(
            classify(&RawError::message("Upload rejected")).kind(),
            ErrorKind::FileProcessing
        );
        assert_eq!(
            classify(&RawError::message("Model diverged")).kind(),
            ErrorKind::Training
        );
        assert_eq!(
            classify(&RawError::message("operation timed out")).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&RawError::message("invalid rubric")).kind(),
            ErrorKind::Validation
        );
        // Status takes precedence over keywords.
        assert_eq!(
            classify(&RawError::http(500, "file missing")).kind(),
            ErrorKind::Server
        );
    }

    #[test]
    fn keyword_rules_are_ordered() {
        // "processing" (file_processing) outranks "model" (training).
        assert_eq!(
            classify(&RawError::message("model processing crashed")).kind(),
            ErrorKind::FileProcessing
        );
    }

    #[test]
    fn unmatched_input_falls_back_to_unknown() {
        let err = classify(&RawError::message("something odd"));
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.severity(), Severity::Medium);
        assert!(err.recoverable());

        assert_eq!(classify(&RawError::default()).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let raw = RawError::http(429, "slow down");
        let a = classify(&raw);
        let b = classify(&raw);
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.severity(), b.severity());
        assert_ne!(a.error_id(), b.error_id());
    }

    #[test]
    fn job_failure_keeps_job_message() {
        let err = ClassifiedError::from_job_failure("Training run diverged at epoch 3");
        assert_eq!(err.kind(), ErrorKind::Training);
        assert_eq!(err.user_message(), "Training run diverged at epoch 3");
    }

    #[test]
    fn poll_exhaustion_is_network_kind() {
        let last = classify(&RawError::http(503, "unavailable"));
        let err = ClassifiedError::poll_exhausted(&last, 5);
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.technical_message().contains("5 attempts"));
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Network.is_transient());
        assert!(ErrorKind::Server.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
    }
}
