use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Raw failure produced by the HTTP layer. Variants carry enough context
/// for [`classify`] to map them onto the user-facing taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("{0}")]
    Connect(String),
    #[error("request timeout")]
    Timeout,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("session expired, please log in again")]
    SessionExpired,
    #[error("{0} not yet implemented in backend")]
    NotImplemented(&'static str),
    #[error("credential store error: {0}")]
    Credential(String),
}

pub const CANNOT_CONNECT_MESSAGE: &str =
    "Cannot connect to server. Please make sure the backend is running.";

impl ApiError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            ApiError::Connect(CANNOT_CONNECT_MESSAGE.to_string())
        } else if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(401),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Network,
    Auth,
    Server,
    Client,
    Timeout,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Normalized failure record derived from a raw error. Stateless: always
/// recomputed from the triggering error, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub user_message: String,
}

/// Structured classifier input: the failure's message plus the HTTP status
/// when one exists. Keeps classification independent of any concrete error
/// type's runtime representation.
#[derive(Debug, Clone)]
pub struct FailureInput {
    pub message: String,
    pub status: Option<u16>,
}

impl FailureInput {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

impl From<&ApiError> for FailureInput {
    fn from(err: &ApiError) -> Self {
        Self {
            message: err.to_string(),
            status: err.status(),
        }
    }
}

/// Maps a raw failure onto the error taxonomy. First match wins: network,
/// auth, server, client, timeout, unknown.
pub fn classify(input: &FailureInput) -> ClassifiedError {
    let message = input.message.to_lowercase();
    let status = input.status;

    if message.contains("network") || message.contains("fetch") || message.contains("connect") {
        return ClassifiedError {
            kind: ErrorKind::Network,
            severity: Severity::High,
            retryable: true,
            user_message: "Connection problem. Please check your internet connection.".to_string(),
        };
    }

    if status == Some(401)
        || status == Some(403)
        || message.contains("unauthorized")
        || message.contains("forbidden")
    {
        return ClassifiedError {
            kind: ErrorKind::Auth,
            severity: Severity::Critical,
            retryable: false,
            user_message: "Authentication required. Please log in again.".to_string(),
        };
    }

    if status.is_some_and(|s| s >= 500) || message.contains("server") || message.contains("internal")
    {
        return ClassifiedError {
            kind: ErrorKind::Server,
            severity: Severity::High,
            retryable: true,
            user_message: "Server temporarily unavailable. We'll keep trying.".to_string(),
        };
    }

    if status.is_some_and(|s| (400..500).contains(&s)) {
        return ClassifiedError {
            kind: ErrorKind::Client,
            severity: Severity::Medium,
            retryable: false,
            user_message: "Request failed. Please try again or contact support.".to_string(),
        };
    }

    if message.contains("timeout") || message.contains("aborted") {
        return ClassifiedError {
            kind: ErrorKind::Timeout,
            severity: Severity::Medium,
            retryable: true,
            user_message: "Request timed out. Please try again.".to_string(),
        };
    }

    ClassifiedError {
        kind: ErrorKind::Unknown,
        severity: Severity::Medium,
        retryable: true,
        user_message: "Something went wrong. Please try again.".to_string(),
    }
}

impl From<&ApiError> for ClassifiedError {
    fn from(err: &ApiError) -> Self {
        classify(&FailureInput::from(err))
    }
}

impl ClassifiedError {
    /// Fixed recovery hints surfaced next to the error message. Ordering is
    /// part of the contract with the view layer.
    pub fn recovery_suggestions(&self) -> &'static [&'static str] {
        match self.kind {
            ErrorKind::Network => &[
                "Check your internet connection",
                "Try refreshing the page",
                "Wait a moment and try again",
            ],
            ErrorKind::Auth => &[
                "Log out and log back in",
                "Clear your browser cache",
                "Contact support if the problem persists",
            ],
            ErrorKind::Server => &[
                "Wait a few minutes and try again",
                "The issue is on our end and we're working to fix it",
                "Try refreshing the page",
            ],
            ErrorKind::Timeout => &[
                "Check your internet connection speed",
                "Try again with a better connection",
                "Wait a moment before retrying",
            ],
            ErrorKind::Client | ErrorKind::Unknown => &[
                "Try refreshing the page",
                "Check your internet connection",
                "Contact support if the problem continues",
            ],
        }
    }

    /// Formats the user message with a section context prefix, e.g.
    /// `"Donation history: Request timed out. Please try again."`.
    pub fn with_context(&self, context: &str) -> String {
        if context.is_empty() {
            self.user_message.clone()
        } else {
            format!("{context}: {}", self.user_message)
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.retryable && self.severity != Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify_message(message: &str, status: Option<u16>) -> ClassifiedError {
        classify(&FailureInput::new(message, status))
    }

    #[test]
    fn network_errors_match_first() {
        let classified = classify_message("failed to connect to host", None);
        assert_eq!(classified.kind, ErrorKind::Network);
        assert_eq!(classified.severity, Severity::High);
        assert!(classified.retryable);
    }

    #[test]
    fn network_keyword_beats_status() {
        // Decision order is fixed: a connect failure with a 500 status still
        // classifies as a network problem.
        let classified = classify_message("network unreachable", Some(500));
        assert_eq!(classified.kind, ErrorKind::Network);
    }

    #[test]
    fn auth_status_codes_are_critical_and_final() {
        for status in [401, 403] {
            let classified = classify_message("request rejected", Some(status));
            assert_eq!(classified.kind, ErrorKind::Auth);
            assert_eq!(classified.severity, Severity::Critical);
            assert!(!classified.retryable);
            assert!(!classified.is_recoverable());
        }
    }

    #[test]
    fn auth_keywords_without_status() {
        let classified = classify_message("unauthorized access", None);
        assert_eq!(classified.kind, ErrorKind::Auth);
    }

    #[test]
    fn server_errors_are_retryable() {
        let classified = classify_message("bad gateway", Some(502));
        assert_eq!(classified.kind, ErrorKind::Server);
        assert!(classified.retryable);
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let classified = classify_message("unprocessable entity", Some(422));
        assert_eq!(classified.kind, ErrorKind::Client);
        assert!(!classified.retryable);
    }

    #[test]
    fn timeout_messages_classify_as_timeout() {
        let classified = classify_message("request timeout", None);
        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert_eq!(classified.severity, Severity::Medium);
        assert!(classified.retryable);
    }

    #[test]
    fn unknown_fallback_is_retryable() {
        let classified = classify_message("something odd happened", None);
        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert!(classified.retryable);
    }

    #[test]
    fn api_error_variants_feed_the_classifier() {
        let err = ApiError::Connect(CANNOT_CONNECT_MESSAGE.to_string());
        assert_eq!(ClassifiedError::from(&err).kind, ErrorKind::Network);

        let err = ApiError::SessionExpired;
        assert_eq!(ClassifiedError::from(&err).kind, ErrorKind::Auth);

        let err = ApiError::Timeout;
        assert_eq!(ClassifiedError::from(&err).kind, ErrorKind::Timeout);

        let err = ApiError::Status {
            status: 503,
            detail: "maintenance".to_string(),
        };
        assert_eq!(ClassifiedError::from(&err).kind, ErrorKind::Server);
    }

    #[test]
    fn context_prefix_formatting() {
        let classified = classify_message("request timeout", None);
        assert_eq!(
            classified.with_context("Donation history"),
            "Donation history: Request timed out. Please try again."
        );
        assert_eq!(
            classified.with_context(""),
            "Request timed out. Please try again."
        );
    }

    #[test]
    fn every_kind_has_suggestions() {
        for message in ["connect refused", "unauthorized", "server down", "timeout"] {
            let classified = classify_message(message, None);
            assert!(!classified.recovery_suggestions().is_empty());
        }
    }
}
