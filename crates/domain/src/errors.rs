//! Error types used throughout the resilience core
//!
//! Every failure is classified at the point it is first detected, so retry
//! predicates and callers match on a stable discriminant instead of
//! inspecting transport details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for CirclePay
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum CirclePayError {
    /// Transport-level failure, no response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// The operation exceeded its deadline.
    #[error("Request timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// A response was received with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Token refresh failed; the user has to sign in again.
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// A low-priority read was attempted offline without a cached copy.
    #[error("Offline: {0}")]
    Offline(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A full sync was requested while another one is running.
    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse categories used by callers to choose a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network, timeout and 5xx failures.
    Transient,
    /// 401 responses and expired sessions.
    Authentication,
    /// 4xx responses other than 401.
    Client,
    /// No connectivity and nothing cached.
    Offline,
    /// Local storage, serialization and configuration problems.
    Local,
    /// Cancelled or superseded work.
    Aborted,
}

impl CirclePayError {
    /// Default retry classification.
    ///
    /// Network failures, timeouts, 5xx and 401 responses are retryable.
    /// Any other 4xx, expired sessions and offline misses are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 401,
            _ => false,
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::Http { status, .. } if *status >= 500 => ErrorCategory::Transient,
            Self::Http { status: 401, .. } | Self::AuthExpired(_) => ErrorCategory::Authentication,
            Self::Http { .. } => ErrorCategory::Client,
            Self::Offline(_) => ErrorCategory::Offline,
            Self::Storage(_) | Self::Serialization(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorCategory::Local
            }
            Self::SyncInProgress | Self::Cancelled(_) => ErrorCategory::Aborted,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the UI should prompt for re-authentication.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::AuthExpired(_))
    }
}

impl From<serde_json::Error> for CirclePayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for CirclePay operations
pub type Result<T> = std::result::Result<T, CirclePayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> CirclePayError {
        CirclePayError::Http { status, message: "test".to_string() }
    }

    #[test]
    fn retryable_classification_matches_taxonomy() {
        assert!(CirclePayError::Network("reset".into()).is_retryable());
        assert!(CirclePayError::Timeout { millis: 5000 }.is_retryable());
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(401).is_retryable());

        assert!(!http(400).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(422).is_retryable());
        assert!(!CirclePayError::AuthExpired("refresh failed".into()).is_retryable());
        assert!(!CirclePayError::Offline("no cache".into()).is_retryable());
        assert!(!CirclePayError::Cancelled("dispose".into()).is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(http(502).category(), ErrorCategory::Transient);
        assert_eq!(http(401).category(), ErrorCategory::Authentication);
        assert_eq!(http(409).category(), ErrorCategory::Client);
        assert_eq!(CirclePayError::Offline("x".into()).category(), ErrorCategory::Offline);
        assert_eq!(CirclePayError::Storage("x".into()).category(), ErrorCategory::Local);
        assert_eq!(CirclePayError::SyncInProgress.category(), ErrorCategory::Aborted);
    }

    #[test]
    fn serializes_with_stable_tag() {
        let json = serde_json::to_value(http(503)).unwrap();
        assert_eq!(json["type"], "Http");
        assert_eq!(json["detail"]["status"], 503);

        let back: CirclePayError = serde_json::from_value(json).unwrap();
        assert_eq!(back, http(503));
    }

    #[test]
    fn auth_expired_requires_reauthentication() {
        assert!(CirclePayError::AuthExpired("x".into()).requires_reauthentication());
        assert!(!http(401).requires_reauthentication());
    }
}
