//! Error types for remedy-link
//!
//! Every failure surfaced by the request pipeline is classified so the UI
//! layer can decide how to render it without inspecting transport details.

use std::time::Duration;

use serde::Serialize;

/// Coarse classification of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, expired or rejected credential (401)
    Authentication,
    /// Credential accepted but not allowed (403)
    Authorization,
    /// Malformed request rejected by the server (400/422)
    Validation,
    /// No response, timeout, rate limit or server error; eligible for retry
    Transient,
    /// Push channel failure
    Stream,
    /// Any other client-side rejection (404, 409, ...)
    Client,
    /// Local failures: storage, configuration, undecodable bodies
    Internal,
}

/// Main error type for remedy-link operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Authentication required: {message}")]
    Authentication {
        status: Option<u16>,
        message: String,
    },

    #[error("Forbidden: {message}")]
    Authorization { status: u16, message: String },

    #[error("Validation failed: {message}")]
    Validation {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Classification used by the retry policy and by callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } | Self::Rejected { .. } => ErrorKind::Client,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Network(_) | Self::Timeout => {
                ErrorKind::Transient
            }
            Self::Stream(_) => ErrorKind::Stream,
            Self::Decode(_) | Self::Storage(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status that produced this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } => *status,
            Self::Authorization { status, .. }
            | Self::Validation { status, .. }
            | Self::Rejected { status, .. }
            | Self::Server { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "AUTH_REQUIRED",
            Self::Authorization { .. } => "FORBIDDEN",
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Rejected { .. } => "REQUEST_REJECTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Server { .. } => "SERVER_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Decode(_) => "INVALID_RESPONSE",
            Self::Stream(_) => "STREAM_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the request pipeline may retry after this error
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Build a classified error from a non-success HTTP response
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = message.into();
        match status {
            401 => Self::Authentication {
                status: Some(status),
                message,
            },
            403 => Self::Authorization { status, message },
            400 | 422 => Self::Validation {
                status,
                message,
                details,
            },
            404 => Self::NotFound { message },
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("Invalid URL: {}", err))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for remedy-link operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let cases = [
            (401, ErrorKind::Authentication, false),
            (403, ErrorKind::Authorization, false),
            (400, ErrorKind::Validation, false),
            (422, ErrorKind::Validation, false),
            (404, ErrorKind::Client, false),
            (409, ErrorKind::Client, false),
            (429, ErrorKind::Transient, true),
            (500, ErrorKind::Transient, true),
            (503, ErrorKind::Transient, true),
        ];

        for (status, kind, retryable) in cases {
            let err = ClientError::from_status(status, "boom", None, None);
            assert_eq!(err.kind(), kind, "status {}", status);
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn test_codes_and_messages() {
        let err = ClientError::from_status(401, "token expired", None, None);
        assert_eq!(err.code(), "AUTH_REQUIRED");
        assert_eq!(err.to_string(), "Authentication required: token expired");

        assert!(ClientError::Timeout.is_retryable());
        assert_eq!(ClientError::Timeout.status(), None);
        assert!(!ClientError::Storage("disk full".into()).is_retryable());
    }
}
