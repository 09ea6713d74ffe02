//! Error types for upstream API calls.

use thiserror::Error;

/// Errors that can occur while talking to the marketplace API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-success status from a single attempt.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Status the upstream will keep returning; not retried.
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Retries exhausted. Carries the last status/body seen.
    #[error("upstream unavailable after {attempts} attempts (last status {status:?}): {body}")]
    UpstreamUnavailable {
        attempts: u32,
        status: Option<u16>,
        body: String,
    },

    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_decode() {
            ApiError::ParseError(err.to_string())
        } else {
            ApiError::ConnectionFailed(err.to_string())
        }
    }
}

impl ApiError {
    /// Classify an HTTP status: `None` on success, otherwise the error for that attempt.
    pub fn from_status(status: u16, body: String) -> Option<Self> {
        match status {
            200..=299 => None,
            429 | 500..=599 => Some(ApiError::Http { status, body }),
            _ => Some(ApiError::Rejected { status, body }),
        }
    }

    /// Returns true if this error is transient and likely to succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::ConnectionFailed(_) => true,
            ApiError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Status code of the failing response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } | ApiError::Rejected { status, .. } => Some(*status),
            ApiError::UpstreamUnavailable { status, .. } => *status,
            _ => None,
        }
    }

    /// Wrap the last attempt's error once the retry budget is spent.
    pub fn exhausted(self, attempts: u32) -> Self {
        let status = self.status();
        let body = match self {
            ApiError::Http { body, .. } | ApiError::Rejected { body, .. } => body,
            other => other.to_string(),
        };
        ApiError::UpstreamUnavailable {
            attempts,
            status,
            body,
        }
    }
}
