//! LLM error types

use thiserror::Error;

/// LLM error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::MalformedResponse, message)
    }

    /// Classify a failed HTTP response by status class.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            400 => LlmErrorKind::InvalidRequest,
            401 => LlmErrorKind::Auth,
            403 => LlmErrorKind::Forbidden,
            429 => LlmErrorKind::RateLimit,
            500..=599 => LlmErrorKind::ServerError,
            _ => LlmErrorKind::Unknown,
        };
        Self::new(kind, message)
    }
}

/// Error classification, keyed by the HTTP status class of the remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Network issues, timeouts, closed connections
    Network,
    /// Malformed request (400)
    InvalidRequest,
    /// Invalid credential (401)
    Auth,
    /// Credential lacks permission (403)
    Forbidden,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Response body did not parse
    MalformedResponse,
    /// Anything else
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(LlmError::from_status(400, "").kind, LlmErrorKind::InvalidRequest);
        assert_eq!(LlmError::from_status(401, "").kind, LlmErrorKind::Auth);
        assert_eq!(LlmError::from_status(403, "").kind, LlmErrorKind::Forbidden);
        assert_eq!(LlmError::from_status(429, "").kind, LlmErrorKind::RateLimit);
        assert_eq!(LlmError::from_status(503, "").kind, LlmErrorKind::ServerError);
        assert_eq!(LlmError::from_status(418, "").kind, LlmErrorKind::Unknown);
    }
}
