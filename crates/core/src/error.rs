//! Error types for b2kit-core
//!
//! Transport failures carry their own retry classification, decided once by the
//! transport that observed them. The engines never re-classify.

use thiserror::Error;

/// Result type alias for b2kit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Whether a transport failure may succeed on a later attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Network blips, throttling, expired upload credentials
    Transient,
    /// Malformed request, permanent denial, exhausted quota
    Fatal,
}

/// A failure reported by a single transport call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// HTTP status of the service response, if one was received
    pub status: Option<u16>,
    /// Service error code, e.g. `expired_auth_token`
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Transient,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Fatal,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Classify a service response by status and error code
    pub fn from_status(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        let kind = if is_retryable_status(status, code) {
            TransportErrorKind::Transient
        } else {
            TransportErrorKind::Fatal
        };

        Self {
            kind,
            status: Some(status),
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Whether reattempting the same call may succeed
    pub fn should_retry(&self) -> bool {
        self.kind == TransportErrorKind::Transient
    }
}

fn is_retryable_status(status: u16, code: Option<&str>) -> bool {
    match status {
        408 | 429 | 500 | 502 | 503 | 504 => true,
        // Upload tokens expire; a fresh upload URL fixes it
        401 => matches!(code, Some("expired_auth_token") | Some("bad_auth_token")),
        _ => false,
    }
}

/// Main error type for b2kit operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Upload failed: {source}")]
    FatalUpload {
        #[source]
        source: TransportError,
    },

    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// The transport failure behind this error, if any
    pub fn transport_cause(&self) -> Option<&TransportError> {
        match self {
            Error::Transport(e)
            | Error::FatalUpload { source: e }
            | Error::MaxRetriesExceeded { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(TransportError::from_status(503, None, "busy").should_retry());
        assert!(TransportError::from_status(429, Some("too_many_requests"), "slow").should_retry());
        assert!(TransportError::from_status(500, None, "oops").should_retry());
        assert!(
            TransportError::from_status(401, Some("expired_auth_token"), "expired").should_retry()
        );

        assert!(!TransportError::from_status(401, Some("unauthorized"), "denied").should_retry());
        assert!(!TransportError::from_status(400, Some("bad_request"), "bad").should_retry());
        assert!(!TransportError::from_status(403, Some("cap_exceeded"), "quota").should_retry());
    }

    #[test]
    fn test_transport_cause() {
        let err = Error::MaxRetriesExceeded {
            attempts: 6,
            source: TransportError::transient("timeout"),
        };
        assert_eq!(err.transport_cause().unwrap().message, "timeout");
        assert!(Error::Cancelled.transport_cause().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = Error::FatalUpload {
            source: TransportError::fatal("bad request"),
        };
        assert_eq!(err.to_string(), "Upload failed: bad request");
    }
}
