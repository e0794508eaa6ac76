use std::io;
use thiserror::Error;

use super::types::Stage;
use crate::protocol::validate::Rejection;

/// Custom error types for the staged handshake
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(Rejection),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new malformed frame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedFrame(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Creates a new connection lost error
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Error::ConnectionLost(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns the rejection behind a protocol violation, if any
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::ProtocolViolation(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::ShortHeader { .. } | Rejection::FrameLengthMismatch { .. } => {
                Error::MalformedFrame(rejection.to_string())
            }
            other => Error::ProtocolViolation(other),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout("deadline elapsed".into())
    }
}

/// First failure of a session together with the stage it happened in
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    pub fn new(stage: Stage, source: Error) -> Self {
        StageError { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Secret;

    #[test]
    fn test_error_creation() {
        let err = Error::timeout("no ack");
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timeout: no ack");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_rejection_taxonomy() {
        let err: Error = Rejection::ShortHeader { got: 3 }.into();
        assert!(matches!(err, Error::MalformedFrame(_)));

        let err: Error = Rejection::FrameLengthMismatch { expected: 16, actual: 15 }.into();
        assert!(matches!(err, Error::MalformedFrame(_)));

        let err: Error = Rejection::SecretMismatch {
            expected: Secret(7),
            actual: Secret(8),
        }
        .into();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::SecretMismatch { expected: Secret(7), actual: Secret(8) })
        );
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::new(Stage::Transfer, Error::timeout("retry ceiling reached"));
        assert_eq!(
            err.to_string(),
            "stage B (datagram transfer) failed: Timeout: retry ceiling reached"
        );
    }
}
