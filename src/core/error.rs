//! Error types for the endpoint/session/stream layer.
//!
//! Synchronous failures are [`QuicError`]: the operation never started.
//! Asynchronous failures are [`CloseError`] and only ever arrive through a
//! pending-close future ([`Closed`](super::Closed)).

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use super::types::{CloseContext, CloseErrorKind};

/// Errors raised synchronously at the call site.
#[derive(Debug, Error)]
pub enum QuicError {
    /// Argument has the wrong type or shape.
    #[error("invalid argument type for `{name}`: expected {expected}")]
    InvalidArgType {
        /// Argument name.
        name: &'static str,
        /// Expected type.
        expected: &'static str,
    },

    /// Argument has the right type but an unacceptable value.
    #[error("invalid value for `{name}`: {reason}")]
    InvalidArgValue {
        /// Argument name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Numeric option outside its documented bounds.
    #[error("`{name}` out of range: {value} is not in {range}")]
    OutOfRange {
        /// Option name.
        name: &'static str,
        /// Offending value.
        value: String,
        /// Accepted range.
        range: String,
    },

    /// Operation attempted on a closed, closing or busy entity.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The engine declined to create the session.
    #[error("QUIC connection failed")]
    ConnectionFailed,

    /// The engine declined to open the stream, or stream opening is not
    /// allowed yet.
    #[error("failed to open QUIC stream")]
    OpenStreamFailed,

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The engine reported a failure for a call it accepted.
    #[error("native engine error: {0}")]
    Native(String),
}

impl QuicError {
    /// Build an [`QuicError::OutOfRange`] from displayable parts.
    pub fn out_of_range(
        name: &'static str,
        value: impl std::fmt::Display,
        range: impl std::fmt::Display,
    ) -> Self {
        QuicError::OutOfRange {
            name,
            value: value.to_string(),
            range: range.to_string(),
        }
    }

    /// Build an [`QuicError::InvalidArgValue`].
    pub fn invalid_value(name: &'static str, reason: impl Into<String>) -> Self {
        QuicError::InvalidArgValue {
            name,
            reason: reason.into(),
        }
    }

    /// Wrong type, shape or value of an argument (including range errors).
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            QuicError::InvalidArgType { .. }
                | QuicError::InvalidArgValue { .. }
                | QuicError::OutOfRange { .. }
                | QuicError::Config(_)
        )
    }

    /// Numeric bound violation.
    pub fn is_range_error(&self) -> bool {
        matches!(self, QuicError::OutOfRange { .. })
    }

    /// The entity was closed, closing or busy.
    pub fn is_state_error(&self) -> bool {
        matches!(self, QuicError::InvalidState(_))
    }

    /// Preconditions held but the engine declined.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            QuicError::ConnectionFailed | QuicError::OpenStreamFailed | QuicError::Native(_)
        )
    }
}

/// Result type for synchronous operations.
pub type QuicResult<T> = Result<T, QuicError>;

/// Failures delivered through a pending-close future.
#[derive(Debug, Clone, Error)]
pub enum CloseError {
    /// The endpoint was closed by the engine because of a socket-level
    /// failure.
    #[error("QUIC endpoint closed: {context} (status {status})")]
    EndpointClosed {
        /// What failed.
        context: CloseContext,
        /// Native status code.
        status: i32,
    },

    /// The session was closed with a non-zero transport or application
    /// error code.
    #[error("QUIC session closed with {kind} error {code}: {reason}")]
    Session {
        /// Error space.
        kind: CloseErrorKind,
        /// Error code.
        code: u64,
        /// Reason phrase sent by the peer, possibly empty.
        reason: String,
    },

    /// Error supplied by the application to `destroy()`.
    #[error("aborted: {0}")]
    Aborted(Arc<dyn StdError + Send + Sync>),
}

impl CloseError {
    /// Wrap an application error for `destroy()`.
    pub fn aborted<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CloseError::Aborted(Arc::new(error))
    }

    /// Native status code carried by an endpoint closed-context error.
    pub fn status(&self) -> Option<i32> {
        match self {
            CloseError::EndpointClosed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert!(QuicError::out_of_range("udpTTL", 256, "0..=255").is_argument_error());
        assert!(QuicError::out_of_range("udpTTL", 256, "0..=255").is_range_error());
        assert!(QuicError::invalid_value("cc", "unknown").is_argument_error());
        assert!(QuicError::InvalidState("Endpoint is closed").is_state_error());
        assert!(QuicError::ConnectionFailed.is_operational());
        assert!(QuicError::OpenStreamFailed.is_operational());
        assert!(!QuicError::OpenStreamFailed.is_state_error());
    }

    #[test]
    fn test_close_error_display() {
        let err = CloseError::EndpointClosed {
            context: CloseContext::BindFailure,
            status: -98,
        };
        assert_eq!(err.status(), Some(-98));
        assert_eq!(
            err.to_string(),
            "QUIC endpoint closed: Bind failure (status -98)"
        );

        let err = CloseError::aborted(std::io::Error::other("boom"));
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "aborted: boom");
    }
}
