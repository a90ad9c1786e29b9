//! Error types for the call protocol.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a call can end with, whether raised by a handler, by the deadline and
//! cancellation controller, or by the underlying message channel. It
//! implements `From<Error>` for `tonic::Status` so that failures cross the
//! channel as a stable `(code, message)` pair the invoking side can branch on.
//!
//! ## Error Cases
//! - `InvalidArgument`: A handler rejected its input.
//! - `DeadlineExceeded`: The call outlived its deadline.
//! - `Cancelled`: The caller cancelled the call.
//! - `HalfClosed`: A stream half was used after it was closed.
//! - `ProtocolViolation`: A peer or handler broke the call shape contract.
//! - `Transport`: The message channel failed underneath the call.
//! - `Decode`: A message could not be decoded.
//! - `Internal`: An unexpected fault inside a handler.
//! - `Unimplemented`: No handler is registered for the requested method.
//! - `ServiceShutdown`: The server is shutting down.

use crate::stream::Direction;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for call coordination.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The request was malformed or outside the accepted range.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The deadline attached to the call expired.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled by the caller.
    #[error("Call cancelled")]
    Cancelled,

    /// A message was sent or received on a half that is already closed.
    #[error("{direction} half closed")]
    HalfClosed { direction: Direction },

    /// The call did not follow the message sequence its shape allows.
    #[error("Protocol violation: {context}")]
    ProtocolViolation { context: String },

    /// The message channel failed (peer gone, channel closed).
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// A received message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// An unexpected fault while handling the call.
    #[error("Internal error: {context}")]
    Internal { context: String },

    /// No service or method is registered under the requested path.
    #[error("Unimplemented method: {method}")]
    Unimplemented { method: String },

    /// The server is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns the status code this error is reported with.
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument { .. } => Code::InvalidArgument,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::Cancelled => Code::Cancelled,
            Self::HalfClosed { .. }
            | Self::ProtocolViolation { .. }
            | Self::Decode(_)
            | Self::Internal { .. } => Code::Internal,
            Self::Transport { .. } | Self::ServiceShutdown => Code::Unavailable,
            Self::Unimplemented { .. } => Code::Unimplemented,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument { reason } => Status::invalid_argument(reason),
            Error::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Error::Cancelled => Status::cancelled("Call was cancelled"),
            Error::HalfClosed { direction } => {
                Status::internal(format!("{direction} half closed"))
            }
            Error::ProtocolViolation { context } => {
                Status::internal(format!("Protocol violation: {context}"))
            }
            Error::Transport { context } => Status::unavailable(format!("Transport error: {context}")),
            Error::Decode(e) => Status::internal(format!("Decode error: {e}")),
            Error::Internal { context } => Status::internal(context),
            Error::Unimplemented { method } => {
                Status::unimplemented(format!("Method not found: {method}"))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let cases = [
            (
                Error::InvalidArgument {
                    reason: "negative".into(),
                },
                Code::InvalidArgument,
            ),
            (Error::DeadlineExceeded, Code::DeadlineExceeded),
            (Error::Cancelled, Code::Cancelled),
            (
                Error::HalfClosed {
                    direction: Direction::Send,
                },
                Code::Internal,
            ),
            (
                Error::ProtocolViolation {
                    context: "two responses".into(),
                },
                Code::Internal,
            ),
            (
                Error::Transport {
                    context: "peer gone".into(),
                },
                Code::Unavailable,
            ),
            (
                Error::Internal {
                    context: "boom".into(),
                },
                Code::Internal,
            ),
            (
                Error::Unimplemented {
                    method: "/x.Y/Z".into(),
                },
                Code::Unimplemented,
            ),
            (Error::ServiceShutdown, Code::Unavailable),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn invalid_argument_keeps_reason_verbatim() {
        let status = Status::from(Error::InvalidArgument {
            reason: "Received a negative number: -2".into(),
        });
        assert_eq!(status.message(), "Received a negative number: -2");
    }
}
