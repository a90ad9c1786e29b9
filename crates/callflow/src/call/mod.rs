//! Call lifecycle.
//!
//! A call is one RPC invocation. Both the client and the server keep their own
//! [`CallState`] for it, driven by the frames each side sends and receives, and
//! shared between that side's send and receive halves through an internal
//! `CallShared`.
//!
//! ## Submodules
//!
//! - [`state`] - the transition function and its invariants.
//! - [`controller`] - deadline and cancellation supervision, and the
//!   [`CallContext`] handed to handlers.

pub mod controller;
pub(crate) mod shared;
pub mod state;

pub use controller::CallContext;
pub use state::{CallState, HalfState, Phase};

use core::fmt;

/// Identifier of a call, unique per client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The four interaction patterns.
///
/// Every shape is the same protocol; the non-bidirectional shapes restrict
/// one or both directions to exactly one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

impl CallShape {
    /// Whether the client may send more than one message.
    pub const fn client_streams(self) -> bool {
        matches!(self, Self::ClientStream | Self::BidiStream)
    }

    /// Whether the server may send more than one message.
    pub const fn server_streams(self) -> bool {
        matches!(self, Self::ServerStream | Self::BidiStream)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ServerStream => "server_stream",
            Self::ClientStream => "client_stream",
            Self::BidiStream => "bidi_stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the call a [`CallState`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// Whether this side's outgoing direction may carry more than one message.
    pub const fn sends_stream(self, shape: CallShape) -> bool {
        match self {
            Self::Client => shape.client_streams(),
            Self::Server => shape.server_streams(),
        }
    }

    /// Whether this side's incoming direction may carry more than one message.
    pub const fn receives_stream(self, shape: CallShape) -> bool {
        match self {
            Self::Client => shape.server_streams(),
            Self::Server => shape.client_streams(),
        }
    }
}
