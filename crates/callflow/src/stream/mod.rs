//! Directional views of a call.
//!
//! - [`SendHalf`] submits messages in order and ends the direction.
//! - [`Streaming`] consumes messages in order and reports how the direction
//!   ended through [`Received`].
//!
//! Both halves of one side share the call's state, so a failure seen by one
//! unblocks the other.

mod recv;
mod send;

pub use recv::{Received, Streaming};
pub use send::SendHalf;

use core::fmt;

/// A direction of message flow, relative to the side holding the half.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Receive => f.write_str("receive"),
        }
    }
}
