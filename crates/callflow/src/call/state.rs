//! The per-side call state machine.
//!
//! [`CallState::apply`] is the only way a call's state changes. It is a pure
//! transition function; callers make it atomic by running it inside the
//! `watch` channel that holds the state.
//!
//! ## Rules
//!
//! - Phases only move forward: `Initiated → Active → Completing → Terminal`.
//! - `Terminal` absorbs every later event, so the first terminal outcome wins.
//! - A single-message direction carries exactly one message before its end of
//!   stream. Anything else is a protocol violation.
//! - A closed half stays closed. Closing it again is a no-op; sending on it is
//!   a "half closed" error.
//! - A successful finish requires both directions to have completed. A failed
//!   finish is always accepted and aborts every half still open.

use crate::{
    Error,
    call::{CallShape, Side},
    error::Result,
    stream::Direction,
};
use tonic::Status;

/// Lifecycle phase of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Created, channel not yet established.
    Initiated,
    /// Both halves are open.
    Active,
    /// At least one half has finished; the call is winding down.
    Completing,
    /// The terminal outcome is recorded.
    Terminal,
}

/// State of one direction of a call, seen from one side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalfState {
    Open,
    /// Ended normally with an end-of-stream.
    Closed,
    /// The local consumer went away before end of stream.
    Abandoned,
    /// Ended by a failure or by the peer going away.
    Aborted,
}

/// Inputs to [`CallState::apply`].
#[derive(Clone, Debug)]
pub enum Event {
    /// The channel is open on this side.
    Established,
    /// This side is about to send a message.
    LocalMessage,
    /// This side ended its outgoing direction.
    LocalClosed,
    /// The peer no longer receives this side's messages.
    LocalAborted,
    /// A message arrived from the peer.
    RemoteMessage,
    /// The peer ended its outgoing direction.
    RemoteClosed,
    /// The local consumer of the incoming direction went away.
    RemoteAbandoned,
    /// Records the terminal outcome.
    Finish(core::result::Result<(), Status>),
}

/// One side's view of a call.
#[derive(Clone, Debug)]
pub struct CallState {
    side: Side,
    shape: CallShape,
    phase: Phase,
    local: HalfState,
    remote: HalfState,
    sent: u64,
    received: u64,
    outcome: Option<core::result::Result<(), Status>>,
}

impl CallState {
    pub const fn new(side: Side, shape: CallShape) -> Self {
        Self {
            side,
            shape,
            phase: Phase::Initiated,
            local: HalfState::Open,
            remote: HalfState::Open,
            sent: 0,
            received: 0,
            outcome: None,
        }
    }

    pub const fn side(&self) -> Side {
        self.side
    }

    pub const fn shape(&self) -> CallShape {
        self.shape
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// This side's outgoing direction.
    pub const fn local(&self) -> HalfState {
        self.local
    }

    /// This side's incoming direction.
    pub const fn remote(&self) -> HalfState {
        self.remote
    }

    pub const fn sent(&self) -> u64 {
        self.sent
    }

    pub const fn received(&self) -> u64 {
        self.received
    }

    pub const fn outcome(&self) -> Option<&core::result::Result<(), Status>> {
        self.outcome.as_ref()
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Terminal)
    }

    /// Applies one event.
    ///
    /// Returns `Ok(true)` if the state changed and `Ok(false)` if the event
    /// was a no-op (a repeated close, or any event after the terminal
    /// outcome).
    ///
    /// # Errors
    ///
    /// - [`Error::HalfClosed`] when sending on a half that is no longer open.
    /// - [`Error::ProtocolViolation`] when the event breaks the call shape or
    ///   finishes successfully before both directions have completed.
    ///
    /// A rejected event leaves the state untouched.
    pub fn apply(&mut self, event: Event) -> Result<bool> {
        if self.is_terminal() {
            return Ok(false);
        }

        let changed = match event {
            Event::Established => {
                if self.phase != Phase::Initiated {
                    return Ok(false);
                }
                self.phase = Phase::Active;
                true
            }
            Event::LocalMessage => {
                if self.local != HalfState::Open {
                    return Err(Error::HalfClosed {
                        direction: Direction::Send,
                    });
                }
                if !self.side.sends_stream(self.shape) && self.sent >= 1 {
                    return Err(violation(format!(
                        "{} call allows a single {} message",
                        self.shape,
                        self.outgoing()
                    )));
                }
                self.sent += 1;
                true
            }
            Event::LocalClosed => {
                if self.local != HalfState::Open {
                    return Ok(false);
                }
                if !self.side.sends_stream(self.shape) && self.sent == 0 {
                    return Err(violation(format!(
                        "{} call closed without its {} message",
                        self.shape,
                        self.outgoing()
                    )));
                }
                self.local = HalfState::Closed;
                true
            }
            Event::LocalAborted => {
                if self.local != HalfState::Open {
                    return Ok(false);
                }
                self.local = HalfState::Aborted;
                true
            }
            Event::RemoteMessage => {
                if self.remote != HalfState::Open {
                    return Err(violation(format!(
                        "{} message after end of stream",
                        self.incoming()
                    )));
                }
                if !self.side.receives_stream(self.shape) && self.received >= 1 {
                    return Err(violation(format!(
                        "{} call allows a single {} message",
                        self.shape,
                        self.incoming()
                    )));
                }
                self.received += 1;
                true
            }
            Event::RemoteClosed => {
                if self.remote == HalfState::Closed {
                    return Ok(false);
                }
                if self.remote != HalfState::Open {
                    return Err(violation(format!(
                        "{} end of stream after the stream was dropped",
                        self.incoming()
                    )));
                }
                if !self.side.receives_stream(self.shape) && self.received == 0 {
                    return Err(violation(format!(
                        "{} call ended without its {} message",
                        self.shape,
                        self.incoming()
                    )));
                }
                self.remote = HalfState::Closed;
                true
            }
            Event::RemoteAbandoned => {
                if self.remote != HalfState::Open {
                    return Ok(false);
                }
                self.remote = HalfState::Abandoned;
                true
            }
            Event::Finish(Ok(())) => {
                self.check_success()?;
                self.local = HalfState::Closed;
                self.phase = Phase::Terminal;
                self.outcome = Some(Ok(()));
                return Ok(true);
            }
            Event::Finish(Err(status)) => {
                if self.local == HalfState::Open {
                    self.local = HalfState::Aborted;
                }
                if self.remote == HalfState::Open {
                    self.remote = HalfState::Aborted;
                }
                self.phase = Phase::Terminal;
                self.outcome = Some(Err(status));
                return Ok(true);
            }
        };

        if self.phase == Phase::Active
            && (self.local != HalfState::Open || self.remote != HalfState::Open)
        {
            self.phase = Phase::Completing;
        }

        Ok(changed)
    }

    fn check_success(&self) -> Result<()> {
        match self.side {
            Side::Server => {
                if self.remote != HalfState::Closed {
                    return Err(violation(
                        "response finished before the request stream ended".to_string(),
                    ));
                }
                if !self.shape.server_streams() && self.sent != 1 {
                    return Err(violation(format!(
                        "{} call must answer with exactly one response, sent {}",
                        self.shape, self.sent
                    )));
                }
            }
            Side::Client => {
                if self.local != HalfState::Closed {
                    return Err(violation(
                        "call completed while the request stream was still open".to_string(),
                    ));
                }
                if self.remote != HalfState::Closed {
                    return Err(violation(
                        "call completed before the response stream ended".to_string(),
                    ));
                }
                if !self.shape.server_streams() && self.received != 1 {
                    return Err(violation(format!(
                        "{} call must receive exactly one response, got {}",
                        self.shape, self.received
                    )));
                }
            }
        }
        Ok(())
    }

    const fn outgoing(&self) -> &'static str {
        match self.side {
            Side::Client => "request",
            Side::Server => "response",
        }
    }

    const fn incoming(&self) -> &'static str {
        match self.side {
            Side::Client => "response",
            Side::Server => "request",
        }
    }
}

fn violation(context: String) -> Error {
    Error::ProtocolViolation { context }
}
