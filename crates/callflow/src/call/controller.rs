//! Deadline and cancellation supervision.
//!
//! Every call gets one controller task per side. It races the call's natural
//! completion against the signals that may end it early and records the first
//! one that fires:
//!
//! | Signal | Terminal status | Reset sent to the peer |
//! |---|---|---|
//! | deadline expiry | `DEADLINE_EXCEEDED` | yes |
//! | caller's cancellation token | `CANCELLED` | yes |
//! | server shutdown | `UNAVAILABLE` | yes |
//! | peer reset | the peer's status | no |
//!
//! Recording a failure fires the call's abort signal, which every pending
//! `send`/`recv` selects on, so blocked tasks wake up immediately instead of
//! discovering the failure on their next poll of the channel.

use crate::{
    Error,
    call::{CallId, CallShape, CallState, Side, shared::CallShared},
};
use core::{future::pending, time::Duration};
use std::sync::Arc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// External signals a controller watches in addition to the deadline.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    pub cancel: Option<CancellationToken>,
    pub shutdown: Option<CancellationToken>,
}

/// Spawns the controller for one side of a call.
///
/// The task exits as soon as the call reaches a terminal state.
pub(crate) fn spawn(shared: Arc<CallShared>, signals: Signals) {
    tokio::spawn(supervise(shared, signals));
}

async fn supervise(shared: Arc<CallShared>, signals: Signals) {
    let deadline = async {
        match shared.deadline() {
            Some(at) => sleep_until(at).await,
            None => pending().await,
        }
    };
    let cancelled = async {
        match &signals.cancel {
            Some(token) => token.cancelled().await,
            None => pending().await,
        }
    };
    let shutdown = async {
        match &signals.shutdown {
            Some(token) => token.cancelled().await,
            None => pending().await,
        }
    };

    tokio::select! {
        biased;
        () = shared.terminated() => {}
        status = shared.reset().wait() => {
            shared.fail(status, false);
        }
        () = deadline => {
            #[cfg(feature = "tracing")]
            tracing::debug!(call = %shared.header().id, "deadline expired");
            shared.fail(Error::DeadlineExceeded.into(), true);
        }
        () = cancelled => {
            shared.fail(Error::Cancelled.into(), true);
        }
        () = shutdown => {
            shared.fail(Error::ServiceShutdown.into(), true);
        }
    }
}

/// Handle on a running call, given to handlers and callers.
///
/// Cloning is cheap. Long-running work can either poll
/// [`is_active`](Self::is_active) at safe points or select on
/// [`cancelled`](Self::cancelled) to stop as soon as the call is aborted.
#[derive(Clone, Debug)]
pub struct CallContext {
    shared: Arc<CallShared>,
}

impl CallContext {
    pub(crate) const fn new(shared: Arc<CallShared>) -> Self {
        Self { shared }
    }

    pub(crate) const fn shared(&self) -> &Arc<CallShared> {
        &self.shared
    }

    pub fn id(&self) -> CallId {
        self.shared.header().id
    }

    pub fn method(&self) -> &str {
        &self.shared.header().method
    }

    pub fn shape(&self) -> CallShape {
        self.shared.shape()
    }

    pub fn side(&self) -> Side {
        self.shared.side()
    }

    /// Absolute deadline on this side's clock, if the call has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline()
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.shared
            .deadline()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns `false` once the call has a terminal outcome.
    pub fn is_active(&self) -> bool {
        !self.shared.is_terminal()
    }

    /// Resolves with the failure status once the call is aborted by a
    /// deadline, a cancellation, a reset from the peer or a fatal error.
    pub async fn cancelled(&self) -> Status {
        self.shared.aborted().await;
        self.shared.abort_status()
    }

    /// The terminal error, if the call has failed.
    pub fn status(&self) -> Option<Status> {
        self.shared.terminal_error()
    }

    pub fn state(&self) -> CallState {
        self.shared.snapshot()
    }

    /// Cancels the call on both sides.
    ///
    /// Returns `false` if the call had already ended.
    pub fn cancel(&self) -> bool {
        self.shared.fail(Error::Cancelled.into(), true)
    }
}
