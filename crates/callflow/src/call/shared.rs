use crate::{
    Error,
    call::{
        CallShape, Side,
        state::{CallState, Event, HalfState},
    },
    channel::{CallHeader, ResetHandle},
    error::Result,
    stream::Direction,
    telemetry::{
        decrement_calls_inflight, increment_call_errors, increment_calls_started,
        increment_calls_inflight, record_call_duration,
    },
};
use std::sync::Arc;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// State shared by one side's halves, context and controller for a call.
///
/// Every mutation goes through [`CallShared::apply`], which runs the
/// transition inside the `watch` sender so only one mutator runs at a time.
/// `abort` fires exactly once, when a failure becomes the terminal outcome.
#[derive(Debug)]
pub(crate) struct CallShared {
    header: CallHeader,
    side: Side,
    started: Instant,
    deadline: Option<Instant>,
    state: watch::Sender<CallState>,
    abort: CancellationToken,
    reset: ResetHandle,
}

impl CallShared {
    pub(crate) fn new(header: CallHeader, side: Side, reset: ResetHandle) -> Arc<Self> {
        let started = Instant::now();
        let deadline = header
            .timeout
            .and_then(|timeout| started.checked_add(timeout));
        let (state, _rx) = watch::channel(CallState::new(side, header.shape));

        increment_calls_started(side);
        increment_calls_inflight();

        Arc::new(Self {
            header,
            side,
            started,
            deadline,
            state,
            abort: CancellationToken::new(),
            reset,
        })
    }

    pub(crate) const fn header(&self) -> &CallHeader {
        &self.header
    }

    pub(crate) const fn side(&self) -> Side {
        self.side
    }

    pub(crate) const fn shape(&self) -> CallShape {
        self.header.shape
    }

    pub(crate) const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) const fn reset(&self) -> &ResetHandle {
        &self.reset
    }

    pub(crate) fn snapshot(&self) -> CallState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Applies `event` atomically and wakes anyone watching the state.
    pub(crate) fn apply(&self, event: Event) -> Result<bool> {
        let mut result = Ok(false);
        self.state.send_if_modified(|state| match state.apply(event) {
            Ok(changed) => {
                result = Ok(changed);
                changed
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Records `status` as the terminal outcome unless one already exists.
    ///
    /// On success the abort signal fires, and with `propagate` the peer is
    /// reset with the same status. Returns whether this call won.
    pub(crate) fn fail(&self, status: Status, propagate: bool) -> bool {
        let recorded = matches!(self.apply(Event::Finish(Err(status.clone()))), Ok(true));
        if !recorded {
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            call = %self.header.id,
            method = %self.header.method,
            side = ?self.side,
            code = ?status.code(),
            "call failed: {}",
            status.message()
        );

        increment_call_errors(status.code());
        self.abort.cancel();
        if propagate {
            self.reset.reset(status);
        }
        true
    }

    /// Records a successful terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the call has not completed in
    /// both directions. The state is left untouched in that case.
    pub(crate) fn complete(&self) -> Result<bool> {
        self.apply(Event::Finish(Ok(())))
    }

    /// The terminal error, if the call failed.
    pub(crate) fn terminal_error(&self) -> Option<Status> {
        match self.state.borrow().outcome() {
            Some(Err(status)) => Some(status.clone()),
            _ => None,
        }
    }

    /// Status reported when a half of this call is used after it ended.
    pub(crate) fn closed_status(&self, direction: Direction) -> Status {
        self.terminal_error()
            .unwrap_or_else(|| Error::HalfClosed { direction }.into())
    }

    /// Status reported to work that was interrupted by the abort signal.
    pub(crate) fn abort_status(&self) -> Status {
        self.terminal_error()
            .unwrap_or_else(|| Error::Cancelled.into())
    }

    /// Resolves once a failure is recorded.
    pub(crate) async fn aborted(&self) {
        self.abort.cancelled().await;
    }

    /// Resolves once any terminal outcome is recorded.
    pub(crate) async fn terminated(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(CallState::is_terminal).await;
    }

    /// Resolves once the incoming direction is no longer open, or the call
    /// has ended. Returns the state observed at that point.
    pub(crate) async fn remote_settled(&self) -> CallState {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| state.remote() != HalfState::Open || state.is_terminal())
            .await
            .ok()
            .map(|state| state.clone());
        settled.unwrap_or_else(|| self.snapshot())
    }
}

impl Drop for CallShared {
    fn drop(&mut self) {
        decrement_calls_inflight();
        record_call_duration(self.started.elapsed().as_secs_f64() * 1000.0);
    }
}
