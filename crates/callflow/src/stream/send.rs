use crate::{
    Error,
    call::{CallContext, HalfState, Side, shared::CallShared, state::Event},
    channel::Frame,
    stream::Direction,
    telemetry::increment_messages_sent,
};
use bytes::Bytes;
use core::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tonic::Status;

/// The outgoing direction of a call.
///
/// Messages are delivered in the order they are sent. `send` waits while the
/// channel buffer is full, and stops waiting as soon as the call is aborted.
#[derive(Debug)]
pub struct SendHalf<T> {
    tx: mpsc::Sender<Frame>,
    shared: Arc<CallShared>,
    _message: PhantomData<fn(T)>,
}

impl<T> SendHalf<T> {
    pub(crate) const fn new(tx: mpsc::Sender<Frame>, shared: Arc<CallShared>) -> Self {
        Self {
            tx,
            shared,
            _message: PhantomData,
        }
    }

    pub fn context(&self) -> CallContext {
        CallContext::new(self.shared.clone())
    }

    /// Pushes a frame, giving up if the call is aborted first.
    ///
    /// A closed channel means the peer stopped receiving. That is reported to
    /// the caller as `UNAVAILABLE` but does not decide the call's outcome:
    /// the peer's terminal status arrives on the receive half.
    async fn push(&self, frame: Frame) -> Result<(), Status> {
        tokio::select! {
            biased;
            () = self.shared.aborted() => Err(self.shared.abort_status()),
            sent = self.tx.send(frame) => sent.map_err(|_| {
                let _ = self.shared.apply(Event::LocalAborted);
                Status::from(Error::Transport {
                    context: "peer stopped receiving".to_string(),
                })
            }),
        }
    }

    fn fatal(&self, err: Error) -> Status {
        let status = Status::from(err);
        self.shared.fail(status.clone(), true);
        self.shared.terminal_error().unwrap_or(status)
    }

    /// Sends the client's end-of-stream signal.
    ///
    /// Calling it again, or after the call ended, is a no-op. Handlers never
    /// see the server's send half; the drivers end the response direction
    /// with the trailers.
    ///
    /// # Errors
    ///
    /// Returns the call's failure status if the call is aborted while the
    /// end-of-stream signal waits for buffer space.
    pub async fn close_send(&mut self) -> Result<(), Status> {
        match self.shared.apply(Event::LocalClosed) {
            Ok(true) => self.push(Frame::HalfClose).await,
            Ok(false) => Ok(()),
            Err(e) => Err(self.fatal(e)),
        }
    }

    /// Records the server's outcome and sends it as the trailers frame.
    ///
    /// Nothing is sent if the call already ended, e.g. because the client
    /// cancelled it or its deadline passed.
    pub(crate) async fn finish(&mut self, outcome: Result<(), Status>) {
        let trailers = match outcome {
            Ok(()) => match self.shared.complete() {
                Ok(true) => Status::ok(""),
                Ok(false) => return,
                Err(e) => {
                    let status = Status::from(e);
                    if !self.shared.fail(status.clone(), false) {
                        return;
                    }
                    status
                }
            },
            Err(status) => {
                if !self.shared.fail(status.clone(), false) {
                    return;
                }
                status
            }
        };

        // The abort signal has fired for an error outcome, so race the peer's
        // reset instead.
        tokio::select! {
            biased;
            _ = self.shared.reset().wait() => {}
            _ = self.tx.send(Frame::Trailers(trailers)) => {}
        }
    }
}

impl<T: prost::Message> SendHalf<T> {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// - The call's terminal status if the call has already failed.
    /// - `UNAVAILABLE` if the peer stopped receiving.
    /// - `INTERNAL` if this half was closed or the message breaks the call
    ///   shape. Both fail the call.
    pub async fn send(&mut self, message: T) -> Result<(), Status> {
        let state = self.shared.snapshot();
        if state.is_terminal() {
            return Err(self.shared.closed_status(Direction::Send));
        }
        if state.local() == HalfState::Aborted {
            return Err(Error::Transport {
                context: "peer stopped receiving".to_string(),
            }
            .into());
        }

        match self.shared.apply(Event::LocalMessage) {
            Ok(true) => {}
            Ok(false) => return Err(self.shared.closed_status(Direction::Send)),
            Err(e) => return Err(self.fatal(e)),
        }

        self.push(Frame::Message(Bytes::from(message.encode_to_vec())))
            .await?;
        increment_messages_sent();
        Ok(())
    }
}

impl<T> Drop for SendHalf<T> {
    fn drop(&mut self) {
        if self.shared.side() != Side::Client {
            return;
        }
        let state = self.shared.snapshot();
        if state.is_terminal() || state.local() != HalfState::Open {
            return;
        }

        match self.shared.apply(Event::LocalClosed) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                self.shared.fail(e.into(), true);
                return;
            }
        }
        match self.tx.try_send(Frame::HalfClose) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.fail(Error::Cancelled.into(), true);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
