use crate::{
    Error,
    call::{CallContext, Side, shared::CallShared, state::Event},
    channel::Frame,
    stream::Direction,
    telemetry::increment_messages_received,
};
use bytes::Bytes;
use core::marker::PhantomData;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tonic::{Code, Status};

/// Outcome of one [`Streaming::recv`].
///
/// End of stream and failure are distinct results; end of stream is never
/// reported as an error.
#[derive(Debug)]
pub enum Received<T> {
    Message(T),
    /// The peer ended the direction normally. For a client this also means the
    /// call completed with `OK`.
    EndOfStream,
    /// The call failed. Carries the terminal status.
    Error(Status),
}

/// The incoming direction of a call.
///
/// Each message is delivered once, in the order the peer sent it. No message
/// is delivered after the call aborts.
///
/// Dropping a client's `Streaming` before it reports the end of the call
/// cancels the call.
#[derive(Debug)]
pub struct Streaming<T> {
    rx: mpsc::Receiver<Frame>,
    shared: Arc<CallShared>,
    done: bool,
    _message: PhantomData<fn() -> T>,
}

impl<T> Streaming<T> {
    pub(crate) const fn new(rx: mpsc::Receiver<Frame>, shared: Arc<CallShared>) -> Self {
        Self {
            rx,
            shared,
            done: false,
            _message: PhantomData,
        }
    }

    pub fn context(&self) -> CallContext {
        CallContext::new(self.shared.clone())
    }

    fn finished(&mut self, status: Status) -> Received<T> {
        self.done = true;
        Received::Error(self.shared.terminal_error().unwrap_or(status))
    }

    fn fatal(&mut self, err: Error) -> Received<T> {
        let status = Status::from(err);
        self.shared.fail(status.clone(), true);
        self.finished(status)
    }

    fn on_half_close(&mut self) -> Received<T> {
        if self.shared.side() != Side::Server {
            return self.fatal(Error::ProtocolViolation {
                context: "client received an end-of-stream frame".to_string(),
            });
        }
        match self.shared.apply(Event::RemoteClosed) {
            Ok(true) => {
                self.done = true;
                Received::EndOfStream
            }
            Ok(false) => self.finished(self.shared.closed_status(Direction::Receive)),
            Err(e) => self.fatal(e),
        }
    }

    fn on_trailers(&mut self, status: Status) -> Received<T> {
        if self.shared.side() != Side::Client {
            return self.fatal(Error::ProtocolViolation {
                context: "server received a trailers frame".to_string(),
            });
        }
        if status.code() != Code::Ok {
            self.shared.fail(status.clone(), false);
            return self.finished(status);
        }
        match self
            .shared
            .apply(Event::RemoteClosed)
            .and_then(|_| self.shared.complete())
        {
            Ok(true) => {
                self.done = true;
                Received::EndOfStream
            }
            Ok(false) => self.finished(self.shared.closed_status(Direction::Receive)),
            Err(e) => self.fatal(e),
        }
    }

    /// The channel closed without a terminal frame. A recorded reset explains
    /// it; otherwise the transport failed underneath the call.
    fn on_disconnect(&mut self) -> Received<T> {
        match self.shared.reset().status() {
            Some(status) => {
                self.shared.fail(status.clone(), false);
                self.finished(status)
            }
            None => self.fatal(Error::Transport {
                context: "channel closed before the call completed".to_string(),
            }),
        }
    }
}

impl<T: prost::Message + Default> Streaming<T> {
    /// Waits for the next message, the end of the stream, or the call's
    /// failure.
    ///
    /// Once the stream has ended, further calls report the call's terminal
    /// status, or a "receive half closed" error if it completed normally.
    /// Neither affects the call.
    pub async fn recv(&mut self) -> Received<T> {
        if self.done {
            return Received::Error(self.shared.closed_status(Direction::Receive));
        }

        let next = tokio::select! {
            biased;
            () = self.shared.aborted() => None,
            frame = self.rx.recv() => Some(frame),
        };

        match next {
            None => {
                let status = self.shared.abort_status();
                self.finished(status)
            }
            Some(Some(Frame::Message(bytes))) => self.on_message(bytes),
            Some(Some(Frame::HalfClose)) => self.on_half_close(),
            Some(Some(Frame::Trailers(status))) => self.on_trailers(status),
            Some(None) => self.on_disconnect(),
        }
    }

    /// Like [`recv`](Self::recv), folded into a `Result`: `Ok(None)` at end of
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns the call's status if it failed.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        match self.recv().await {
            Received::Message(message) => Ok(Some(message)),
            Received::EndOfStream => Ok(None),
            Received::Error(status) => Err(status),
        }
    }

    /// Adapts the half into a [`Stream`] that ends after end of stream or
    /// after yielding the call's failure.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, Status>> + Send + 'static
    where
        T: Send + 'static,
    {
        futures::stream::unfold(Some(self), |state| async move {
            let mut streaming = state?;
            match streaming.recv().await {
                Received::Message(message) => Some((Ok(message), Some(streaming))),
                Received::EndOfStream => None,
                Received::Error(status) => Some((Err(status), None)),
            }
        })
    }

    fn on_message(&mut self, bytes: Bytes) -> Received<T> {
        match self.shared.apply(Event::RemoteMessage) {
            Ok(true) => {}
            Ok(false) => return self.finished(self.shared.closed_status(Direction::Receive)),
            Err(e) => return self.fatal(e),
        }
        match T::decode(bytes) {
            Ok(message) => {
                increment_messages_received();
                Received::Message(message)
            }
            Err(e) => self.fatal(Error::from(e)),
        }
    }
}

impl<T> Drop for Streaming<T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        match self.shared.side() {
            Side::Client => {
                self.shared.fail(Error::Cancelled.into(), true);
            }
            Side::Server => {
                let _ = self.shared.apply(Event::RemoteAbandoned);
            }
        }
    }
}
