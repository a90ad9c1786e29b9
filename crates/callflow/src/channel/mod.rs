//! The message channel underneath a single call.
//!
//! A channel is a duplex, ordered, reliable pipe of [`Frame`]s between one
//! client and one server for exactly one call. Each direction is a bounded
//! queue so a slow peer applies backpressure instead of growing memory.
//! Aborts travel out of band through a shared [`ResetHandle`] so a full data
//! queue can never delay cancellation.
//!
//! Transports plug in by implementing [`Transport::open`] and handing the
//! server an [`IncomingCall`] for every opened channel. The in-process
//! [`memory`] transport is the reference implementation.

pub mod memory;

use crate::{
    call::{CallId, CallShape},
    error::Result,
};
use bytes::Bytes;
use core::{future::Future, time::Duration};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tonic::Status;

/// One logical event on a call's channel.
#[derive(Debug)]
pub enum Frame {
    /// An encoded application message.
    Message(Bytes),
    /// The client will send no more messages.
    HalfClose,
    /// The server's terminal status, `OK` or an error. Always the last frame
    /// the server sends.
    Trailers(Status),
}

/// Metadata sent when a call is opened.
#[derive(Clone, Debug)]
pub struct CallHeader {
    pub id: CallId,
    /// Fully-qualified method path, e.g. `/calculator.CalculatorService/Sum`.
    pub method: String,
    pub shape: CallShape,
    /// Time budget relative to the moment the peer receives the header. The
    /// server re-anchors it on its own clock.
    pub timeout: Option<Duration>,
}

impl CallHeader {
    /// Returns the `package.Service` part of the method path.
    pub fn service(&self) -> &str {
        self.method
            .trim_start_matches('/')
            .split_once('/')
            .map_or("", |(service, _)| service)
    }
}

/// Out-of-band abort slot shared by both ends of a channel.
///
/// The first status recorded wins; later resets are ignored.
#[derive(Clone, Debug)]
pub struct ResetHandle {
    inner: Arc<watch::Sender<Option<Status>>>,
}

impl Default for ResetHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Aborts the call for both ends. Returns `false` if a reset was already
    /// recorded.
    pub fn reset(&self, status: Status) -> bool {
        self.inner.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(status);
            true
        })
    }

    pub fn status(&self) -> Option<Status> {
        self.inner.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Status>> {
        self.inner.subscribe()
    }

    /// Resolves with the reset status once either end resets the call.
    pub async fn wait(&self) -> Status {
        let mut rx = self.subscribe();
        let status = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| slot.clone());
        match status {
            Some(status) => status,
            // The sender lives as long as `self`.
            None => core::future::pending().await,
        }
    }
}

/// One end of a call's channel.
#[derive(Debug)]
pub struct ChannelEnd {
    pub(crate) tx: mpsc::Sender<Frame>,
    pub(crate) rx: mpsc::Receiver<Frame>,
    pub(crate) reset: ResetHandle,
}

impl ChannelEnd {
    /// Assembles a channel end from its parts. Transports that pump frames to
    /// and from a socket construct their ends with this.
    pub const fn new(
        tx: mpsc::Sender<Frame>,
        rx: mpsc::Receiver<Frame>,
        reset: ResetHandle,
    ) -> Self {
        Self { tx, rx, reset }
    }
}

/// Builds a connected pair of channel ends, `(client, server)`.
///
/// Each direction buffers at most `capacity` frames.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn pair(capacity: usize) -> (ChannelEnd, ChannelEnd) {
    let (client_tx, server_rx) = mpsc::channel(capacity);
    let (server_tx, client_rx) = mpsc::channel(capacity);
    let reset = ResetHandle::new();
    (
        ChannelEnd::new(client_tx, client_rx, reset.clone()),
        ChannelEnd::new(server_tx, server_rx, reset),
    )
}

/// A call accepted by a transport and waiting to be served.
#[derive(Debug)]
pub struct IncomingCall {
    pub header: CallHeader,
    pub channel: ChannelEnd,
}

/// Opens call channels towards a server.
pub trait Transport: Send + Sync + 'static {
    /// Opens the channel for one call and delivers `header` to the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the server
    /// cannot be reached.
    fn open(&self, header: CallHeader) -> impl Future<Output = Result<ChannelEnd>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_splits_service_from_method() {
        let header = CallHeader {
            id: CallId(1),
            method: "/calculator.CalculatorService/Sum".into(),
            shape: CallShape::Unary,
            timeout: None,
        };
        assert_eq!(header.service(), "calculator.CalculatorService");
    }

    #[test]
    fn first_reset_wins() {
        let reset = ResetHandle::new();
        assert!(reset.reset(Status::cancelled("first")));
        assert!(!reset.reset(Status::deadline_exceeded("second")));
        assert_eq!(reset.status().map(|s| s.code()), Some(tonic::Code::Cancelled));
    }
}
