//! In-process transport.
//!
//! Every [`MemoryTransport::open`] builds a fresh [`channel::pair`] and queues
//! the server end on a bounded accept backlog, which the server consumes as a
//! [`Stream`](futures::Stream) of [`IncomingCall`]s.

use crate::{
    Error,
    channel::{self, CallHeader, ChannelEnd, IncomingCall, Transport},
    error::Result,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Stream of calls opened through a [`MemoryTransport`].
pub type Incoming = ReceiverStream<IncomingCall>;

/// Client-side handle of the in-process transport.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    accept_tx: mpsc::Sender<IncomingCall>,
    buffer_size: usize,
}

impl MemoryTransport {
    /// Creates a transport whose channels buffer `buffer_size` frames per
    /// direction and whose accept queue holds `backlog` unaccepted calls.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is zero.
    pub fn new(buffer_size: usize, backlog: usize) -> (Self, Incoming) {
        let (accept_tx, accept_rx) = mpsc::channel(backlog);
        (
            Self {
                accept_tx,
                buffer_size,
            },
            ReceiverStream::new(accept_rx),
        )
    }
}

impl Transport for MemoryTransport {
    async fn open(&self, header: CallHeader) -> Result<ChannelEnd> {
        let (client, server) = channel::pair(self.buffer_size);
        self.accept_tx
            .send(IncomingCall {
                header,
                channel: server,
            })
            .await
            .map_err(|_| Error::Transport {
                context: "server is not accepting calls".to_string(),
            })?;
        Ok(client)
    }
}
