//! Client invocation.
//!
//! [`Client`] opens one call per invocation over a [`Transport`] and returns
//! a typed handle for the call's shape:
//!
//! | Shape | Returns |
//! |---|---|
//! | unary | the response |
//! | server stream | a [`Streaming`] of responses |
//! | client stream | a [`ClientStreamingCall`] |
//! | bidirectional | a [`SendHalf`] and a [`Streaming`], usable from separate tasks |
//!
//! Whenever sending fails because the server already ended the call, the
//! status reported is the one the server sent, not the local send error.

use crate::{
    Error,
    call::{
        CallContext, CallId, CallShape, Side,
        controller::{self, Signals},
        shared::CallShared,
        state::Event,
    },
    channel::{CallHeader, ChannelEnd, Transport},
    stream::{Received, SendHalf, Streaming},
};
use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the call with `DEADLINE_EXCEEDED` once `timeout` has elapsed.
    /// The timeout travels to the server with the call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Like [`timeout`](Self::timeout), from an absolute deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.timeout = Some(deadline.saturating_duration_since(Instant::now()));
        self
    }

    /// Cancels the call when `token` is cancelled.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Invokes methods over a transport. Cloning is cheap; clones share the call
/// id sequence.
#[derive(Clone, Debug)]
pub struct Client<T> {
    transport: T,
    next_id: Arc<AtomicU64>,
    timeout: Option<Duration>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
            timeout: None,
        }
    }

    /// Default timeout for calls whose options set none.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn open<Req, Resp>(
        &self,
        method: &str,
        shape: CallShape,
        options: CallOptions,
    ) -> Result<(SendHalf<Req>, Streaming<Resp>), Status> {
        let header = CallHeader {
            id: CallId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            method: method.to_string(),
            shape,
            timeout: options.timeout.or(self.timeout),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(call = %header.id, method, %shape, "opening call");

        let ChannelEnd { tx, rx, reset } = self.transport.open(header.clone()).await?;
        let shared = CallShared::new(header, Side::Client, reset);
        let _ = shared.apply(Event::Established);
        controller::spawn(
            shared.clone(),
            Signals {
                cancel: options.cancel,
                shutdown: None,
            },
        );

        Ok((SendHalf::new(tx, shared.clone()), Streaming::new(rx, shared)))
    }

    /// Sends one request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns the call's status if it did not complete with `OK`.
    pub async fn unary<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Resp, Status>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        let (mut requests, responses) = self.open(method, CallShape::Unary, options).await?;
        let sent = send_single(&mut requests, request).await;
        let response = single_response(responses).await?;
        sent.map(|()| response)
    }

    /// Sends one request and returns the stream of responses.
    ///
    /// # Errors
    ///
    /// Returns the call's status if the request could not be delivered.
    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Streaming<Resp>, Status>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        let (mut requests, mut responses) =
            self.open(method, CallShape::ServerStream, options).await?;
        if let Err(status) = send_single(&mut requests, request).await {
            return Err(server_status(&mut responses, status).await);
        }
        Ok(responses)
    }

    /// Opens a client-streaming call.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if the call could not be opened.
    pub async fn client_streaming<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<Req, Resp>, Status>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        let (requests, responses) = self.open(method, CallShape::ClientStream, options).await?;
        Ok(ClientStreamingCall {
            requests,
            responses,
        })
    }

    /// Opens a bidirectional call. The halves may be moved to separate tasks.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if the call could not be opened.
    pub async fn streaming<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<(SendHalf<Req>, Streaming<Resp>), Status>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        self.open(method, CallShape::BidiStream, options).await
    }
}

/// A client-streaming call in progress.
#[derive(Debug)]
pub struct ClientStreamingCall<Req, Resp> {
    requests: SendHalf<Req>,
    responses: Streaming<Resp>,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp>
where
    Req: prost::Message,
    Resp: prost::Message + Default,
{
    /// Sends one request message.
    ///
    /// # Errors
    ///
    /// Returns the call's status if it has failed, or `UNAVAILABLE` if the
    /// server stopped receiving. In the latter case
    /// [`close_and_recv`](Self::close_and_recv) reports why.
    pub async fn send(&mut self, message: Req) -> Result<(), Status> {
        self.requests.send(message).await
    }

    /// Ends the request stream and waits for the single response.
    ///
    /// # Errors
    ///
    /// Returns the call's status if it did not complete with `OK`.
    pub async fn close_and_recv(mut self) -> Result<Resp, Status> {
        let closed = self.requests.close_send().await;
        let response = single_response(self.responses).await?;
        closed.map(|()| response)
    }

    pub fn context(&self) -> CallContext {
        self.requests.context()
    }
}

async fn send_single<Req: prost::Message>(
    requests: &mut SendHalf<Req>,
    request: Req,
) -> Result<(), Status> {
    requests.send(request).await?;
    requests.close_send().await
}

/// Reads the single response and the call's completion.
async fn single_response<Resp>(mut responses: Streaming<Resp>) -> Result<Resp, Status>
where
    Resp: prost::Message + Default,
{
    let message = responses.message().await?;
    match responses.recv().await {
        Received::EndOfStream => message.ok_or_else(|| {
            Error::ProtocolViolation {
                context: "call completed without a response".to_string(),
            }
            .into()
        }),
        Received::Message(_) => Err(Error::ProtocolViolation {
            context: "more than one response message".to_string(),
        }
        .into()),
        Received::Error(status) => Err(status),
    }
}

/// Prefers the status the server ended the call with over a local send
/// failure.
async fn server_status<Resp>(responses: &mut Streaming<Resp>, fallback: Status) -> Status
where
    Resp: prost::Message + Default,
{
    loop {
        match responses.recv().await {
            Received::Message(_) => continue,
            Received::EndOfStream => return fallback,
            Received::Error(status) => return status,
        }
    }
}
