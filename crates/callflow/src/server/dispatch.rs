//! Per-shape server drivers.
//!
//! A driver owns one accepted call from start to trailers. It establishes the
//! call, starts its controller, hands the request to the handler and pumps the
//! handler's responses onto the send half. Before reporting success it waits
//! for the request direction to end, which is the join that finalizes the
//! call. Exactly one trailers frame is written, unless the call was already
//! ended by a deadline, a cancellation or a peer reset.
//!
//! Handlers run under an abort race: a handler that never checks its context
//! still stops at its next await point once the call is aborted.

use crate::{
    Error,
    call::{
        CallContext, CallShape, HalfState, Side,
        controller::{self, Signals},
        shared::CallShared,
        state::Event,
    },
    channel::{CallHeader, ChannelEnd, Frame, IncomingCall},
    server::Request,
    stream::{Received, SendHalf, Streaming},
};
use core::{any::Any, future::Future, panic::AssertUnwindSafe, pin::Pin};
use futures::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// The stream of responses returned by server-streaming and bidirectional
/// handlers.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// A call accepted by the server, waiting for a driver.
#[derive(Debug)]
pub struct ServerCall {
    incoming: IncomingCall,
    shutdown: CancellationToken,
}

impl ServerCall {
    pub(crate) const fn new(incoming: IncomingCall, shutdown: CancellationToken) -> Self {
        Self { incoming, shutdown }
    }

    pub const fn header(&self) -> &CallHeader {
        &self.incoming.header
    }

    /// The method name without its service prefix.
    pub fn method_name(&self) -> &str {
        self.incoming
            .header
            .method
            .rsplit_once('/')
            .map_or("", |(_, method)| method)
    }

    /// Starts the call if the client opened it with the expected shape, and
    /// rejects it otherwise.
    async fn accept<Req, Resp>(
        self,
        shape: CallShape,
    ) -> Option<(CallContext, Streaming<Req>, SendHalf<Resp>)> {
        if self.incoming.header.shape != shape {
            let status = Status::from(Error::ProtocolViolation {
                context: format!(
                    "{} is a {shape} method, called as {}",
                    self.incoming.header.method, self.incoming.header.shape
                ),
            });
            reject(self, status).await;
            return None;
        }

        let Self { incoming, shutdown } = self;
        let ChannelEnd { tx, rx, reset } = incoming.channel;
        let shared = CallShared::new(incoming.header, Side::Server, reset);
        let _ = shared.apply(Event::Established);
        controller::spawn(
            shared.clone(),
            Signals {
                cancel: None,
                shutdown: Some(shutdown),
            },
        );

        Some((
            CallContext::new(shared.clone()),
            Streaming::new(rx, shared.clone()),
            SendHalf::new(tx, shared),
        ))
    }
}

/// Ends a call without running a handler, by sending `status` as its
/// trailers.
pub async fn reject(call: ServerCall, status: Status) {
    #[cfg(feature = "tracing")]
    tracing::debug!(
        call = %call.incoming.header.id,
        method = %call.incoming.header.method,
        code = ?status.code(),
        "rejecting call"
    );

    let ChannelEnd { tx, reset, .. } = call.incoming.channel;
    tokio::select! {
        biased;
        _ = reset.wait() => {}
        _ = tx.send(Frame::Trailers(status)) => {}
    }
}

/// Drives a unary call: one request in, one response out.
pub async fn unary<Req, Resp, F, Fut>(call: ServerCall, handler: F)
where
    Req: prost::Message + Default,
    Resp: prost::Message,
    F: FnOnce(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Resp, Status>>,
{
    let Some((ctx, mut requests, mut responses)) = call.accept(CallShape::Unary).await else {
        return;
    };

    let outcome = async {
        let message = single_request(&mut requests).await?;
        let response = guard(&ctx, handler(Request::new(ctx.clone(), message))).await?;
        responses.send(response).await
    }
    .await;

    responses.finish(outcome).await;
}

/// Drives a server-streaming call: one request in, the handler's stream out.
pub async fn server_streaming<Req, Resp, F, Fut>(call: ServerCall, handler: F)
where
    Req: prost::Message + Default,
    Resp: prost::Message,
    F: FnOnce(Request<Req>) -> Fut,
    Fut: Future<Output = Result<ResponseStream<Resp>, Status>>,
{
    let Some((ctx, mut requests, mut responses)) = call.accept(CallShape::ServerStream).await
    else {
        return;
    };

    let outcome = async {
        let message = single_request(&mut requests).await?;
        let stream = guard(&ctx, handler(Request::new(ctx.clone(), message))).await?;
        pump(&ctx, stream, &mut responses).await
    }
    .await;

    responses.finish(outcome).await;
}

/// Drives a client-streaming call: the handler folds the request stream into
/// one response.
pub async fn client_streaming<Req, Resp, F, Fut>(call: ServerCall, handler: F)
where
    Req: prost::Message + Default,
    Resp: prost::Message,
    F: FnOnce(Request<Streaming<Req>>) -> Fut,
    Fut: Future<Output = Result<Resp, Status>>,
{
    let Some((ctx, requests, mut responses)) = call.accept(CallShape::ClientStream).await else {
        return;
    };

    let outcome = async {
        let response = guard(&ctx, handler(Request::new(ctx.clone(), requests))).await?;
        requests_ended(&ctx).await?;
        responses.send(response).await
    }
    .await;

    responses.finish(outcome).await;
}

/// Drives a bidirectional call.
///
/// The handler receives the request stream and returns its response stream;
/// typically it moves the requests into a task that feeds the responses. The
/// call completes once the response stream is exhausted and the request
/// stream has ended.
pub async fn streaming<Req, Resp, F, Fut>(call: ServerCall, handler: F)
where
    Req: prost::Message + Default,
    Resp: prost::Message,
    F: FnOnce(Request<Streaming<Req>>) -> Fut,
    Fut: Future<Output = Result<ResponseStream<Resp>, Status>>,
{
    let Some((ctx, requests, mut responses)) = call.accept(CallShape::BidiStream).await else {
        return;
    };

    let outcome = async {
        let stream = guard(&ctx, handler(Request::new(ctx.clone(), requests))).await?;
        pump(&ctx, stream, &mut responses).await?;
        requests_ended(&ctx).await
    }
    .await;

    responses.finish(outcome).await;
}

/// Runs `work` unless the call is aborted first. A panic inside `work` ends
/// the call with `INTERNAL`.
async fn guard<T>(
    ctx: &CallContext,
    work: impl Future<Output = Result<T, Status>>,
) -> Result<T, Status> {
    tokio::select! {
        biased;
        status = ctx.cancelled() => Err(status),
        result = AssertUnwindSafe(work).catch_unwind() => result.unwrap_or_else(|panic| {
            let context = panic_message(&*panic);
            #[cfg(feature = "tracing")]
            tracing::error!(call = %ctx.id(), method = ctx.method(), "{context}");
            Err(Error::Internal { context }.into())
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");
    format!("handler panicked: {detail}")
}

async fn single_request<Req>(requests: &mut Streaming<Req>) -> Result<Req, Status>
where
    Req: prost::Message + Default,
{
    let message = requests.message().await?.ok_or_else(|| {
        Status::from(Error::ProtocolViolation {
            context: "missing request message".to_string(),
        })
    })?;
    match requests.recv().await {
        Received::EndOfStream => Ok(message),
        Received::Message(_) => Err(Error::ProtocolViolation {
            context: "more than one request message".to_string(),
        }
        .into()),
        Received::Error(status) => Err(status),
    }
}

async fn pump<Resp: prost::Message>(
    ctx: &CallContext,
    mut stream: ResponseStream<Resp>,
    responses: &mut SendHalf<Resp>,
) -> Result<(), Status> {
    while let Some(item) = guard(ctx, async { Ok(stream.next().await) }).await? {
        responses.send(item?).await?;
    }
    Ok(())
}

/// Waits for the request direction to end. A handler that dropped its
/// request stream early has broken the call's contract.
async fn requests_ended(ctx: &CallContext) -> Result<(), Status> {
    let state = ctx.shared().remote_settled().await;
    if let Some(Err(status)) = state.outcome() {
        return Err(status.clone());
    }
    match state.remote() {
        HalfState::Closed => Ok(()),
        HalfState::Abandoned => Err(Error::ProtocolViolation {
            context: "handler returned before the request stream ended".to_string(),
        }
        .into()),
        HalfState::Open | HalfState::Aborted => Err(ctx.shared().abort_status()),
    }
}
