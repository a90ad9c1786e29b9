//! The greet service.
//!
//! | Method | Shape |
//! |---|---|
//! | `Greet` | unary |
//! | `GreetManyTimes` | server stream |
//! | `LongGreet` | client stream |
//! | `GreetEveryone` | bidirectional |
//! | `GreetWithDeadline` | unary, slow, honors deadlines and cancellation |

mod service;

pub use service::Greeter;

use crate::proto::greet::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetRequest, GreetResponse, GreetWithDeadlineRequest, GreetWithDeadlineResponse,
    LongGreetRequest, LongGreetResponse, SERVICE_NAME,
};
use callflow::{
    CallOptions, Client, ClientStreamingCall, Error, Request, ResponseStream, SendHalf,
    ServerCall, Service, Status, Streaming,
    channel::Transport,
    server::{client_streaming, reject, server_streaming, streaming, unary},
};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

const GREET: &str = "/greet.GreetService/Greet";
const GREET_MANY_TIMES: &str = "/greet.GreetService/GreetManyTimes";
const LONG_GREET: &str = "/greet.GreetService/LongGreet";
const GREET_EVERYONE: &str = "/greet.GreetService/GreetEveryone";
const GREET_WITH_DEADLINE: &str = "/greet.GreetService/GreetWithDeadline";

/// Handlers of `greet.GreetService`.
#[tonic::async_trait]
pub trait GreetService: Send + Sync + 'static {
    async fn greet(&self, request: Request<GreetRequest>) -> Result<GreetResponse, Status>;

    async fn greet_many_times(
        &self,
        request: Request<GreetManyTimesRequest>,
    ) -> Result<ResponseStream<GreetManyTimesResponse>, Status>;

    async fn long_greet(
        &self,
        request: Request<Streaming<LongGreetRequest>>,
    ) -> Result<LongGreetResponse, Status>;

    async fn greet_everyone(
        &self,
        request: Request<Streaming<GreetEveryoneRequest>>,
    ) -> Result<ResponseStream<GreetEveryoneResponse>, Status>;

    async fn greet_with_deadline(
        &self,
        request: Request<GreetWithDeadlineRequest>,
    ) -> Result<GreetWithDeadlineResponse, Status>;
}

/// Routes calls for `greet.GreetService` to a [`GreetService`].
#[derive(Debug)]
pub struct GreetServer<T> {
    inner: Arc<T>,
}

impl<T> GreetServer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<T: GreetService> Service for GreetServer<T> {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn call(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        match call.method_name() {
            "Greet" => unary(call, move |req| async move { inner.greet(req).await }).boxed(),
            "GreetManyTimes" => server_streaming(call, move |req| async move {
                inner.greet_many_times(req).await
            })
            .boxed(),
            "LongGreet" => {
                client_streaming(call, move |req| async move { inner.long_greet(req).await })
                    .boxed()
            }
            "GreetEveryone" => {
                streaming(call, move |req| async move { inner.greet_everyone(req).await }).boxed()
            }
            "GreetWithDeadline" => unary(call, move |req| async move {
                inner.greet_with_deadline(req).await
            })
            .boxed(),
            _ => {
                let method = call.header().method.clone();
                reject(call, Error::Unimplemented { method }.into()).boxed()
            }
        }
    }
}

/// Typed client for `greet.GreetService`.
#[derive(Clone, Debug)]
pub struct GreetClient<T> {
    inner: Client<T>,
}

impl<T: Transport> GreetClient<T> {
    pub const fn new(inner: Client<T>) -> Self {
        Self { inner }
    }

    /// # Errors
    ///
    /// `INVALID_ARGUMENT` if the request carries no greeting.
    pub async fn greet(
        &self,
        request: GreetRequest,
        options: CallOptions,
    ) -> Result<GreetResponse, Status> {
        self.inner.unary(GREET, request, options).await
    }

    /// # Errors
    ///
    /// `INVALID_ARGUMENT` if the request carries no greeting.
    pub async fn greet_many_times(
        &self,
        request: GreetManyTimesRequest,
        options: CallOptions,
    ) -> Result<Streaming<GreetManyTimesResponse>, Status> {
        self.inner
            .server_streaming(GREET_MANY_TIMES, request, options)
            .await
    }

    /// # Errors
    ///
    /// `UNAVAILABLE` if the call could not be opened.
    pub async fn long_greet(
        &self,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<LongGreetRequest, LongGreetResponse>, Status> {
        self.inner.client_streaming(LONG_GREET, options).await
    }

    /// # Errors
    ///
    /// `UNAVAILABLE` if the call could not be opened.
    pub async fn greet_everyone(
        &self,
        options: CallOptions,
    ) -> Result<(SendHalf<GreetEveryoneRequest>, Streaming<GreetEveryoneResponse>), Status> {
        self.inner.streaming(GREET_EVERYONE, options).await
    }

    /// # Errors
    ///
    /// `DEADLINE_EXCEEDED` if the options' timeout is shorter than the work,
    /// `CANCELLED` if the call is cancelled first.
    pub async fn greet_with_deadline(
        &self,
        request: GreetWithDeadlineRequest,
        options: CallOptions,
    ) -> Result<GreetWithDeadlineResponse, Status> {
        self.inner.unary(GREET_WITH_DEADLINE, request, options).await
    }
}
