//! The calculator service: one method per call shape, plus a unary method
//! that reports invalid input through its status.
//!
//! | Method | Shape |
//! |---|---|
//! | `Sum` | unary |
//! | `PrimeNumberDecomposition` | server stream |
//! | `ComputeAverage` | client stream |
//! | `FindMaximum` | bidirectional |
//! | `SquareRoot` | unary |

mod service;
#[cfg(test)]
mod tests;

pub use service::{Calculator, PrimeFactors, RunningAverage};

use crate::proto::calculator::{
    ComputeAverageRequest, ComputeAverageResponse, FindMaximumRequest, FindMaximumResponse,
    PrimeNumberDecompositionRequest, PrimeNumberDecompositionResponse, SERVICE_NAME,
    SquareRootRequest, SquareRootResponse, SumRequest, SumResponse,
};
use callflow::{
    CallOptions, Client, ClientStreamingCall, Error, Request, ResponseStream, SendHalf,
    ServerCall, Service, Status, Streaming,
    channel::Transport,
    server::{client_streaming, reject, server_streaming, streaming, unary},
};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

const SUM: &str = "/calculator.CalculatorService/Sum";
const PRIME_NUMBER_DECOMPOSITION: &str = "/calculator.CalculatorService/PrimeNumberDecomposition";
const COMPUTE_AVERAGE: &str = "/calculator.CalculatorService/ComputeAverage";
const FIND_MAXIMUM: &str = "/calculator.CalculatorService/FindMaximum";
const SQUARE_ROOT: &str = "/calculator.CalculatorService/SquareRoot";

/// Handlers of `calculator.CalculatorService`.
#[tonic::async_trait]
pub trait CalculatorService: Send + Sync + 'static {
    async fn sum(&self, request: Request<SumRequest>) -> Result<SumResponse, Status>;

    async fn prime_number_decomposition(
        &self,
        request: Request<PrimeNumberDecompositionRequest>,
    ) -> Result<ResponseStream<PrimeNumberDecompositionResponse>, Status>;

    async fn compute_average(
        &self,
        request: Request<Streaming<ComputeAverageRequest>>,
    ) -> Result<ComputeAverageResponse, Status>;

    async fn find_maximum(
        &self,
        request: Request<Streaming<FindMaximumRequest>>,
    ) -> Result<ResponseStream<FindMaximumResponse>, Status>;

    async fn square_root(
        &self,
        request: Request<SquareRootRequest>,
    ) -> Result<SquareRootResponse, Status>;
}

/// Routes calls for `calculator.CalculatorService` to a [`CalculatorService`].
#[derive(Debug)]
pub struct CalculatorServer<T> {
    inner: Arc<T>,
}

impl<T> CalculatorServer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<T: CalculatorService> Service for CalculatorServer<T> {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn call(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        match call.method_name() {
            "Sum" => unary(call, move |req| async move { inner.sum(req).await }).boxed(),
            "PrimeNumberDecomposition" => server_streaming(call, move |req| async move {
                inner.prime_number_decomposition(req).await
            })
            .boxed(),
            "ComputeAverage" => client_streaming(call, move |req| async move {
                inner.compute_average(req).await
            })
            .boxed(),
            "FindMaximum" => {
                streaming(call, move |req| async move { inner.find_maximum(req).await }).boxed()
            }
            "SquareRoot" => {
                unary(call, move |req| async move { inner.square_root(req).await }).boxed()
            }
            _ => {
                let method = call.header().method.clone();
                reject(call, Error::Unimplemented { method }.into()).boxed()
            }
        }
    }
}

/// Typed client for `calculator.CalculatorService`.
#[derive(Clone, Debug)]
pub struct CalculatorClient<T> {
    inner: Client<T>,
}

impl<T: Transport> CalculatorClient<T> {
    pub const fn new(inner: Client<T>) -> Self {
        Self { inner }
    }

    /// # Errors
    ///
    /// `INVALID_ARGUMENT` if the sum overflows.
    pub async fn sum(&self, request: SumRequest, options: CallOptions) -> Result<SumResponse, Status> {
        self.inner.unary(SUM, request, options).await
    }

    /// # Errors
    ///
    /// `INVALID_ARGUMENT` for a negative number.
    pub async fn prime_number_decomposition(
        &self,
        request: PrimeNumberDecompositionRequest,
        options: CallOptions,
    ) -> Result<Streaming<PrimeNumberDecompositionResponse>, Status> {
        self.inner
            .server_streaming(PRIME_NUMBER_DECOMPOSITION, request, options)
            .await
    }

    /// # Errors
    ///
    /// `UNAVAILABLE` if the call could not be opened.
    pub async fn compute_average(
        &self,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<ComputeAverageRequest, ComputeAverageResponse>, Status> {
        self.inner.client_streaming(COMPUTE_AVERAGE, options).await
    }

    /// # Errors
    ///
    /// `UNAVAILABLE` if the call could not be opened.
    pub async fn find_maximum(
        &self,
        options: CallOptions,
    ) -> Result<(SendHalf<FindMaximumRequest>, Streaming<FindMaximumResponse>), Status> {
        self.inner.streaming(FIND_MAXIMUM, options).await
    }

    /// # Errors
    ///
    /// `INVALID_ARGUMENT` for a negative number.
    pub async fn square_root(
        &self,
        request: SquareRootRequest,
        options: CallOptions,
    ) -> Result<SquareRootResponse, Status> {
        self.inner.unary(SQUARE_ROOT, request, options).await
    }
}
