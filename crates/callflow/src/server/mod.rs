//! Server runtime.
//!
//! This module routes accepted calls to services and runs them until
//! shutdown.
//!
//! ## Structure
//!
//! - [`dispatch`] - per-shape drivers ([`unary`], [`server_streaming`],
//!   [`client_streaming`], [`streaming`]) that services use to run handlers.
//! - [`request`] - the [`Request`] handed to handlers.
//!
//! ## Shutdown
//!
//! [`Server::serve_with_shutdown`] shuts down in phases once its signal
//! fires:
//!
//! 1. Stop accepting. Calls still queued on the transport are dropped and
//!    their clients see `UNAVAILABLE`.
//! 2. Drain in-flight calls for up to the configured shutdown timeout.
//! 3. Cancel the calls still running. Each ends with `UNAVAILABLE`.
//! 4. Wait up to three seconds for the cancelled calls to finish.

pub mod dispatch;
pub mod request;

pub use dispatch::{
    ResponseStream, ServerCall, client_streaming, reject, server_streaming, streaming, unary,
};
pub use request::Request;

use crate::{Error, channel::IncomingCall};
use core::{future::Future, time::Duration};
use futures::{Stream, StreamExt, future::BoxFuture};
use std::{collections::HashMap, sync::Arc};
use tokio::time::timeout;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// A named group of methods served together.
///
/// Implementations match on [`ServerCall::method_name`] and hand the call to
/// the driver for that method's shape, or [`reject`] it.
pub trait Service: Send + Sync + 'static {
    /// Fully-qualified service name, e.g. `calculator.CalculatorService`.
    fn name(&self) -> &'static str;

    fn call(&self, call: ServerCall) -> BoxFuture<'static, ()>;
}

/// Routes incoming calls to registered services.
pub struct Server {
    services: HashMap<&'static str, Arc<dyn Service>>,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            services: HashMap::new(),
            shutdown_timeout,
        }
    }

    /// Registers `service` under its name, replacing any service registered
    /// under the same name.
    #[must_use]
    pub fn add_service<S: Service>(mut self, service: S) -> Self {
        self.services.insert(service.name(), Arc::new(service));
        self
    }

    /// Serves calls from `incoming` until it ends or `signal` resolves, then
    /// shuts down gracefully.
    pub async fn serve_with_shutdown<I, F>(self, incoming: I, signal: F)
    where
        I: Stream<Item = IncomingCall> + Send,
        F: Future<Output = ()> + Send,
    {
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let mut incoming = Box::pin(incoming);
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;
                () = &mut signal => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Shutdown signal received, refusing new calls");
                    break;
                }
                next = incoming.next() => match next {
                    Some(call) => self.dispatch(call, &tracker, &shutdown),
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::info!("Incoming call stream ended");
                        break;
                    }
                },
            }
        }

        // === Phase 0: Stop accepting new calls ===
        drop(incoming);
        tracker.close();

        // === Phase 1: Wait for in-flight calls to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight calls ({} active)", tracker.len());
        match timeout(self.shutdown_timeout, tracker.wait()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight calls drained");
                return;
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} calls still active)",
                    tracker.len()
                );
            }
        }

        // === Phase 2: Cancel remaining calls ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining calls via shutdown token");
        shutdown.cancel();

        // === Phase 3: Wait for cancelled calls to finish ===
        if timeout(Duration::from_secs(3), tracker.wait()).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("{} calls did not finish after cancellation", tracker.len());
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Server shutdown complete");
    }

    fn dispatch(&self, incoming: IncomingCall, tracker: &TaskTracker, shutdown: &CancellationToken) {
        let service = self.services.get(incoming.header.service()).cloned();

        #[cfg(feature = "tracing")]
        let span = tracing::info_span!(
            "call",
            id = %incoming.header.id,
            method = %incoming.header.method,
            shape = %incoming.header.shape,
        );

        let call = ServerCall::new(incoming, shutdown.clone());
        let fut = async move {
            match service {
                Some(service) => service.call(call).await,
                None => {
                    let method = call.header().method.clone();
                    reject(call, Error::Unimplemented { method }.into()).await;
                }
            }
        };

        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            fut.instrument(span)
        };

        tracker.spawn(fut);
    }
}
