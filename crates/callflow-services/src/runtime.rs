//! In-process deployment of both services.
//!
//! [`InProcess::start`] serves the calculator and greet services over a
//! [`MemoryTransport`] on the current runtime and hands out clients bound to
//! it. The demo binary, the benchmarks and the tests all run against it.

use crate::{
    calculator::{Calculator, CalculatorClient, CalculatorServer},
    config::DemoConfig,
    greet::{GreetClient, GreetServer, Greeter},
};
use callflow::{Client, Server, channel::memory::MemoryTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Registers both services with the configured shutdown timeout.
pub fn server(config: &DemoConfig) -> Server {
    Server::new(config.shutdown_timeout)
        .add_service(CalculatorServer::new(Calculator))
        .add_service(GreetServer::new(Greeter::new(
            config.greet_interval,
            config.deadline_step,
        )))
}

/// A running server and the transport its clients use.
#[derive(Debug)]
pub struct InProcess {
    transport: MemoryTransport,
    shutdown: CancellationToken,
    serving: JoinHandle<()>,
}

impl InProcess {
    /// Spawns the server on the current runtime.
    pub fn start(config: &DemoConfig) -> Self {
        let (transport, incoming) = MemoryTransport::new(config.buffer_size, config.backlog);
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let serving = tokio::spawn(
            server(config).serve_with_shutdown(incoming, async move { signal.cancelled().await }),
        );

        #[cfg(feature = "tracing")]
        tracing::info!(
            buffer_size = config.buffer_size,
            backlog = config.backlog,
            "Serving calculator and greet in-process"
        );

        Self {
            transport,
            shutdown,
            serving,
        }
    }

    pub fn client(&self) -> Client<MemoryTransport> {
        Client::new(self.transport.clone())
    }

    pub fn calculator(&self) -> CalculatorClient<MemoryTransport> {
        CalculatorClient::new(self.client())
    }

    pub fn greet(&self) -> GreetClient<MemoryTransport> {
        GreetClient::new(self.client())
    }

    /// Fires the server's shutdown signal and waits for it to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(_e) = self.serving.await {
            #[cfg(feature = "tracing")]
            tracing::error!("Server task failed: {:?}", _e);
        }
    }
}
