//! `callflow-demo`: serves the calculator and greet services in-process and
//! drives the configured scenarios against them. Ctrl+C or SIGTERM stops the
//! scenarios and shuts the server down gracefully.

mod telemetry;

use callflow_services::{
    config::{CliArgs, DemoConfig},
    runtime::InProcess,
    scenarios::Demo,
};
use clap::Parser;
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DemoConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let server = InProcess::start(&config);
    let demo = Demo::new(&server, config);

    let outcome = tokio::select! {
        result = demo.run() => result,
        () = shutdown_signal() => {
            #[cfg(feature = "tracing")]
            tracing::info!("Scenarios interrupted, terminating gracefully...");
            Ok(())
        }
    };

    if let Err(_e) = &outcome {
        #[cfg(feature = "tracing")]
        tracing::error!("Scenario failed: {:?}", _e);
    }

    // 1. Drain in-flight calls
    server.shutdown().await;

    // 2. Flush telemetry
    providers.shutdown();

    #[cfg(feature = "tracing")]
    tracing::info!("Demo shut down successfully");
    outcome
}

fn log_startup_info(_config: &DemoConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting callflow demo with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting callflow demo, scenario {} with buffer size {}",
            _config.scenario,
            _config.buffer_size
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
