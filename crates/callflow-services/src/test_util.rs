use crate::config::DemoConfig;
use callflow::{Status, Streaming};
use core::time::Duration;
use futures::TryStreamExt;
use tokio::time::timeout;

/// Fast pacing so scenario tests finish quickly.
pub fn config() -> DemoConfig {
    DemoConfig {
        greet_interval: Duration::from_millis(10),
        deadline_step: Duration::from_millis(50),
        send_interval: Duration::from_millis(1),
        shutdown_timeout: Duration::from_secs(1),
        ..DemoConfig::default()
    }
}

/// Reads a response stream to its end, or to the call's failure.
pub async fn collect<T>(responses: Result<Streaming<T>, Status>) -> Result<Vec<T>, Status>
where
    T: prost::Message + Default + Send + 'static,
{
    timeout(Duration::from_secs(5), responses?.into_stream().try_collect())
        .await
        .expect("response stream did not end")
}
