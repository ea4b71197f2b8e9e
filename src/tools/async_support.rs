// src/tools/async_support.rs
//! Timeout helpers for background work that must outlive its caller's patience.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(duration: Duration, operation_name: impl Into<String>) -> Self {
        Self { duration, operation_name: operation_name.into() }
    }

    pub fn from_millis(millis: u64, operation_name: impl Into<String>) -> Self {
        Self::new(Duration::from_millis(millis), operation_name)
    }
}

/// Result of racing a spawned task against a timeout.
#[derive(Debug)]
pub enum Raced<T> {
    /// The task finished first.
    Finished(T),
    /// The timeout fired; the task keeps running and its handle is returned.
    TimedOut(JoinHandle<T>),
    /// The task panicked or was aborted.
    Failed(String),
}

/// Spawns `future` and waits for it at most `config.duration`.
///
/// Unlike `tokio::time::timeout` on the future itself, a timeout does not drop
/// the work: it continues on the runtime and can still be awaited.
pub async fn spawn_with_deadline<F, T>(future: F, config: &TimeoutConfig) -> Raced<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(future);
    match timeout(config.duration, &mut handle).await {
        Ok(Ok(value)) => Raced::Finished(value),
        Ok(Err(e)) => Raced::Failed(format!("{} task failed: {}", config.operation_name, e)),
        Err(_) => {
            debug!(
                operation = %config.operation_name,
                "deadline of {:?} reached, continuing in background", config.duration
            );
            Raced::TimedOut(handle)
        }
    }
}
