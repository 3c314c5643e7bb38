//! Run-on-worker boundary for blocking stages
//!
//! Watch and log stages run on their own task while the caller awaits the
//! handle. The handle is wrapped in an abort guard, so when the caller is
//! cancelled the worker is aborted and whatever connection it owned is
//! dropped with it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};

use crate::error::LifecycleError;

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Spawn `stage` on a worker and wait for it.
///
/// A worker that panics or is cancelled surfaces as `LifecycleError::Worker`.
pub async fn run_stage<T, F>(stage: &'static str, fut: F) -> Result<T, LifecycleError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
{
    match AbortOnDrop(tokio::spawn(fut)).await {
        Ok(result) => result,
        Err(e) => Err(LifecycleError::Worker {
            stage,
            message: e.to_string(),
        }),
    }
}

/// Spawn an infallible stage on a worker and wait for it
pub async fn run_detached<F>(stage: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = AbortOnDrop(tokio::spawn(fut)).await {
        tracing::warn!(stage, error = %e, "worker ended abnormally");
    }
}
