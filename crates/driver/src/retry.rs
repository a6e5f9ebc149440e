//! The `retry` module contains the [RetryStrategy] injected into every component that talks to
//! the chain. Operations the protocol needs to eventually succeed, such as log scans and edge
//! reads, are retried until they succeed or the agent is cancelled.

use anyhow::Result;
use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Decides whether an error is worth another attempt.
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Failures of the retry loop itself.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("cancelled while retrying {0}")]
    Cancelled(String),
}

/// The delays between attempts.
#[derive(Debug, Clone, Copy)]
enum Backoff {
    Exponential(ExponentialBuilder),
    Constant(ConstantBuilder),
}

/// The [RetryStrategy] struct pairs a backoff with an optional [ErrorHandler].
#[derive(Clone)]
pub struct RetryStrategy {
    backoff: Backoff,
    error_handler: Option<ErrorHandler>,
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("backoff", &self.backoff)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_factor(2.0)
            .with_jitter()
            .without_max_times();
        Self { backoff: Backoff::Exponential(backoff), error_handler: None }
    }
}

impl RetryStrategy {
    /// Retries with a delay that grows by `factor` every attempt, capped at `max_delay`.
    pub fn exponential_backoff(initial_delay: Duration, max_delay: Duration, factor: f32) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(initial_delay)
            .with_max_delay(max_delay)
            .with_factor(factor)
            .without_max_times();
        Self { backoff: Backoff::Exponential(backoff), error_handler: None }
    }

    /// Retries with a fixed delay.
    pub fn fixed_delay(delay: Duration) -> Self {
        let backoff = ConstantBuilder::default().with_delay(delay).without_max_times();
        Self { backoff: Backoff::Constant(backoff), error_handler: None }
    }

    /// Never retries.
    pub fn no_retry() -> Self {
        Self::fixed_delay(Duration::ZERO).with_max_retries(0)
    }

    /// Bounds the number of retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.backoff = match self.backoff {
            Backoff::Exponential(b) => Backoff::Exponential(b.with_max_times(max_retries)),
            Backoff::Constant(b) => Backoff::Constant(b.with_max_times(max_retries)),
        };
        self
    }

    /// Only retries errors `handler` accepts. Every other error is returned immediately.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    fn is_retryable(&self, error: &anyhow::Error) -> bool {
        self.error_handler.as_ref().map_or(true, |handler| handler(error))
    }
}

/// Runs `op` until it succeeds, the strategy stops, or `cancel` fires.
///
/// # Arguments
/// * `strategy` - The backoff and error classification.
/// * `cancel` - Aborts the loop, including any pending delay.
/// * `what` - Describes the operation in logs.
/// * `op` - Produces a fresh attempt each call.
///
/// # Returns
/// * The first successful result, the last error once the strategy stops, or
///   [RetryError::Cancelled].
pub async fn retry_until_succeeds<T, F, Fut>(
    strategy: &RetryStrategy,
    cancel: &CancellationToken,
    what: &str,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let when = |e: &anyhow::Error| strategy.is_retryable(e);
    let notify = |err: &anyhow::Error, delay: Duration| {
        tracing::warn!(target: "retry", error = %format!("{:#}", err), delay = ?delay, "Could not {}, retrying", what);
    };
    let attempts = async {
        match strategy.backoff {
            Backoff::Exponential(b) => op.retry(b).when(when).notify(notify).await,
            Backoff::Constant(b) => op.retry(b).when(when).notify(notify).await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetryError::Cancelled(what.to_string()).into()),
        result = attempts => result,
    }
}
