//! Exponential backoff and per-call timeouts.
//!
//! Nothing in the clients retries on its own. Callers opt in by wrapping an
//! idempotent call in [`retry_with_backoff`].

use std::{future::Future, time::Duration};

use thiserror::Error;
use tracing::warn;

/// Backoff schedule for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `step + 1`: `initial * 2^step`, capped at `max_delay`.
    pub fn backoff_delay(&self, step: u32) -> Duration {
        let factor = 2u32.saturating_pow(step);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Errors that may succeed when the same request is sent again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && err.is_retryable() => {
                let delay = config.backoff_delay(attempt);
                warn!(
                    stage = "store",
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying store call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Marker error produced by [`with_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {}ms", .0.as_millis())]
pub struct TimedOut(pub Duration);

/// Bounds a single call by `duration`.
pub async fn with_timeout<T, E, Fut>(duration: Duration, fut: Fut) -> Result<T, E>
where
    E: From<TimedOut>,
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(TimedOut(duration).into()),
    }
}
