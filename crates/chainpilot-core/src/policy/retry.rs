//! Bounded retry policy with optional exponential growth.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one. Always at least one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry. `1.0` gives a fixed interval.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// `attempts` tries spaced `interval` apart.
    pub fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_backoff: interval,
            max_backoff: interval,
            multiplier: 1.0,
        }
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn total_delay(&self) -> Duration {
        let policy = RetryPolicy::new(self.clone());
        (1..self.max_attempts.max(1)).map(|n| policy.delay_for(n)).sum()
    }
}

/// Why [`RetryPolicy::poll_until`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt ran without producing a value.
    Exhausted { attempts: u32 },
    /// The cancellation token fired.
    Cancelled,
    /// The operation returned a non-retryable error.
    Aborted(E),
}

/// Stateless retry policy: computes delays and drives bounded polling loops.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay after the `attempt`-th failure (1-based), capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exp);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }

    /// Delay before the attempt following `attempt`, or `None` once the
    /// budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.config.max_attempts.max(1) {
            return None;
        }
        Some(self.delay_for(attempt))
    }

    /// Run `op` until it yields `Ok(Some(_))`, returns an error, or the
    /// attempt budget runs out.
    ///
    /// `op` receives the 1-based attempt number. The policy sleeps between
    /// attempts but not after the last one, so an exhausted budget returns
    /// as soon as the final attempt completes.
    pub async fn poll_until<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = op(attempt) => outcome,
            };
            match outcome {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => return Err(RetryError::Aborted(e)),
            }

            let Some(delay) = self.next_delay(attempt) else {
                return Err(RetryError::Exhausted { attempts: attempt });
            };
            tracing::trace!(attempt, delay_ms = delay.as_millis() as u64, "condition not met, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
