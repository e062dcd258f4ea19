//! Bounded retry with exponential backoff for transient store failures.
//!
//! Only reads are retried. Mutations are never re-issued automatically;
//! their callers roll back optimistic state and surface the error instead.

use std::future::Future;
use std::time::Duration;

use brewlog_common::{RetryConfig, SyncResult};

/// Backoff policy applied to re-fetches and initial loads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from the retry section of the configuration.
    #[must_use]
    pub const fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powf(f64::from(attempt));
        let delay = Duration::from_secs_f64(delay_secs);
        if delay > self.max_delay { self.max_delay } else { delay }
    }

    /// Whether another attempt may start after `attempts` completed attempts.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Run `attempt_fn` until it succeeds, fails permanently, or the attempt
    /// budget runs out.
    ///
    /// Retries only errors that are transient according to
    /// [`SyncError::is_transient`](brewlog_common::SyncError::is_transient);
    /// everything else propagates on the first occurrence. At least one
    /// attempt is always made, even with a zero budget.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.should_retry(attempts) => {
                    let delay = self.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        error = %err,
                        operation,
                        attempt = attempts,
                        delay = ?delay,
                        "Transient failure, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
