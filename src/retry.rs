//! Retry with exponential backoff
//!
//! [`BackoffRetrier`] runs an async operation until it succeeds, fails with a
//! non-retryable error, or runs out of attempts. The wait before attempt `i`
//! (counting from 0) is `base_delay * 2^(i-1)`; the first attempt never waits.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, FetchError, Result};

/// Largest power of two applied to the base delay
const MAX_BACKOFF_EXPONENT: u32 = 31;

/// Retry policy for a fallible async operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRetrier {
    /// Total number of attempts, including the first one
    max_retries: u32,
    /// Wait before the first retry
    base_delay: Duration,
    /// Upper bound for a single attempt
    attempt_timeout: Option<Duration>,
}

impl Default for BackoffRetrier {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl BackoffRetrier {
    /// Creates a retrier making at most `max_retries` attempts in total
    ///
    /// A value of 0 still makes one attempt.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            attempt_timeout: None,
        }
    }

    /// Bounds every single attempt; an attempt that runs over fails with a
    /// retryable timeout
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay slept before attempt number `attempt`
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Runs `operation` until it succeeds or the policy gives up
    ///
    /// Cancelling `cancel` aborts both a pending backoff sleep and an attempt
    /// in flight, and yields [`Error::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            let backoff = self.delay_before(attempt);
            if !backoff.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.run_attempt(operation()) => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(attempt, error = %err, "not retrying permanent failure");
                return Err(Error::Fetch(err));
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            warn!(
                error = %err,
                retry = attempt,
                max_attempts,
                backoff_ms = self.delay_before(attempt).as_millis() as u64,
                "retrying operation"
            );
        }
    }

    async fn run_attempt<T, Fut>(&self, attempt: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err(FetchError::timeout(format!("attempt exceeded {limit:?}")))),
            None => attempt.await,
        }
    }
}
