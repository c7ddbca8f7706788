//! Knobs for a single `resolve_all` call

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::retry::BackoffRetrier;

/// What to do with keys whose fetch failed for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report every failed key with its final error
    #[default]
    CollectErrors,
    /// Leave failed keys out of the result entirely
    DropSilently,
}

/// Configuration for [`FetchOrchestrator::resolve_all`](super::FetchOrchestrator::resolve_all)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// TTL for newly stored entries; `None` uses the cache's default
    pub cache_ttl: Option<Duration>,
    /// Upper bound on fetches in flight at once; `None` means unbounded
    pub max_concurrency: Option<usize>,
    /// Total attempts per key, including the first
    pub max_retries: u32,
    /// Wait before the first retry; doubled for every further retry
    pub base_delay: Duration,
    pub failure_policy: FailurePolicy,
    /// Upper bound for a single fetch attempt
    pub attempt_timeout: Option<Duration>,
    /// Upper bound for the whole batch; keys still pending afterwards fail
    /// with [`Error::DeadlineExceeded`](crate::Error::DeadlineExceeded)
    pub deadline: Option<Duration>,
    /// Serve an expired cache entry when the fetch for its key fails
    pub stale_on_error: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_ttl: None,
            max_concurrency: Some(8),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            failure_policy: FailurePolicy::CollectErrors,
            attempt_timeout: None,
            deadline: None,
            stale_on_error: false,
        }
    }
}

impl FetchOptions {
    /// The retry policy every fetch unit runs under
    pub fn retrier(&self) -> BackoffRetrier {
        BackoffRetrier::new(self.max_retries, self.base_delay)
            .with_attempt_timeout(self.attempt_timeout)
    }

    /// Number of fetch units allowed to run at once for a batch of `misses` keys
    ///
    /// Never more than one permit per miss, and never zero.
    pub(crate) fn concurrency_limit(&self, misses: usize) -> usize {
        self.max_concurrency
            .unwrap_or(misses)
            .min(misses)
            .min(Semaphore::MAX_PERMITS)
            .max(1)
    }
}
