//! Concurrent cache-first resolution of many keys
//!
//! Keys found fresh in the cache are answered directly. Every other key gets
//! its own tokio task that waits for a concurrency permit, runs the fetch
//! function under the retry policy and stores the result back into the cache.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::options::{FailurePolicy, FetchOptions};
use crate::cache::CacheStore;
use crate::error::{Error, FetchError, FetchErrorKind};
use crate::retry::BackoffRetrier;

/// Aggregate outcome of [`FetchOrchestrator::resolve_all`]
#[derive(Debug)]
pub struct Resolution<T> {
    /// Keys that resolved, from the cache or from a fetch
    pub values: HashMap<String, T>,
    /// Keys that could not be resolved, with their final error
    pub failures: HashMap<String, Error>,
}

impl<T> Default for Resolution<T> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            failures: HashMap::new(),
        }
    }
}

impl<T> Resolution<T> {
    /// Whether no failure was recorded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Progress of one key's fetch
#[derive(Debug)]
enum TaskOutcome<T> {
    Pending,
    Succeeded(T),
    Failed(Error),
}

/// State owned by the unit of work resolving a single key
#[derive(Debug)]
struct FetchTask<T> {
    key: String,
    /// Number of attempts made so far
    attempt: u32,
    outcome: TaskOutcome<T>,
}

impl<T> FetchTask<T> {
    fn new(key: String) -> Self {
        Self {
            key,
            attempt: 0,
            outcome: TaskOutcome::Pending,
        }
    }

    fn fail(mut self, err: Error) -> Self {
        self.outcome = TaskOutcome::Failed(err);
        self
    }
}

/// Everything a spawned unit needs, moved into its task
struct FetchUnit<T, F> {
    task: FetchTask<T>,
    fetch: Arc<F>,
    permits: Arc<Semaphore>,
    retrier: BackoffRetrier,
    cancel: CancellationToken,
    cache: Option<CacheStore>,
    ttl: Duration,
}

impl<T, F, Fut> FetchUnit<T, F>
where
    T: Serialize,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    async fn run(self) -> FetchTask<T> {
        let FetchUnit {
            mut task,
            fetch,
            permits,
            retrier,
            cancel,
            cache,
            ttl,
        } = self;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return task.fail(Error::Cancelled),
            permit = permits.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return task.fail(Error::Cancelled),
            },
        };

        let key = task.key.clone();
        let mut attempts = 0;
        let result = retrier
            .execute(
                || {
                    attempts += 1;
                    let fetch = Arc::clone(&fetch);
                    let key = key.clone();
                    let call = async move { (*fetch)(key).await };
                    AssertUnwindSafe(call).catch_unwind().map(|outcome| {
                        outcome.unwrap_or_else(|_| {
                            Err(FetchError::new(FetchErrorKind::Internal, "fetch function panicked"))
                        })
                    })
                },
                &cancel,
            )
            .await;
        task.attempt = attempts;

        task.outcome = match result {
            Ok(value) => {
                if let Some(cache) = &cache {
                    if let Err(err) = cache.set(&task.key, &value, ttl) {
                        warn!(key = %task.key, error = %err, "failed to cache fetched value");
                    }
                }
                TaskOutcome::Succeeded(value)
            }
            Err(err) => TaskOutcome::Failed(err),
        };
        task
    }
}

/// Result of looking a key up in the cache before dispatching
enum Lookup<T> {
    Fresh(T),
    Stale(T),
    Missing,
}

/// Resolves batches of keys through the cache, falling back to a fetch function
#[derive(Debug, Clone, Default)]
pub struct FetchOrchestrator {
    cache: Option<CacheStore>,
}

impl FetchOrchestrator {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache: Some(cache) }
    }

    /// An orchestrator that fetches every key and stores nothing
    pub fn without_cache() -> Self {
        Self { cache: None }
    }

    pub fn with_cache(cache: Option<CacheStore>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let Some(cache) = &self.cache else {
            return Lookup::Missing;
        };
        match cache.peek::<T>(key) {
            Some(entry) if !entry.is_expired => Lookup::Fresh(entry.value),
            Some(entry) => Lookup::Stale(entry.value),
            None => Lookup::Missing,
        }
    }

    /// Resolves every key, fetching the ones the cache cannot answer
    ///
    /// Duplicate keys are resolved once. A failing key never aborts the batch:
    /// it ends up in [`Resolution::failures`] (or nowhere, under
    /// [`FailurePolicy::DropSilently`]). Cancelling `cancel`, or running past
    /// [`FetchOptions::deadline`], stops the pending fetches and reports their
    /// keys as cancelled while keeping everything that already resolved.
    pub async fn resolve_all<K, T, F, Fut>(
        &self,
        keys: K,
        fetch: F,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Resolution<T>
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        let mut resolution = Resolution::default();
        let mut stale = HashMap::new();
        let mut misses = Vec::new();

        for key in keys {
            match self.lookup::<T>(&key) {
                Lookup::Fresh(value) => {
                    debug!(key = %key, "cache hit");
                    resolution.values.insert(key, value);
                }
                Lookup::Stale(value) => {
                    debug!(key = %key, "cache entry expired");
                    if options.stale_on_error {
                        stale.insert(key.clone(), value);
                    }
                    misses.push(key);
                }
                Lookup::Missing => {
                    debug!(key = %key, "cache miss");
                    misses.push(key);
                }
            }
        }

        let hits = resolution.values.len();
        if misses.is_empty() {
            debug!(hits, "all keys answered from cache");
            return resolution;
        }

        let token = cancel.child_token();
        let permits = Arc::new(Semaphore::new(options.concurrency_limit(misses.len())));
        let fetch = Arc::new(fetch);
        let retrier = options.retrier();
        let ttl = options
            .cache_ttl
            .or_else(|| self.cache.as_ref().map(CacheStore::default_ttl))
            .unwrap_or_default();

        let mut outstanding: HashSet<String> = misses.iter().cloned().collect();
        let mut units = JoinSet::new();
        for key in misses {
            let unit = FetchUnit {
                task: FetchTask::new(key),
                fetch: Arc::clone(&fetch),
                permits: Arc::clone(&permits),
                retrier,
                cancel: token.clone(),
                cache: self.cache.clone(),
                ttl,
            };
            units.spawn(unit.run());
        }

        // A deadline too far out to represent never fires.
        let deadline = options
            .deadline
            .and_then(|limit| Instant::now().checked_add(limit));
        let expiry = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);
        let mut deadline_passed = false;

        loop {
            tokio::select! {
                joined = units.join_next() => match joined {
                    Some(Ok(task)) => {
                        outstanding.remove(&task.key);
                        Self::record(&mut resolution, &mut stale, task, options, deadline_passed);
                    }
                    Some(Err(err)) => error!(error = %err, "fetch unit did not complete"),
                    None => break,
                },
                _ = &mut expiry, if !deadline_passed => {
                    warn!(
                        pending = outstanding.len(),
                        "batch deadline passed, cancelling pending fetches"
                    );
                    deadline_passed = true;
                    token.cancel();
                }
            }
        }

        for key in outstanding {
            let err = Error::Fetch(FetchError::new(FetchErrorKind::Internal, "fetch unit aborted"));
            let task = FetchTask::new(key).fail(err);
            Self::record(&mut resolution, &mut stale, task, options, deadline_passed);
        }

        info!(
            hits,
            fetched = resolution.values.len() - hits,
            failed = resolution.failures.len(),
            "resolved batch"
        );
        resolution
    }

    fn record<T>(
        resolution: &mut Resolution<T>,
        stale: &mut HashMap<String, T>,
        task: FetchTask<T>,
        options: &FetchOptions,
        deadline_passed: bool,
    ) {
        let FetchTask {
            key,
            attempt,
            outcome,
        } = task;

        let err = match outcome {
            TaskOutcome::Succeeded(value) => {
                debug!(key = %key, attempts = attempt, "fetched");
                resolution.values.insert(key, value);
                return;
            }
            TaskOutcome::Failed(Error::Cancelled) if deadline_passed => Error::DeadlineExceeded,
            TaskOutcome::Failed(err) => err,
            TaskOutcome::Pending => Error::Cancelled,
        };

        if !err.is_cancellation() {
            if let Some(value) = stale.remove(&key) {
                warn!(key = %key, error = %err, "fetch failed, serving expired cache entry");
                resolution.values.insert(key, value);
                return;
            }
        }

        match options.failure_policy {
            FailurePolicy::CollectErrors => {
                warn!(key = %key, attempts = attempt, error = %err, "failed to resolve key");
                resolution.failures.insert(key, err);
            }
            FailurePolicy::DropSilently => {
                debug!(key = %key, attempts = attempt, error = %err, "dropping failed key");
            }
        }
    }
}
