//! Integration tests for cache-first concurrent resolution
//!
//! Fetch functions here are stubs that count calls, fail on demand or block
//! until released, so batching, retry and cancellation behavior can be checked
//! without a network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nsefetch::{
    CacheStore, Error, FailurePolicy, FetchError, FetchErrorKind, FetchOptions, FetchOrchestrator,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const HOUR: Duration = Duration::from_secs(60 * 60);

fn create_orchestrator() -> (FetchOrchestrator, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = CacheStore::with_dir(temp_dir.path(), HOUR);
    (FetchOrchestrator::new(store), temp_dir)
}

fn fast_options() -> FetchOptions {
    FetchOptions {
        base_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Fetch function returning `value-<key>` and counting its calls
fn counting_fetch(
    calls: Arc<AtomicUsize>,
) -> impl Fn(String) -> futures::future::Ready<Result<String, FetchError>> + Send + Sync + 'static {
    move |key: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(format!("value-{key}")))
    }
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_is_aggregated_per_key() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let b_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&b_calls);

    let fetch = move |key: String| {
        let counter = Arc::clone(&counter);
        async move {
            if key == "B" {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::other("upstream unavailable"))
            } else {
                Ok(format!("v{key}"))
            }
        }
    };

    let resolution = orchestrator
        .resolve_all(["A", "B", "C"], fetch, &fast_options(), &CancellationToken::new())
        .await;

    assert_eq!(resolution.values.len(), 2);
    assert_eq!(resolution.values["A"], "vA");
    assert_eq!(resolution.values["C"], "vC");
    assert_eq!(resolution.failures.len(), 1);
    match &resolution.failures["B"] {
        Error::RetryExhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert_eq!(last.message(), "upstream unavailable");
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(b_calls.load(Ordering::SeqCst), 3);
    assert!(!resolution.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_drop_silently_excludes_failed_keys() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        failure_policy: FailurePolicy::DropSilently,
        ..fast_options()
    };

    let fetch = |key: String| async move {
        if key == "B" {
            Err(FetchError::other("boom"))
        } else {
            Ok(key.to_lowercase())
        }
    };

    let resolution = orchestrator
        .resolve_all(["A", "B", "C"], fetch, &options, &CancellationToken::new())
        .await;

    let keys: HashSet<_> = resolution.values.keys().cloned().collect();
    assert_eq!(keys, HashSet::from(["A".to_string(), "C".to_string()]));
    assert!(resolution.failures.is_empty());
}

#[tokio::test]
async fn test_cached_key_is_not_fetched() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let cache = orchestrator.cache().expect("Should have cache");
    cache.set("A", &"cached".to_string(), HOUR).expect("Set should succeed");
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(
            ["A"],
            counting_fetch(Arc::clone(&calls)),
            &fast_options(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0, "fetch must not run for a valid hit");
    assert_eq!(resolution.values["A"], "cached");
}

#[tokio::test]
async fn test_fetched_values_are_written_back_to_cache() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = fast_options();

    let first = orchestrator
        .resolve_all(
            ["X", "Y"],
            counting_fetch(Arc::clone(&calls)),
            &options,
            &CancellationToken::new(),
        )
        .await;
    let second = orchestrator
        .resolve_all(
            ["X", "Y"],
            counting_fetch(Arc::clone(&calls)),
            &options,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2, "second batch is served from cache");
    assert_eq!(first.values, second.values);
    let cache = orchestrator.cache().expect("Should have cache");
    assert_eq!(cache.get::<String>("X").as_deref(), Some("value-X"));
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let cache = orchestrator.cache().expect("Should have cache");
    cache.set("A", &"old".to_string(), Duration::ZERO).expect("Set should succeed");
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(
            ["A"],
            counting_fetch(Arc::clone(&calls)),
            &fast_options(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(resolution.values["A"], "value-A");
}

#[tokio::test]
async fn test_cache_ttl_option_applies_to_new_entries() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        cache_ttl: Some(Duration::ZERO),
        ..fast_options()
    };
    let calls = Arc::new(AtomicUsize::new(0));

    orchestrator
        .resolve_all(
            ["A"],
            counting_fetch(Arc::clone(&calls)),
            &options,
            &CancellationToken::new(),
        )
        .await;

    let cache = orchestrator.cache().expect("Should have cache");
    assert!(cache.get::<String>("A").is_none(), "zero TTL entries are never fresh");
    assert!(cache.peek::<String>("A").is_some(), "but the entry was written");
}

#[tokio::test]
async fn test_duplicate_keys_are_fetched_once() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(
            vec!["A".to_string(), "A".to_string(), "B".to_string()],
            counting_fetch(Arc::clone(&calls)),
            &fast_options(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(resolution.values.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        max_concurrency: Some(2),
        ..fast_options()
    };
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let fetch = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        let gate = Arc::clone(&gate);
        move |key: String| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let gate = Arc::clone(&gate);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                gate.acquire().await.expect("gate closed").forget();
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, FetchError>(key)
            }
        }
    };

    let releaser = {
        let in_flight = Arc::clone(&in_flight);
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert!(in_flight.load(Ordering::SeqCst) <= 2);
                gate.add_permits(1);
            }
        })
    };

    let keys: Vec<String> = (0..10).map(|i| format!("K{i}")).collect();
    let resolution = orchestrator
        .resolve_all(keys, fetch, &options, &CancellationToken::new())
        .await;
    releaser.await.expect("releaser panicked");

    assert_eq!(resolution.values.len(), 10);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_resolved_keys() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        max_concurrency: None,
        ..fast_options()
    };
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let fetch = |key: String| async move {
        if key != "A" {
            std::future::pending::<()>().await;
        }
        Ok::<_, FetchError>(key)
    };

    let resolution = orchestrator
        .resolve_all(["A", "B", "C"], fetch, &options, &token)
        .await;

    assert_eq!(resolution.values.len(), 1);
    assert_eq!(resolution.values["A"], "A");
    assert_eq!(resolution.failures.len(), 2);
    assert!(matches!(resolution.failures["B"], Error::Cancelled));
    assert!(matches!(resolution.failures["C"], Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reaches_keys_waiting_for_a_permit() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        max_concurrency: Some(1),
        ..fast_options()
    };
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let fetch = |_key: String| async move {
        std::future::pending::<()>().await;
        Ok::<String, FetchError>(String::new())
    };

    let resolution = orchestrator
        .resolve_all(["A", "B", "C", "D"], fetch, &options, &token)
        .await;

    assert!(resolution.values.is_empty());
    assert_eq!(resolution.failures.len(), 4);
    assert!(resolution.failures.values().all(Error::is_cancellation));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_pending_keys() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        deadline: Some(Duration::from_secs(5)),
        ..fast_options()
    };

    let fetch = |key: String| async move {
        if key == "SLOW" {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok::<_, FetchError>(key)
    };

    let resolution = orchestrator
        .resolve_all(["FAST", "SLOW"], fetch, &options, &CancellationToken::new())
        .await;

    assert_eq!(resolution.values["FAST"], "FAST");
    assert!(matches!(resolution.failures["SLOW"], Error::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let fetch = move |_key: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<String, _>(FetchError::new(FetchErrorKind::NotFound, "unknown symbol")) }
    };

    let resolution = orchestrator
        .resolve_all(["NOPE"], fetch, &fast_options(), &CancellationToken::new())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        resolution.failures["NOPE"],
        Error::Fetch(ref e) if e.kind() == FetchErrorKind::NotFound
    ));
}

#[tokio::test]
async fn test_unrepresentable_deadline_never_fires() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        deadline: Some(Duration::MAX),
        ..fast_options()
    };
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(
            ["A"],
            counting_fetch(Arc::clone(&calls)),
            &options,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(resolution.values["A"], "value-A");
    assert!(resolution.is_complete());
}

#[tokio::test]
async fn test_huge_concurrency_limit_is_clamped() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let options = FetchOptions {
        max_concurrency: Some(usize::MAX),
        ..fast_options()
    };
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(
            ["A", "B"],
            counting_fetch(Arc::clone(&calls)),
            &options,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(resolution.values.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_write_failure_still_returns_value() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let blocker = temp_dir.path().join("not_a_dir");
    std::fs::write(&blocker, "file").expect("Should write");
    let orchestrator = FetchOrchestrator::new(CacheStore::with_dir(&blocker, HOUR));
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(["A"], counting_fetch(calls), &fast_options(), &CancellationToken::new())
        .await;

    assert_eq!(resolution.values["A"], "value-A");
    assert!(resolution.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_is_served_when_fetch_fails() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let cache = orchestrator.cache().expect("Should have cache");
    cache.set("A", &"stale".to_string(), Duration::ZERO).expect("Set should succeed");
    let options = FetchOptions {
        stale_on_error: true,
        ..fast_options()
    };

    let fetch = |_key: String| async { Err::<String, _>(FetchError::other("down")) };

    let resolution = orchestrator
        .resolve_all(["A", "B"], fetch, &options, &CancellationToken::new())
        .await;

    assert_eq!(resolution.values["A"], "stale");
    assert!(resolution.failures.contains_key("B"), "no stale entry to fall back to");
}

#[tokio::test]
async fn test_panicking_fetch_fails_only_its_key() {
    let (orchestrator, _temp_dir) = create_orchestrator();

    let fetch = |key: String| async move {
        if key == "BAD" {
            panic!("fetch function bug");
        }
        Ok::<_, FetchError>(key)
    };

    let resolution = orchestrator
        .resolve_all(["GOOD", "BAD"], fetch, &fast_options(), &CancellationToken::new())
        .await;

    assert_eq!(resolution.values["GOOD"], "GOOD");
    assert!(matches!(
        resolution.failures["BAD"],
        Error::Fetch(ref e) if e.kind() == FetchErrorKind::Internal
    ));
}

#[tokio::test]
async fn test_without_cache_always_fetches() {
    let orchestrator = FetchOrchestrator::without_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = fast_options();

    for _ in 0..2 {
        let resolution = orchestrator
            .resolve_all(
                ["A"],
                counting_fetch(Arc::clone(&calls)),
                &options,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(resolution.values["A"], "value-A");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_key_set_resolves_to_nothing() {
    let (orchestrator, _temp_dir) = create_orchestrator();
    let calls = Arc::new(AtomicUsize::new(0));

    let resolution = orchestrator
        .resolve_all(
            Vec::<String>::new(),
            counting_fetch(Arc::clone(&calls)),
            &fast_options(),
            &CancellationToken::new(),
        )
        .await;

    assert!(resolution.values.is_empty());
    assert!(resolution.is_complete());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
