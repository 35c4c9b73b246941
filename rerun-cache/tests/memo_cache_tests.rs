//! Integration tests for the memo cache
//!
//! These tests exercise the public surface end to end:
//! - Content-addressed hits across distinct argument instances
//! - Single-flight under concurrent callers
//! - Copy isolation for values, shared identity for resources
//! - Failures, timeouts and reentrancy
//! - Clearing, code fingerprints, TTL and LRU bounds

use futures::future::join_all;
use rerun_cache::{
    CacheConfig, CacheError, ClearTarget, Content, FunctionSpec, InvalidationReason, MemoCache,
    Origin,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn cache() -> MemoCache {
    MemoCache::new(CacheConfig::default()).unwrap()
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Row {
    region: String,
    amount: f64,
}

fn rows() -> Vec<Row> {
    vec![
        Row {
            region: "west".to_string(),
            amount: 10.0,
        },
        Row {
            region: "east".to_string(),
            amount: 5.5,
        },
    ]
}

#[tokio::test]
async fn test_equal_content_arguments_hit() {
    let cache = cache();
    let calls = counter();

    let total = {
        let calls = calls.clone();
        cache
            .register_value(
                FunctionSpec::new("total"),
                move |(table, region): (Content<Vec<Row>>, String)| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(table
                            .iter()
                            .filter(|row| row.region == region)
                            .map(|row| row.amount)
                            .sum::<f64>())
                    }
                },
            )
            .unwrap()
    };

    // Two distinct but equal-content instances
    let first = total.call((Content(rows()), "west".to_string())).await.unwrap();
    let second = total.call((Content(rows()), "west".to_string())).await.unwrap();

    assert_eq!(first, 10.0);
    assert_eq!(second, 10.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    total.call((Content(rows()), "east".to_string())).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.computations, 2);
}

#[tokio::test]
async fn test_concurrent_double_runs_once() {
    let cache = cache();
    let calls = counter();

    let double = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("double"), move |n: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(n * 2)
                }
            })
            .unwrap()
    };

    let started = Instant::now();
    let (a, b) = tokio::join!(double.call(4), double.call(4));
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap(), 8);
    assert_eq!(b.unwrap(), 8);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // One delay, not two
    assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
    assert_eq!(cache.stats().coalesced, 1);
}

#[tokio::test]
async fn test_many_sessions_share_one_computation() {
    let cache = cache();
    let calls = counter();

    let slow = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("slow"), move |n: u32| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(vec![n; 3])
                }
            })
            .unwrap()
    };

    let results = join_all((0..16).map(|_| {
        let slow = slow.clone();
        tokio::spawn(async move { slow.call(7).await })
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap().unwrap(), vec![7, 7, 7]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_value_copy_isolation() {
    let cache = cache();

    let table = cache
        .register_value(FunctionSpec::new("table"), |n: usize| async move {
            let mut columns = BTreeMap::new();
            columns.insert("ids".to_string(), (0..n).collect::<Vec<_>>());
            Ok(columns)
        })
        .unwrap();

    let mut first = table.call(3).await.unwrap();
    first.get_mut("ids").unwrap().push(99);
    first.insert("junk".to_string(), vec![]);

    let second = table.call(3).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second["ids"], vec![0, 1, 2]);
}

struct Connection {
    dsn: String,
}

#[tokio::test]
async fn test_resource_shared_identity() {
    let cache = cache();
    let opened = counter();

    let open_conn = {
        let opened = opened.clone();
        cache
            .register_resource(FunctionSpec::new("open_conn"), move |dsn: String| {
                let opened = opened.clone();
                async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    Ok(Connection { dsn })
                }
            })
            .unwrap()
    };

    let a = open_conn.call("sqlite://sales".to_string()).await.unwrap();
    let b = open_conn.call("sqlite://sales".to_string()).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.dsn, "sqlite://sales");
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    let c = open_conn.call("sqlite://other".to_string()).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
}

#[tokio::test]
async fn test_clear_function_forces_recompute() {
    let cache = cache();
    let calls = counter();

    let double = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("double"), move |n: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(n * 2)
                }
            })
            .unwrap()
    };
    let triple = cache
        .register_value(FunctionSpec::new("triple"), |n: i64| async move { Ok(n * 3) })
        .unwrap();

    double.call(4).await.unwrap();
    triple.call(4).await.unwrap();
    double.call(4).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let event = cache
        .clear(ClearTarget::Function("double".into()))
        .unwrap();
    assert_eq!(event.count(), 1);
    assert_eq!(event.reason, InvalidationReason::Manual);

    double.call(4).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // Other functions are untouched
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_clear_all_drops_resources() {
    let cache = cache();
    let opened = counter();

    let open_conn = {
        let opened = opened.clone();
        cache
            .register_resource(FunctionSpec::new("open_conn"), move |dsn: String| {
                let opened = opened.clone();
                async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    Ok(Connection { dsn })
                }
            })
            .unwrap()
    };

    let before = open_conn.call("db".to_string()).await.unwrap();
    cache.clear(ClearTarget::All).unwrap();
    let after = open_conn.call("db".to_string()).await.unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_during_computation_recomputes() {
    let cache = cache();
    let calls = counter();

    let slow_double = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("slow_double"), move |n: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(n * 2)
                }
            })
            .unwrap()
    };

    let pending = tokio::spawn({
        let slow_double = slow_double.clone();
        async move { slow_double.call_traced(1).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    cache
        .clear(ClearTarget::Function("slow_double".into()))
        .unwrap();
    assert_eq!(cache.in_flight(), 0);

    // A call after the clear does not join the computation started before it
    let (value, origin) = slow_double.call_traced(1).await.unwrap();
    assert_eq!(value, 2);
    assert_eq!(origin, Origin::Computed);

    // The caller that was already waiting still gets its answer
    let (earlier, earlier_origin) = pending.await.unwrap().unwrap();
    assert_eq!(earlier, 2);
    assert_eq!(earlier_origin, Origin::Computed);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(slow_double.call_traced(1).await.unwrap().1, Origin::Hit);
}

#[tokio::test]
async fn test_unrelated_clear_keeps_in_flight_resource() {
    let cache = cache();
    let opened = counter();

    let open_conn = {
        let opened = opened.clone();
        cache
            .register_resource(FunctionSpec::new("open_conn"), move |dsn: String| {
                let opened = opened.clone();
                async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    Ok(Connection { dsn })
                }
            })
            .unwrap()
    };
    let other = cache
        .register_value(FunctionSpec::new("other").version("1"), |n: i64| async move { Ok(n) })
        .unwrap();
    other.call(1).await.unwrap();

    let pending = tokio::spawn({
        let open_conn = open_conn.clone();
        async move { open_conn.call("db".to_string()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Neither a manual clear nor a code change of another function touches it
    cache.clear(ClearTarget::Function("other".into())).unwrap();
    cache
        .register_value(FunctionSpec::new("other").version("2"), |n: i64| async move { Ok(n) })
        .unwrap();
    assert_eq!(cache.in_flight(), 1);

    let first = pending.await.unwrap().unwrap();
    let second = open_conn.call("db".to_string()).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().resource_entries, 1);
}

#[tokio::test]
async fn test_clear_unknown_function() {
    let cache = cache();
    let err = cache
        .clear(ClearTarget::Function("missing".into()))
        .unwrap_err();
    assert!(matches!(err, CacheError::UnknownFunction(_)));
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let cache = cache();
    let calls = counter();

    let reciprocal = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("reciprocal"), move |n: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::ensure!(n != 0, "cannot divide by zero");
                    Ok(1.0 / n as f64)
                }
            })
            .unwrap()
    };

    for _ in 0..2 {
        let err = reciprocal.call(0).await.unwrap_err();
        assert!(err.is_computation());
        assert!(err.to_string().contains("cannot divide by zero"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().failed_computations, 2);
}

#[tokio::test]
async fn test_failure_reaches_every_waiter() {
    let cache = cache();
    let calls = counter();

    let flaky = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("flaky"), move |_: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<i64, _>(anyhow::anyhow!("upstream unavailable"))
                }
            })
            .unwrap()
    };

    let (a, b) = tokio::join!(flaky.call(1), flaky.call(1));
    assert!(a.unwrap_err().to_string().contains("upstream unavailable"));
    assert!(b.unwrap_err().to_string().contains("upstream unavailable"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_then_retry() {
    let cache = MemoCache::new(
        CacheConfig::builder()
            .computation_timeout(Duration::from_millis(50))
            .build(),
    )
    .unwrap();
    let attempts = counter();

    let slow_first = {
        let attempts = attempts.clone();
        cache
            .register_value(FunctionSpec::new("slow_first"), move |n: i64| {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(n)
                }
            })
            .unwrap()
    };

    let err = slow_first.call(1).await.unwrap_err();
    assert!(err.is_timeout());

    assert_eq!(slow_first.call(1).await.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_timeout_reaches_every_waiter() {
    let cache = MemoCache::new(
        CacheConfig::builder()
            .computation_timeout(Duration::from_millis(50))
            .build(),
    )
    .unwrap();
    let attempts = counter();

    let stuck = {
        let attempts = attempts.clone();
        cache
            .register_value(FunctionSpec::new("stuck"), move |n: i64| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(n)
                }
            })
            .unwrap()
    };

    let results = join_all((0..5).map(|_| stuck.call(7))).await;

    assert_eq!(results.len(), 5);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(e) if e.is_timeout())));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_reentrancy_is_reported() {
    let cache = cache();

    let recursive = cache
        .register_value(FunctionSpec::new("recursive"), {
            let cache = cache.clone();
            move |n: i64| {
                let cache = cache.clone();
                async move {
                    let me = cache.value_fn::<i64, i64>("recursive")?;
                    Ok::<_, anyhow::Error>(me.call(n).await? + 1)
                }
            }
        })
        .unwrap();

    let err = recursive.call(1).await.unwrap_err();
    assert!(err.is_computation());
    assert!(err.to_string().contains("reentrant"), "{}", err);
}

#[tokio::test]
async fn test_handle_argument_is_a_configuration_error() {
    let cache = cache();
    let calls = counter();
    let file = std::fs::File::open("Cargo.toml").unwrap();

    let read = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("read"), move |_: Arc<std::fs::File>| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0u8)
                }
            })
            .unwrap()
    };

    let err = read.call(Arc::new(file)).await.unwrap_err();
    assert!(matches!(err, CacheError::ConfigurationError(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fingerprint_change_drops_values_only() {
    let cache = cache();
    let opened = counter();

    let v1 = cache
        .register_value(FunctionSpec::new("score").version("v1"), |n: i64| async move {
            Ok(n + 1)
        })
        .unwrap();
    let conn = {
        let opened = opened.clone();
        cache
            .register_resource(FunctionSpec::new("conn"), move |dsn: String| {
                let opened = opened.clone();
                async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    Ok(Connection { dsn })
                }
            })
            .unwrap()
    };

    assert_eq!(v1.call(1).await.unwrap(), 2);
    let before = conn.call("db".to_string()).await.unwrap();

    // Same fingerprint: no-op, cached value survives
    cache
        .register_value(FunctionSpec::new("score").version("v1"), |n: i64| async move {
            Ok(n + 100)
        })
        .unwrap();
    assert_eq!(v1.call(1).await.unwrap(), 2);

    // Edited code
    let v2 = cache
        .register_value(FunctionSpec::new("score").version("v2"), |n: i64| async move {
            Ok(n + 10)
        })
        .unwrap();
    assert_eq!(v2.call(1).await.unwrap(), 11);

    let after = conn.call("db".to_string()).await.unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    let events = cache.recent_events();
    assert!(events
        .iter()
        .any(|e| matches!(e.reason, InvalidationReason::CodeChanged { .. })));
}

#[tokio::test]
async fn test_discipline_and_type_mismatch() {
    let cache = cache();
    cache
        .register_value(FunctionSpec::new("double"), |n: i64| async move { Ok(n * 2) })
        .unwrap();

    let err = cache
        .register_resource(FunctionSpec::new("double"), |n: i64| async move { Ok(n) })
        .err()
        .unwrap();
    assert!(matches!(err, CacheError::ConfigurationError(_)));

    assert!(matches!(
        cache.value_fn::<i64, String>("double").err().unwrap(),
        CacheError::ConfigurationError(_)
    ));
    assert!(matches!(
        cache.resource_fn::<i64, i64>("double").err().unwrap(),
        CacheError::ConfigurationError(_)
    ));
    assert!(matches!(
        cache.value_fn::<i64, i64>("halve").err().unwrap(),
        CacheError::UnknownFunction(_)
    ));

    let by_id = cache.value_fn::<i64, i64>("double").unwrap();
    assert_eq!(by_id.call(21).await.unwrap(), 42);
}

#[tokio::test]
async fn test_lru_bound_spares_resources() {
    let cache = MemoCache::new(CacheConfig::builder().max_entries(2).build()).unwrap();
    let calls = counter();

    let square = {
        let calls = calls.clone();
        cache
            .register_value(FunctionSpec::new("square"), move |n: i64| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(n * n)
                }
            })
            .unwrap()
    };
    let conn = cache
        .register_resource(FunctionSpec::new("conn"), |dsn: String| async move {
            Ok(Connection { dsn })
        })
        .unwrap();

    let shared = conn.call("db".to_string()).await.unwrap();
    for n in 1..=3 {
        square.call(n).await.unwrap();
    }

    // 1 was least recently used and got evicted
    square.call(1).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let stats = cache.stats();
    assert_eq!(stats.value_entries, 2);
    assert_eq!(stats.resource_entries, 1);
    assert!(stats.evictions_size >= 2);
    assert!(Arc::ptr_eq(&shared, &conn.call("db".to_string()).await.unwrap()));

    // Every eviction is reported as an event
    let evicted: usize = cache
        .recent_events()
        .iter()
        .filter(|e| e.reason == InvalidationReason::LeastRecentlyUsed)
        .map(|e| e.count())
        .sum();
    assert_eq!(evicted as u64, stats.evictions_size);
}

#[tokio::test]
async fn test_ttl_expiry_and_cleanup() {
    let cache = cache();
    let calls = counter();

    let stamp = {
        let calls = calls.clone();
        cache
            .register_value(
                FunctionSpec::new("stamp").ttl(Duration::from_millis(50)),
                move |n: i64| {
                    let calls = calls.clone();
                    async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as i64 + n) }
                },
            )
            .unwrap()
    };

    assert_eq!(stamp.call(0).await.unwrap(), 0);
    assert_eq!(stamp.call(0).await.unwrap(), 0);
    stamp.call(1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;

    let event = cache.cleanup_expired().unwrap();
    assert_eq!(event.count(), 2);
    assert_eq!(event.reason, InvalidationReason::Expired);

    assert_eq!(stamp.call(0).await.unwrap(), 2);
}

#[tokio::test]
async fn test_dropped_waiter_does_not_cancel() {
    let cache = cache();
    let finished = counter();

    let slow = {
        let finished = finished.clone();
        cache
            .register_value(FunctionSpec::new("slow"), move |n: i64| {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(n)
                }
            })
            .unwrap()
    };

    // Session torn down mid-computation
    let _ = tokio::time::timeout(Duration::from_millis(20), slow.call(5)).await;
    assert_eq!(cache.in_flight(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    // The finished result is there for the next caller
    assert_eq!(slow.call(5).await.unwrap(), 5);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_auto_cleanup_task() {
    let cache = MemoCache::new(
        CacheConfig::builder()
            .cleanup_interval(Duration::from_millis(30))
            .build(),
    )
    .unwrap();

    let short = cache
        .register_value(
            FunctionSpec::new("short").ttl(Duration::from_millis(10)),
            |n: i64| async move { Ok(n) },
        )
        .unwrap();
    short.call(1).await.unwrap();

    let task = cache.start_auto_cleanup();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(cache.is_empty());
    assert_eq!(cache.stats().evictions_ttl, 1);
    task.abort();
}
