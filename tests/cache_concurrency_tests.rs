//! Cache and singleflight behavior under concurrent load
//!
//! A deliberately slow executor keeps the first computation in flight long
//! enough for every other caller to arrive while it runs.

use statcore::cache::{CachingExecutor, Executor, InMemoryStore};
use statcore::config::EngineConfig;
use statcore::engine::{Sample, TestData, TestEngine, TestRequest, TestResult, TestType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

struct SlowEngine {
    engine: TestEngine,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowEngine {
    fn new(delay_ms: u64) -> Self {
        Self {
            engine: TestEngine::default(),
            delay: Duration::from_millis(delay_ms),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Executor for SlowEngine {
    fn execute(&self, request: &TestRequest) -> statcore::Result<TestResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.engine.execute(request.test_type, request)
    }
}

fn request(shift: f64) -> TestRequest {
    TestRequest::new(
        TestType::WelchT,
        TestData::Samples {
            groups: vec![
                Sample::new("control", vec![4.1, 5.2, 4.8, 5.0, 4.6, 5.3]),
                Sample::new("treated", vec![5.0 + shift, 5.9, 6.1, 5.4, 5.7, 6.3]),
            ],
        },
    )
    .with_precision(20)
}

fn caching(delay_ms: u64, config: EngineConfig) -> (Arc<CachingExecutor<SlowEngine>>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let executor = Arc::new(CachingExecutor::new(SlowEngine::new(delay_ms), store.clone(), config));
    (executor, store)
}

#[test]
fn test_identical_concurrent_requests_compute_once() {
    const CALLERS: usize = 16;
    let (cache, _) = caching(150, EngineConfig::default());
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_compute(&request(0.0)).unwrap().0
            })
        })
        .collect();
    let results: Vec<TestResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().computations, 1);

    let p = results[0].p_value.to_string();
    assert!(results.iter().all(|r| r.p_value.to_string() == p));
    assert!(results.iter().all(|r| r.statistic == results[0].statistic));
}

#[test]
fn test_distinct_requests_do_not_coalesce() {
    let (cache, store) = caching(50, EngineConfig::default());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let cache = cache.clone();
            thread::spawn(move || cache.get_or_compute(&request(i as f64 * 0.1)).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.len(), 4);
    assert_eq!(cache.stats().coalesced, 0);
}

#[test]
fn test_hit_and_miss_carry_the_same_content() {
    let (cache, _) = caching(0, EngineConfig::default());
    let (miss, miss_flag) = cache.get_or_compute(&request(0.0)).unwrap();
    let (hit, hit_flag) = cache.get_or_compute(&request(0.0)).unwrap();
    assert!(!miss_flag && hit_flag);
    assert!(!miss.cache_hit && hit.cache_hit);
    assert_eq!(
        serde_json::to_value(&miss.p_value).unwrap(),
        serde_json::to_value(&hit.p_value).unwrap()
    );
    assert_eq!(miss.confidence_interval, hit.confidence_interval);
}

#[test]
fn test_expired_entries_are_recomputed() {
    let config = EngineConfig {
        cache_ttl_secs: 0,
        ..EngineConfig::default()
    };
    let (cache, _) = caching(0, config);
    cache.get_or_compute(&request(0.0)).unwrap();
    let (_, hit) = cache.get_or_compute(&request(0.0)).unwrap();
    assert!(!hit);
    assert_eq!(cache.stats().computations, 2);
    assert_eq!(cache.purge_expired(), 1);
}

#[test]
fn test_store_outage_degrades_to_direct_computation() {
    let (cache, store) = caching(0, EngineConfig::default());
    store.set_offline(true);
    let (result, hit) = cache.get_or_compute(&request(0.0)).unwrap();
    assert!(!hit);
    assert!(!result.cache_hit);
    assert!(cache.stats().degraded >= 1);

    store.set_offline(false);
    assert!(!cache.get_or_compute(&request(0.0)).unwrap().1);
    assert!(cache.get_or_compute(&request(0.0)).unwrap().1);
}

#[test]
fn test_deadline_returns_early_and_computation_still_lands() {
    let (cache, store) = caching(300, EngineConfig::default());
    let err = cache
        .get_or_compute_timeout(&request(0.0), Duration::from_millis(20))
        .unwrap_err();
    assert_eq!(err.code(), "DEADLINE_EXCEEDED");

    for _ in 0..50 {
        if !store.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    let (_, hit) = cache
        .get_or_compute_timeout(&request(0.0), Duration::from_secs(5))
        .unwrap();
    assert!(hit);
    assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 1);
}
