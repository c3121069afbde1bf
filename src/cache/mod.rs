//! Result Cache
//!
//! Content-addressed memoization in front of a raw executor:
//! - `key`: canonical request digest
//! - `store`: pluggable key-value backend with TTL
//! - `singleflight`: one computation per key at a time
//!
//! A hit and a miss return the same content because the value handed back
//! on a miss is decoded from the very payload that was stored.

pub mod key;
pub mod singleflight;
pub mod store;

pub use key::CacheKey;
pub use singleflight::{Role, Singleflight};
pub use store::{CacheStore, InMemoryStore, StoreError};

use crate::config::EngineConfig;
use crate::engine::{TestEngine, TestRequest, TestResult};
use crate::errors::{EngineError, Result};
use crate::metrics::{CACHE_LOOKUPS_TOTAL, SINGLEFLIGHT_COALESCED_TOTAL};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that turns a request into a result without caching
pub trait Executor: Send + Sync {
    fn execute(&self, request: &TestRequest) -> Result<TestResult>;
}

impl Executor for TestEngine {
    fn execute(&self, request: &TestRequest) -> Result<TestResult> {
        TestEngine::execute(self, request.test_type, request)
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub degraded: u64,
    pub computations: u64,
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
}

/// Payload of one flight: the stored bytes and whether they came from the store
type FlightOutcome = Result<(Arc<Vec<u8>>, bool)>;

pub struct CachingExecutor<E: Executor> {
    inner: E,
    store: Arc<dyn CacheStore>,
    flights: Singleflight<FlightOutcome>,
    config: EngineConfig,
    counters: Counters,
}

impl<E: Executor> CachingExecutor<E> {
    pub fn new(inner: E, store: Arc<dyn CacheStore>, config: EngineConfig) -> Self {
        Self {
            inner,
            store,
            flights: Singleflight::new(),
            config,
            counters: Counters::default(),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn key_for(&self, request: &TestRequest) -> Result<CacheKey> {
        CacheKey::derive(request, self.config.cache_key_digits, self.config.default_precision)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Drop expired entries from the backing store
    pub fn purge_expired(&self) -> usize {
        match self.store.purge_expired() {
            Ok(removed) => removed,
            Err(e) => {
                self.record_degraded(&e);
                0
            }
        }
    }

    /// Cached result for the request, computing it on a miss
    ///
    /// Returns the result and whether it was served from the store.
    pub fn get_or_compute(&self, request: &TestRequest) -> Result<(TestResult, bool)> {
        let key = self.key_for(request)?;

        let store_available = match self.store.get(key.as_str()) {
            Ok(Some(payload)) => match decode(&payload) {
                Ok(result) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                    debug!(key = %key, "cache hit");
                    return Ok((mark(result, true), true));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding undecodable cache entry");
                    let _ = self.store.remove(key.as_str());
                    true
                }
            },
            Ok(None) => true,
            Err(e) => {
                self.record_degraded(&e);
                false
            }
        };
        if store_available {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
        }

        let (outcome, role) = self
            .flights
            .run(key.as_str(), || self.compute_and_store(request, &key, store_available));
        if role == Role::Follower {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            SINGLEFLIGHT_COALESCED_TOTAL.inc();
        }

        let (payload, from_store) = outcome?;
        let result = decode(&payload)?;
        Ok((mark(result, from_store), from_store))
    }

    /// Leader body: re-check the store, then compute and write all-or-nothing
    fn compute_and_store(&self, request: &TestRequest, key: &CacheKey, store_available: bool) -> FlightOutcome {
        if store_available {
            // a flight that finished just before this one may have filled the entry
            if let Ok(Some(payload)) = self.store.get(key.as_str()) {
                if decode(&payload).is_ok() {
                    return Ok((Arc::new(payload), true));
                }
            }
        }

        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        let result = self.inner.execute(request)?;
        let payload = serde_json::to_vec(&result).map_err(|e| EngineError::SerializationError(e.to_string()))?;

        if store_available {
            let ttl = Duration::from_secs(self.config.cache_ttl_secs);
            if let Err(e) = self.store.put(key.as_str(), payload.clone(), ttl) {
                self.record_degraded(&e);
            }
        }
        Ok((Arc::new(payload), false))
    }

    fn record_degraded(&self, error: &StoreError) {
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        CACHE_LOOKUPS_TOTAL.with_label_values(&["degraded"]).inc();
        let signal = EngineError::CacheUnavailable(error.to_string());
        warn!(error = %signal, "falling back to direct computation");
    }
}

impl<E: Executor + 'static> CachingExecutor<E> {
    /// `get_or_compute` with a bound on how long the caller waits
    ///
    /// The computation runs on its own thread; when the deadline passes the
    /// caller gets `DeadlineExceeded` while the computation continues and
    /// fills the cache for later callers.
    pub fn get_or_compute_timeout(
        self: &Arc<Self>,
        request: &TestRequest,
        timeout: Duration,
    ) -> Result<(TestResult, bool)> {
        let (tx, rx) = mpsc::channel();
        let executor = Arc::clone(self);
        let request = request.clone();
        let started = Instant::now();
        thread::spawn(move || {
            let _ = tx.send(executor.get_or_compute(&request));
        });
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(EngineError::DeadlineExceeded {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Internal(anyhow::anyhow!(
                "computation thread exited without a result"
            ))),
        }
    }
}

fn decode(payload: &[u8]) -> Result<TestResult> {
    serde_json::from_slice(payload).map_err(|e| EngineError::SerializationError(e.to_string()))
}

fn mark(mut result: TestResult, cache_hit: bool) -> TestResult {
    result.cache_hit = cache_hit;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestData, TestType};

    fn request() -> TestRequest {
        TestRequest::new(
            TestType::TwoSampleT,
            TestData::Samples {
                groups: vec![
                    Sample::new("a", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
                    Sample::new("b", vec![2.0, 3.0, 4.0, 5.0, 6.0]),
                ],
            },
        )
        .with_precision(10)
    }

    fn executor(store: Arc<InMemoryStore>) -> CachingExecutor<TestEngine> {
        CachingExecutor::new(TestEngine::default(), store, EngineConfig::default())
    }

    #[test]
    fn test_miss_then_hit_with_identical_content() {
        let cache = executor(Arc::new(InMemoryStore::new()));
        let (first, hit1) = cache.get_or_compute(&request()).unwrap();
        let (second, hit2) = cache.get_or_compute(&request()).unwrap();
        assert!(!hit1);
        assert!(hit2);
        assert!(second.cache_hit);
        assert_eq!(mark(first, false), mark(second, false));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.computations), (1, 1, 1));
    }

    #[test]
    fn test_unavailable_store_degrades_to_direct_computation() {
        let store = Arc::new(InMemoryStore::new());
        store.set_offline(true);
        let cache = executor(store.clone());
        let (result, hit) = cache.get_or_compute(&request()).unwrap();
        assert!(!hit);
        assert!(!result.p_value.to_string().is_empty());
        assert_eq!(cache.stats().degraded, 1);
        store.set_offline(false);
        assert!(store.is_empty());
    }

    #[test]
    fn test_validation_errors_are_not_cached() {
        let store = Arc::new(InMemoryStore::new());
        let cache = executor(store.clone());
        let bad = TestRequest::new(
            TestType::OneSampleT,
            TestData::Samples {
                groups: vec![Sample::new("x", vec![1.0])],
            },
        );
        let err = cache.get_or_compute(&bad).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(store.is_empty());
    }

    #[test]
    fn test_timeout_leaves_computation_to_fill_cache() {
        let cache = Arc::new(executor(Arc::new(InMemoryStore::new())));
        let outcome = cache.get_or_compute_timeout(&request(), Duration::from_secs(30));
        assert!(outcome.is_ok());
        let (_, hit) = cache.get_or_compute(&request()).unwrap();
        assert!(hit);
    }
}
