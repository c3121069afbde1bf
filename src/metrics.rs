//! Engine metrics with Prometheus
//!
//! Exposes operational metrics for monitoring and alerting:
//! - Test executions and computation latency per family
//! - Cache hits, misses and degraded lookups
//! - Multiplicity alerts and blocked exports
//!
//! Session ids never appear in labels; they are unbounded.

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Execution Metrics
    // ============================================================================

    /// Tests executed by family and outcome
    pub static ref TESTS_EXECUTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("statcore_tests_executed_total", "Total hypothesis tests executed"),
        &["family", "result"]  // result: "ok", "validation", "overflow"
    ).unwrap();

    /// Raw computation duration
    pub static ref COMPUTATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "statcore_computation_duration_seconds",
            "Duration of uncached test computations"
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["family"]
    ).unwrap();

    /// Requests answered by the robust counterpart after an assumption failure
    pub static ref TEST_SWITCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("statcore_test_switches_total", "Automatic switches to robust tests"),
        &["from", "to"]
    ).unwrap();

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Cache lookups by outcome
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("statcore_cache_lookups_total", "Result cache lookups"),
        &["outcome"]  // outcome: "hit", "miss", "degraded"
    ).unwrap();

    /// Callers that waited on another caller's in-flight computation
    pub static ref SINGLEFLIGHT_COALESCED_TOTAL: IntCounter = IntCounter::new(
        "statcore_singleflight_coalesced_total",
        "Requests coalesced onto an in-flight computation"
    ).unwrap();

    // ============================================================================
    // Registry Metrics
    // ============================================================================

    /// Corrections applied by method
    pub static ref CORRECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("statcore_corrections_total", "Multiplicity corrections applied"),
        &["method"]
    ).unwrap();

    /// Export attempts by outcome
    pub static ref EXPORT_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("statcore_export_attempts_total", "Export attempts"),
        &["outcome"]  // outcome: "cleared", "blocked", "forced"
    ).unwrap();

    /// Multiplicity alerts by level
    pub static ref MULTIPLICITY_ALERTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("statcore_multiplicity_alerts_total", "Uncorrected-hypothesis alerts"),
        &["level"]  // level: "warning", "escalated"
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    // Execution metrics
    METRICS_REGISTRY.register(Box::new(TESTS_EXECUTED_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(COMPUTATION_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(TEST_SWITCHES_TOTAL.clone()))?;

    // Cache metrics
    METRICS_REGISTRY.register(Box::new(CACHE_LOOKUPS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(SINGLEFLIGHT_COALESCED_TOTAL.clone()))?;

    // Registry metrics
    METRICS_REGISTRY.register(Box::new(CORRECTIONS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(EXPORT_ATTEMPTS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(MULTIPLICITY_ALERTS_TOTAL.clone()))?;

    Ok(())
}

/// Render the registry in Prometheus text exposition format
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to time operations with histogram (RAII pattern)
/// Usage: let _timer = Timer::new(COMPUTATION_DURATION.with_label_values(&["location"]));
pub struct Timer {
    histogram: prometheus::Histogram,
    start: std::time::Instant,
}

impl Timer {
    /// Create timer that records duration to histogram on drop
    pub fn new(histogram: prometheus::Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_on_drop() {
        let histogram = COMPUTATION_DURATION.with_label_values(&["timer_test"]);
        let before = histogram.get_sample_count();
        {
            let _timer = Timer::new(histogram.clone());
        }
        assert_eq!(histogram.get_sample_count(), before + 1);
    }

    #[test]
    fn test_counters_increment() {
        let counter = CACHE_LOOKUPS_TOTAL.with_label_values(&["counter_test"]);
        let before = counter.get();
        counter.inc();
        assert_eq!(counter.get(), before + 1);
    }
}
