//! Request pipeline
//!
//! `RawExecutor` runs one request end to end without caching: execute the
//! requested test, check its assumptions, let the recommender confirm or
//! switch, then attach effect size and power. `StatisticsService` puts the
//! result cache in front of it, wraps results in the response envelope and
//! forwards completed results to the hypothesis registry.

use crate::assumptions::AssumptionChecker;
use crate::bundle::{BundleBuilder, ReproducibilityBundle};
use crate::cache::{CacheStats, CacheStore, CachingExecutor, Executor, InMemoryStore};
use crate::config::EngineConfig;
use crate::effects;
use crate::engine::{PrecisionMetadata, TestEngine, TestRequest, TestResult};
use crate::errors::{EngineError, Result};
use crate::metrics::TEST_SWITCHES_TOTAL;
use crate::recommender::{recommend, Decision};
use crate::registry::{
    CorrectionMethod, CorrectionReport, EventBuffer, ExportIntent, ExportStatus, HypothesisRegistry, RecordOutcome,
    SessionHandle,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Uncached executor: engine, assumption checks, recommender and effects
pub struct RawExecutor {
    engine: TestEngine,
    checker: AssumptionChecker,
    config: EngineConfig,
}

impl Default for RawExecutor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RawExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: TestEngine::new(config.clone()),
            checker: AssumptionChecker::new(config.clone()),
            config,
        }
    }

    pub fn engine(&self) -> &TestEngine {
        &self.engine
    }

    fn auto_switch(&self, request: &TestRequest) -> Result<bool> {
        Ok(request.option_bool("auto_switch")?.unwrap_or(self.config.auto_switch))
    }

    fn annotate(&self, request: &TestRequest) -> Result<TestResult> {
        let requested = request.test_type;
        let primary = self.engine.execute(requested, request)?;
        let checks = self.checker.check(requested, request)?;
        let recommendation = recommend(requested, &checks, &primary.sample_sizes, self.config.asymptotic_threshold);

        let mut result = if recommendation.switched && self.auto_switch(request)? {
            let fallback = recommendation.confirmed_test;
            match self.engine.execute(fallback, request) {
                Ok(switched) => {
                    TEST_SWITCHES_TOTAL
                        .with_label_values(&[requested.as_str(), fallback.as_str()])
                        .inc();
                    info!(from = %requested, to = %fallback, reason = %recommendation.reason, "switched to robust test");
                    switched
                }
                Err(e) => {
                    warn!(from = %requested, to = %fallback, error = %e, "robust fallback failed; keeping requested test");
                    let mut kept = primary;
                    kept.notes.push(format!("{fallback} could not run on this data ({}); {requested} kept", e.message()));
                    kept
                }
            }
        } else {
            let mut kept = primary;
            if recommendation.switched {
                kept.notes.push(format!(
                    "{} is recommended; automatic switching is off",
                    recommendation.confirmed_test
                ));
            } else if recommendation.decision == Decision::ConfirmedWithCaveat {
                kept.notes.push(recommendation.reason.clone());
            }
            kept
        };

        result.requested_test = requested;
        result.switched = result.test_type != requested;
        result.assumptions = checks;
        result.recommendation = Some(recommendation.reason);
        Ok(result)
    }
}

impl Executor for RawExecutor {
    fn execute(&self, request: &TestRequest) -> Result<TestResult> {
        let mut result = self.annotate(request)?;
        match effects::augment(&result, request, &self.config) {
            Ok(augmentation) => {
                result.effect_size = augmentation.effect_size;
                result.power = augmentation.power;
                result.notes.extend(augmentation.notes);
            }
            Err(e @ EngineError::Validation { .. }) => return Err(e),
            Err(e) => {
                warn!(test = %result.test_type, error = %e, "effect size or power unavailable");
                result.notes.push(format!("effect size and power unavailable: {}", e.message()));
            }
        }
        debug!(test = %result.test_type, switched = result.switched, "request evaluated");
        Ok(result)
    }
}

/// Response envelope handed to the transport layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub high_precision_result: TestResult,
    pub metadata: PrecisionMetadata,
    #[serde(rename = "_cache_hit")]
    pub cache_hit: bool,
}

impl Envelope {
    fn new(result: TestResult, cache_hit: bool) -> Self {
        Self {
            metadata: result.metadata.clone(),
            high_precision_result: result,
            cache_hit,
        }
    }
}

/// Cached evaluation plus the session-facing registry operations
pub struct StatisticsService {
    executor: Arc<CachingExecutor<RawExecutor>>,
    registry: HypothesisRegistry,
    events: Arc<EventBuffer>,
    config: EngineConfig,
}

impl Default for StatisticsService {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StatisticsService {
    /// Service backed by an in-memory cache store
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: EngineConfig, store: Arc<dyn CacheStore>) -> Self {
        let events = Arc::new(EventBuffer::new(config.event_buffer_capacity));
        let registry = HypothesisRegistry::new(&config, events.clone());
        let executor = Arc::new(CachingExecutor::new(RawExecutor::new(config.clone()), store, config.clone()));
        Self {
            executor,
            registry,
            events,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &HypothesisRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.executor.stats()
    }

    pub fn evaluate(&self, request: &TestRequest) -> Result<Envelope> {
        let (result, cache_hit) = self.executor.get_or_compute(request)?;
        Ok(Envelope::new(result, cache_hit))
    }

    /// `evaluate`, giving up after `timeout` while the computation finishes
    /// in the background
    pub fn evaluate_with_timeout(&self, request: &TestRequest, timeout: Duration) -> Result<Envelope> {
        let (result, cache_hit) = self.executor.get_or_compute_timeout(request, timeout)?;
        Ok(Envelope::new(result, cache_hit))
    }

    pub fn open_session(&self, owner: &str) -> Result<SessionHandle> {
        self.registry.open_session(owner)
    }

    /// Evaluate and record the result as a hypothesis of `session`
    ///
    /// Variable names come from the request's `variables` option.
    pub fn evaluate_in_session(&self, session: &SessionHandle, request: &TestRequest) -> Result<(Envelope, RecordOutcome)> {
        let variables = request.option_strings("variables")?;
        let envelope = self.evaluate(request)?;
        let outcome = self.registry.record(session, &envelope.high_precision_result, &variables)?;
        Ok((envelope, outcome))
    }

    pub fn correct(&self, session: &SessionHandle, method: CorrectionMethod, alpha: f64) -> Result<CorrectionReport> {
        self.registry.correct(session, method, alpha)
    }

    pub fn export_status(&self, session: &SessionHandle) -> ExportStatus {
        self.registry.export_status(session)
    }

    /// Bundle the session and the given evaluations, subject to export gating
    pub fn bundle(
        &self,
        session: Option<(&SessionHandle, &ExportIntent)>,
        evaluations: &[(TestRequest, TestResult)],
    ) -> Result<ReproducibilityBundle> {
        let mut builder = BundleBuilder::new(&self.config);
        if let Some((handle, intent)) = session {
            builder = builder.with_session(&self.registry, handle, intent)?;
        }
        for (request, result) in evaluations {
            builder.add_entry(request, result)?;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestData, TestType};
    use serde_json::json;

    fn skewed_two_sample() -> TestRequest {
        TestRequest::new(
            TestType::TwoSampleT,
            TestData::Samples {
                groups: vec![
                    Sample::new("a", vec![1.0, 1.1, 1.2, 1.0, 1.1, 1.3, 1.2, 25.0]),
                    Sample::new("b", vec![2.0, 2.1, 2.3, 2.2, 2.0, 2.4, 2.1, 40.0]),
                ],
            },
        )
    }

    #[test]
    fn test_envelope_shape() {
        let service = StatisticsService::default();
        let request = TestRequest::new(
            TestType::TwoSampleT,
            TestData::Samples {
                groups: vec![
                    Sample::new("a", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
                    Sample::new("b", vec![2.0, 3.0, 4.0, 5.0, 6.0]),
                ],
            },
        )
        .with_precision(10);
        let envelope = service.evaluate(&request).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["_cache_hit"], json!(false));
        assert_eq!(json["metadata"]["precision"], json!(10));
        assert_eq!(json["metadata"]["algorithm"], json!("high_precision_decimal"));
        assert!(json["high_precision_result"]["p_value"].is_string());
        assert!(envelope.high_precision_result.effect_size.is_some());

        let again = service.evaluate(&request).unwrap();
        assert!(again.cache_hit);
        assert_eq!(
            again.high_precision_result.p_value.to_string(),
            envelope.high_precision_result.p_value.to_string()
        );
    }

    #[test]
    fn test_outliers_switch_to_rank_test() {
        let result = RawExecutor::default().execute(&skewed_two_sample()).unwrap();
        assert_eq!(result.requested_test, TestType::TwoSampleT);
        assert_eq!(result.test_type, TestType::MannWhitneyU);
        assert!(result.switched);
        assert!(result.violations().any(|c| c.name == "normality"));
        assert!(result.recommendation.as_deref().unwrap_or("").contains("switched"));
    }

    #[test]
    fn test_exact_fallback_over_total_cap_keeps_chi_square() {
        // sparse second column asks for fisher, but the total is beyond the exact cap
        let request = TestRequest::new(
            TestType::ChiSquareIndependence,
            TestData::Contingency {
                table: vec![vec![150_000, 3], vec![150_000, 1]],
            },
        );
        let result = RawExecutor::default().annotate(&request).unwrap();
        assert_eq!(result.test_type, TestType::ChiSquareIndependence);
        assert!(!result.switched);
        assert!(result.notes.iter().any(|n| n.contains("fisher_exact could not run")));
    }

    #[test]
    fn test_auto_switch_can_be_disabled_per_request() {
        let request = skewed_two_sample().with_option("auto_switch", json!(false));
        let result = RawExecutor::default().execute(&request).unwrap();
        assert_eq!(result.test_type, TestType::TwoSampleT);
        assert!(!result.switched);
        assert!(result.notes.iter().any(|n| n.contains("recommended")));
    }

    #[test]
    fn test_session_flow() {
        let service = StatisticsService::default();
        let session = service.open_session("analyst").unwrap();
        let request = skewed_two_sample().with_option("variables", json!(["dose", "response"]));
        let (_, outcome) = service.evaluate_in_session(&session, &request).unwrap();
        assert_eq!(outcome.uncorrected, 1);
        assert!(service.export_status(&session).export_blocked);

        service.correct(&session, CorrectionMethod::Holm, 0.05).unwrap();
        assert!(!service.export_status(&session).export_blocked);
        let hypothesis = &session.snapshot().hypotheses[0];
        assert_eq!(hypothesis.variables, vec!["dose".to_string(), "response".to_string()]);

        let envelope = service.evaluate(&request).unwrap();
        let bundle = service
            .bundle(
                Some((&session, &ExportIntent::default())),
                &[(request, envelope.high_precision_result)],
            )
            .unwrap();
        assert!(bundle.verify().unwrap());
        assert!(!service.events().is_empty());
    }
}
