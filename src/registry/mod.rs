//! Hypothesis Registry
//!
//! Session-scoped ledger of every test a caller ran, with multiplicity
//! correction and export gating:
//! - `correction`: Bonferroni, Holm and Benjamini–Hochberg adjustment
//! - `events`: lifecycle events and a bounded in-memory sink
//!
//! Sessions are explicit handles owned by the caller. Each handle wraps its
//! own lock, so appends and corrections on one session are linearized while
//! different sessions proceed in parallel. The registry itself holds only
//! configuration and the event sink.

pub mod correction;
pub mod events;

pub use correction::{adjust, AdjustedP, Adjustment, CorrectionMethod};
pub use events::{EventBuffer, EventSink, NullSink, RegistryEvent};

use crate::config::EngineConfig;
use crate::engine::{TestResult, TestType};
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::metrics::{CORRECTIONS_TOTAL, EXPORT_ATTEMPTS_TOTAL, MULTIPLICITY_ALERTS_TOTAL};
use crate::precision::{PrecisionContext, PrecisionValue, RoundingMode};
use crate::validation::{validate_alpha, validate_justification, validate_owner, validate_variables};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No hypotheses recorded yet
    Open,
    /// At least one hypothesis has no adjusted p-value
    CorrectionPending,
    /// Every hypothesis carries an adjusted p-value
    Corrected,
    /// An export was refused; cleared by the next correction
    ExportBlocked,
}

/// Non-fatal signal raised as uncorrected tests accumulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplicityAlert {
    None,
    Warning,
    Escalated,
}

impl MultiplicityAlert {
    fn for_count(uncorrected: usize, warning: usize, escalation: usize) -> Self {
        if uncorrected >= escalation {
            Self::Escalated
        } else if uncorrected >= warning {
            Self::Warning
        } else {
            Self::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Escalated => "escalated",
        }
    }
}

/// One recorded test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: Uuid,
    /// Session the hypothesis was recorded in
    pub session_id: Uuid,
    pub test_type: TestType,
    pub requested_test: TestType,
    pub statistic_name: String,
    pub raw_p_value: PrecisionValue,
    pub adjusted_p_value: Option<PrecisionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significant: Option<bool>,
    #[serde(default)]
    pub variables: Vec<String>,
    /// Digits the originating result was presented at
    pub precision: u32,
    pub recorded_at: DateTime<Utc>,
}

impl Hypothesis {
    pub fn is_corrected(&self) -> bool {
        self.adjusted_p_value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub hypothesis_id: Uuid,
    pub test_type: TestType,
    pub raw_p: PrecisionValue,
    pub adjusted_p: PrecisionValue,
    pub significant: bool,
}

/// Result of one correction pass over a whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub session_id: Uuid,
    pub method: CorrectionMethod,
    pub alpha: f64,
    pub adjusted_alpha: PrecisionValue,
    pub entries: Vec<CorrectionEntry>,
    pub corrected_at: DateTime<Utc>,
}

impl CorrectionReport {
    pub fn significant_count(&self) -> usize {
        self.entries.iter().filter(|e| e.significant).count()
    }
}

/// Recorded override of a blocked export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyException {
    pub id: Uuid,
    pub session_id: Uuid,
    pub owner: String,
    pub uncorrected: usize,
    pub justification: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub owner: String,
    pub state: SessionState,
    pub hypotheses: Vec<Hypothesis>,
    /// Most recent correction, if any
    pub correction: Option<CorrectionReport>,
    #[serde(default)]
    pub policy_exceptions: Vec<PolicyException>,
    pub alert: MultiplicityAlert,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(owner: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            state: SessionState::Open,
            hypotheses: Vec::new(),
            correction: None,
            policy_exceptions: Vec::new(),
            alert: MultiplicityAlert::None,
            created_at: Utc::now(),
        }
    }

    pub fn uncorrected_count(&self) -> usize {
        self.hypotheses.iter().filter(|h| !h.is_corrected()).count()
    }

    /// Method of the latest correction
    pub fn correction_method(&self) -> Option<CorrectionMethod> {
        self.correction.as_ref().map(|c| c.method)
    }

    /// True after a refused export until the session is corrected
    pub fn export_blocked(&self) -> bool {
        self.state == SessionState::ExportBlocked
    }
}

/// Caller-owned reference to one session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Consistent copy of the session as of now
    pub fn snapshot(&self) -> Session {
        self.inner.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub hypothesis_id: Uuid,
    pub uncorrected: usize,
    pub alert: MultiplicityAlert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub hypotheses: usize,
    pub uncorrected: usize,
    /// Whether an export attempted now would be refused
    pub export_blocked: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportIntent {
    pub force: bool,
    #[serde(default)]
    pub justification: Option<String>,
}

impl ExportIntent {
    pub fn forced(justification: impl Into<String>) -> Self {
        Self {
            force: true,
            justification: Some(justification.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportClearance {
    pub session_id: Uuid,
    pub hypotheses: usize,
    pub correction_method: Option<CorrectionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_exception: Option<PolicyException>,
}

pub struct HypothesisRegistry {
    warning_threshold: usize,
    escalation_threshold: usize,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
}

impl Default for HypothesisRegistry {
    fn default() -> Self {
        Self::new(&EngineConfig::default(), Arc::new(NullSink))
    }
}

impl HypothesisRegistry {
    pub fn new(config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            warning_threshold: config.warning_threshold,
            escalation_threshold: config.escalation_threshold.max(config.warning_threshold),
            config: config.clone(),
            sink,
        }
    }

    pub fn open_session(&self, owner: &str) -> Result<SessionHandle> {
        validate_owner(owner).map_validation_err("owner")?;
        let session = Session::new(owner);
        let id = session.id;
        info!(session_id = %id, owner = %owner, "session opened");
        self.sink.emit(RegistryEvent::SessionOpened {
            session_id: id,
            owner: owner.to_string(),
            timestamp: session.created_at,
        });
        Ok(SessionHandle {
            id,
            inner: Arc::new(Mutex::new(session)),
        })
    }

    /// Append a completed result as an uncorrected hypothesis
    pub fn record(&self, handle: &SessionHandle, result: &TestResult, variables: &[String]) -> Result<RecordOutcome> {
        validate_variables(variables).map_validation_err("variables")?;

        let hypothesis = Hypothesis {
            id: Uuid::new_v4(),
            session_id: handle.id,
            test_type: result.test_type,
            requested_test: result.requested_test,
            statistic_name: result.statistic_name.clone(),
            raw_p_value: result.p_value.clone(),
            adjusted_p_value: None,
            significant: None,
            variables: variables.to_vec(),
            precision: result.metadata.precision,
            recorded_at: Utc::now(),
        };
        let hypothesis_id = hypothesis.id;
        let raw_p_value = hypothesis.raw_p_value.to_string();

        let mut session = handle.inner.lock();
        session.hypotheses.push(hypothesis);
        if matches!(session.state, SessionState::Open | SessionState::Corrected) {
            session.state = SessionState::CorrectionPending;
        }

        let uncorrected = session.uncorrected_count();
        let previous = session.alert;
        let alert = MultiplicityAlert::for_count(uncorrected, self.warning_threshold, self.escalation_threshold);
        session.alert = alert;
        drop(session);

        debug!(session_id = %handle.id, hypothesis_id = %hypothesis_id, test = %result.test_type, "hypothesis recorded");
        self.sink.emit(RegistryEvent::HypothesisRecorded {
            session_id: handle.id,
            hypothesis_id,
            test_type: result.test_type,
            raw_p_value,
            timestamp: Utc::now(),
        });

        if alert > previous {
            MULTIPLICITY_ALERTS_TOTAL.with_label_values(&[alert.as_str()]).inc();
            if alert == MultiplicityAlert::Escalated {
                error!(
                    session_id = %handle.id,
                    uncorrected = uncorrected,
                    "uncorrected hypotheses past escalation threshold; apply a multiplicity correction"
                );
            } else {
                warn!(
                    session_id = %handle.id,
                    uncorrected = uncorrected,
                    "uncorrected hypotheses accumulating; apply a multiplicity correction"
                );
            }
            self.sink.emit(RegistryEvent::MultiplicityAlert {
                session_id: handle.id,
                level: alert,
                uncorrected,
                timestamp: Utc::now(),
            });
        }

        Ok(RecordOutcome {
            hypothesis_id,
            uncorrected,
            alert,
        })
    }

    /// Recompute adjusted p-values over every hypothesis in the session
    pub fn correct(&self, handle: &SessionHandle, method: CorrectionMethod, alpha: f64) -> Result<CorrectionReport> {
        validate_alpha(alpha).map_validation_err("alpha")?;

        let mut session = handle.inner.lock();
        if session.hypotheses.is_empty() {
            return Err(EngineError::validation("session", "no hypotheses recorded; nothing to correct"));
        }

        let digits = session
            .hypotheses
            .iter()
            .map(|h| h.precision)
            .max()
            .unwrap_or(self.config.default_precision)
            .max(self.config.default_precision);
        let ctx = PrecisionContext::with_config(digits, RoundingMode::HalfEven, &self.config)?;
        let raw: Vec<_> = session
            .hypotheses
            .iter()
            .map(|h| h.raw_p_value.raw().with_prec(ctx.working_digits()))
            .collect();
        let alpha_value = ctx.value(alpha, "alpha")?;
        let adjustment = adjust(&ctx, &raw, method, &alpha_value)?;

        let mut entries = Vec::with_capacity(adjustment.adjusted.len());
        for (hypothesis, outcome) in session.hypotheses.iter_mut().zip(adjustment.adjusted) {
            let adjusted_p = PrecisionValue::new(outcome.adjusted_p, hypothesis.precision, hypothesis.raw_p_value.rounding());
            hypothesis.adjusted_p_value = Some(adjusted_p.clone());
            hypothesis.significant = Some(outcome.significant);
            entries.push(CorrectionEntry {
                hypothesis_id: hypothesis.id,
                test_type: hypothesis.test_type,
                raw_p: hypothesis.raw_p_value.clone(),
                adjusted_p,
                significant: outcome.significant,
            });
        }

        let report = CorrectionReport {
            session_id: handle.id,
            method,
            alpha,
            adjusted_alpha: ctx.present(adjustment.adjusted_alpha),
            entries,
            corrected_at: Utc::now(),
        };
        session.correction = Some(report.clone());
        session.state = SessionState::Corrected;
        session.alert = MultiplicityAlert::None;
        drop(session);

        CORRECTIONS_TOTAL.with_label_values(&[method.as_str()]).inc();
        info!(
            session_id = %handle.id,
            method = %method,
            hypotheses = report.entries.len(),
            significant = report.significant_count(),
            "multiplicity correction applied"
        );
        self.sink.emit(RegistryEvent::CorrectionApplied {
            session_id: handle.id,
            method,
            hypotheses: report.entries.len(),
            significant: report.significant_count(),
            timestamp: report.corrected_at,
        });
        Ok(report)
    }

    /// What an export attempted now would do; changes nothing
    pub fn export_status(&self, handle: &SessionHandle) -> ExportStatus {
        let session = handle.inner.lock();
        let uncorrected = session.uncorrected_count();
        ExportStatus {
            session_id: handle.id,
            state: session.state,
            hypotheses: session.hypotheses.len(),
            uncorrected,
            export_blocked: uncorrected > 0,
            reason: (uncorrected > 0).then(|| blocked_reason(uncorrected)),
        }
    }

    /// Gate an export on every hypothesis being corrected
    ///
    /// A forced export with a justification is allowed through and recorded
    /// as a policy exception on the session.
    pub fn request_export(&self, handle: &SessionHandle, intent: &ExportIntent) -> Result<ExportClearance> {
        let mut session = handle.inner.lock();
        let uncorrected = session.uncorrected_count();

        if uncorrected == 0 {
            let clearance = ExportClearance {
                session_id: handle.id,
                hypotheses: session.hypotheses.len(),
                correction_method: session.correction_method(),
                policy_exception: None,
            };
            drop(session);
            EXPORT_ATTEMPTS_TOTAL.with_label_values(&["cleared"]).inc();
            debug!(session_id = %handle.id, "export cleared");
            self.sink.emit(RegistryEvent::ExportCleared {
                session_id: handle.id,
                timestamp: Utc::now(),
            });
            return Ok(clearance);
        }

        if intent.force {
            let justification = intent.justification.as_deref().unwrap_or_default();
            validate_justification(justification).map_validation_err("justification")?;
            let exception = PolicyException {
                id: Uuid::new_v4(),
                session_id: handle.id,
                owner: session.owner.clone(),
                uncorrected,
                justification: justification.trim().to_string(),
                granted_at: Utc::now(),
            };
            session.policy_exceptions.push(exception.clone());
            let clearance = ExportClearance {
                session_id: handle.id,
                hypotheses: session.hypotheses.len(),
                correction_method: session.correction_method(),
                policy_exception: Some(exception.clone()),
            };
            drop(session);

            EXPORT_ATTEMPTS_TOTAL.with_label_values(&["forced"]).inc();
            warn!(
                session_id = %handle.id,
                exception_id = %exception.id,
                uncorrected = uncorrected,
                "export forced past uncorrected hypotheses; policy exception recorded"
            );
            self.sink.emit(RegistryEvent::ExportForced {
                session_id: handle.id,
                exception_id: exception.id,
                uncorrected,
                timestamp: exception.granted_at,
            });
            return Ok(clearance);
        }

        session.state = SessionState::ExportBlocked;
        drop(session);
        EXPORT_ATTEMPTS_TOTAL.with_label_values(&["blocked"]).inc();
        warn!(session_id = %handle.id, uncorrected = uncorrected, "{}", blocked_reason(uncorrected));
        self.sink.emit(RegistryEvent::ExportBlocked {
            session_id: handle.id,
            uncorrected,
            timestamp: Utc::now(),
        });
        Err(EngineError::CorrectionBlocked {
            uncorrected,
            available_methods: CorrectionMethod::available(),
        })
    }
}

fn blocked_reason(uncorrected: usize) -> String {
    format!("{uncorrected} hypotheses lack a multiplicity correction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestData, TestEngine, TestRequest};

    fn result(shift: f64) -> TestResult {
        let request = TestRequest::new(
            TestType::OneSampleT,
            TestData::Samples {
                groups: vec![Sample::new("x", vec![1.0 + shift, 2.0 + shift, 3.5 + shift, 4.0 + shift])],
            },
        );
        TestEngine::default().execute(TestType::OneSampleT, &request).unwrap()
    }

    fn registry(buffer: Arc<EventBuffer>) -> HypothesisRegistry {
        HypothesisRegistry::new(&EngineConfig::default(), buffer)
    }

    #[test]
    fn test_state_machine() {
        let reg = HypothesisRegistry::default();
        let session = reg.open_session("analyst").unwrap();
        assert_eq!(session.snapshot().state, SessionState::Open);

        reg.record(&session, &result(0.0), &[]).unwrap();
        assert_eq!(session.snapshot().state, SessionState::CorrectionPending);

        reg.correct(&session, CorrectionMethod::Holm, 0.05).unwrap();
        assert_eq!(session.snapshot().state, SessionState::Corrected);

        reg.record(&session, &result(1.0), &[]).unwrap();
        assert_eq!(session.snapshot().state, SessionState::CorrectionPending);
        assert!(reg.request_export(&session, &ExportIntent::default()).is_err());
        assert_eq!(session.snapshot().state, SessionState::ExportBlocked);
        assert!(session.snapshot().export_blocked());

        reg.correct(&session, CorrectionMethod::Holm, 0.05).unwrap();
        assert_eq!(session.snapshot().state, SessionState::Corrected);
    }

    #[test]
    fn test_hypotheses_carry_their_session_id() {
        let reg = HypothesisRegistry::default();
        let first = reg.open_session("analyst").unwrap();
        let second = reg.open_session("analyst").unwrap();
        reg.record(&first, &result(0.0), &[]).unwrap();
        reg.record(&second, &result(1.0), &[]).unwrap();

        assert_eq!(first.snapshot().hypotheses[0].session_id, first.id);
        assert_eq!(second.snapshot().hypotheses[0].session_id, second.id);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_export_blocked_until_corrected() {
        let reg = HypothesisRegistry::default();
        let session = reg.open_session("analyst").unwrap();
        for shift in [0.0, 0.5, 1.0] {
            reg.record(&session, &result(shift), &["x".to_string()]).unwrap();
        }
        let status = reg.export_status(&session);
        assert!(status.export_blocked);
        assert_eq!(status.uncorrected, 3);
        // status does not move the session
        assert_eq!(session.snapshot().state, SessionState::CorrectionPending);

        match reg.request_export(&session, &ExportIntent::default()) {
            Err(EngineError::CorrectionBlocked { uncorrected, available_methods }) => {
                assert_eq!(uncorrected, 3);
                assert!(available_methods.contains(&"bonferroni".to_string()));
            }
            other => panic!("expected CorrectionBlocked, got {other:?}"),
        }

        reg.correct(&session, CorrectionMethod::Bonferroni, 0.05).unwrap();
        assert!(!reg.export_status(&session).export_blocked);
        let clearance = reg.request_export(&session, &ExportIntent::default()).unwrap();
        assert!(clearance.policy_exception.is_none());
        assert_eq!(clearance.correction_method, Some(CorrectionMethod::Bonferroni));
    }

    #[test]
    fn test_correction_covers_all_hypotheses() {
        let reg = HypothesisRegistry::default();
        let session = reg.open_session("analyst").unwrap();
        reg.record(&session, &result(0.0), &[]).unwrap();
        reg.correct(&session, CorrectionMethod::Bonferroni, 0.05).unwrap();
        reg.record(&session, &result(2.0), &[]).unwrap();
        let report = reg.correct(&session, CorrectionMethod::Bonferroni, 0.05).unwrap();
        assert_eq!(report.entries.len(), 2);

        let snapshot = session.snapshot();
        let first = &snapshot.hypotheses[0];
        let doubled = (first.raw_p_value.to_f64() * 2.0).min(1.0);
        let adjusted = first.adjusted_p_value.as_ref().unwrap().to_f64();
        assert!((adjusted - doubled).abs() < 1e-12);
    }

    #[test]
    fn test_forced_export_records_policy_exception() {
        let buffer = Arc::new(EventBuffer::new(100));
        let reg = registry(buffer.clone());
        let session = reg.open_session("analyst").unwrap();
        reg.record(&session, &result(0.0), &[]).unwrap();

        let missing = reg.request_export(&session, &ExportIntent { force: true, justification: None });
        assert_eq!(missing.unwrap_err().code(), "VALIDATION_ERROR");

        let clearance = reg
            .request_export(&session, &ExportIntent::forced("pre-registered single primary endpoint"))
            .unwrap();
        let exception = clearance.policy_exception.unwrap();
        assert_eq!(exception.uncorrected, 1);
        assert_eq!(session.snapshot().policy_exceptions, vec![exception]);
        assert!(buffer
            .for_session(session.id())
            .iter()
            .any(|e| e.kind() == "export_forced"));
    }

    #[test]
    fn test_alert_thresholds() {
        let buffer = Arc::new(EventBuffer::new(100));
        let reg = registry(buffer.clone());
        let session = reg.open_session("analyst").unwrap();
        let r = result(0.0);

        let alerts: Vec<MultiplicityAlert> = (0..21).map(|_| reg.record(&session, &r, &[]).unwrap().alert).collect();
        assert_eq!(alerts[3], MultiplicityAlert::None);
        assert_eq!(alerts[4], MultiplicityAlert::Warning);
        assert_eq!(alerts[18], MultiplicityAlert::Warning);
        assert_eq!(alerts[19], MultiplicityAlert::Escalated);

        let raised = buffer
            .for_session(session.id())
            .into_iter()
            .filter(|e| e.kind() == "multiplicity_alert")
            .count();
        assert_eq!(raised, 2);

        reg.correct(&session, CorrectionMethod::BenjaminiHochberg, 0.05).unwrap();
        assert_eq!(session.snapshot().alert, MultiplicityAlert::None);
    }

    #[test]
    fn test_empty_session() {
        let reg = HypothesisRegistry::default();
        let session = reg.open_session("analyst").unwrap();
        assert!(reg.correct(&session, CorrectionMethod::Holm, 0.05).is_err());
        assert!(reg.request_export(&session, &ExportIntent::default()).is_ok());
        assert!(reg.open_session("").is_err());
    }
}
