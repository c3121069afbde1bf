//! Reproducibility bundles
//!
//! A bundle is a self-describing record of an analysis: every request with
//! its cache key and result, the session's hypotheses and latest correction,
//! policy exceptions granted on export, and the precision settings used.
//! A SHA-256 checksum over the canonical JSON of everything except the
//! checksum itself lets a reader detect tampering or truncation.

use crate::cache::key::write_canonical;
use crate::cache::CacheKey;
use crate::config::EngineConfig;
use crate::constants::{ALGORITHM_TAG, ENGINE_VERSION};
use crate::engine::{TestRequest, TestResult};
use crate::errors::{EngineError, Result};
use crate::precision::{PrecisionContext, RoundingMode};
use crate::registry::{CorrectionReport, ExportIntent, Hypothesis, HypothesisRegistry, PolicyException, SessionHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub const BUNDLE_FORMAT_VERSION: &str = "1.0";

/// Digits used when numbers are normalized for the checksum
const CHECKSUM_FLOAT_DIGITS: usize = 17;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleGenerator {
    pub name: String,
    pub version: String,
    pub algorithm: String,
}

impl Default for BundleGenerator {
    fn default() -> Self {
        Self {
            name: "statcore".to_string(),
            version: ENGINE_VERSION.to_string(),
            algorithm: ALGORITHM_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub cache_key: String,
    pub request: TestRequest,
    pub result: TestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub owner: String,
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<CorrectionReport>,
    #[serde(default)]
    pub policy_exceptions: Vec<PolicyException>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityBundle {
    pub bundle_version: String,
    pub id: Uuid,
    pub generator: BundleGenerator,
    /// Defaults in force when the bundle was assembled
    pub precision: PrecisionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRecord>,
    pub entries: Vec<BundleEntry>,
    /// Always `None` unless supplied; every routine is deterministic
    pub seed: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// `sha256:<hex>` over the canonical JSON of every other field
    pub checksum: String,
}

impl ReproducibilityBundle {
    /// Recompute the checksum and compare
    pub fn verify(&self) -> Result<bool> {
        Ok(content_checksum(self)? == self.checksum)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("failed to write bundle {}: {e}", path.display())))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("failed to read bundle {}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

pub struct BundleBuilder {
    config: EngineConfig,
    session: Option<SessionRecord>,
    entries: Vec<BundleEntry>,
    seed: Option<u64>,
}

impl BundleBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            session: None,
            entries: Vec::new(),
            seed: None,
        }
    }

    /// Attach a session, passing the registry's export gate first
    ///
    /// Fails with `CorrectionBlocked` when the session has uncorrected
    /// hypotheses and the intent is not forced. A forced export's policy
    /// exception is part of the captured session.
    pub fn with_session(
        mut self,
        registry: &HypothesisRegistry,
        handle: &SessionHandle,
        intent: &ExportIntent,
    ) -> Result<Self> {
        registry.request_export(handle, intent)?;
        let snapshot = handle.snapshot();
        self.session = Some(SessionRecord {
            session_id: snapshot.id,
            owner: snapshot.owner,
            hypotheses: snapshot.hypotheses,
            correction: snapshot.correction,
            policy_exceptions: snapshot.policy_exceptions,
        });
        Ok(self)
    }

    pub fn add_entry(&mut self, request: &TestRequest, result: &TestResult) -> Result<()> {
        let key = CacheKey::derive(request, self.config.cache_key_digits, self.config.default_precision)?;
        self.entries.push(BundleEntry {
            cache_key: key.as_str().to_string(),
            request: request.clone(),
            result: result.clone(),
        });
        Ok(())
    }

    pub fn entry(mut self, request: &TestRequest, result: &TestResult) -> Result<Self> {
        self.add_entry(request, result)?;
        Ok(self)
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<ReproducibilityBundle> {
        let precision = PrecisionContext::with_config(self.config.default_precision, RoundingMode::HalfEven, &self.config)?;
        let mut bundle = ReproducibilityBundle {
            bundle_version: BUNDLE_FORMAT_VERSION.to_string(),
            id: Uuid::new_v4(),
            generator: BundleGenerator::default(),
            precision,
            session: self.session,
            entries: self.entries,
            seed: self.seed,
            created_at: Utc::now(),
            checksum: String::new(),
        };
        bundle.checksum = content_checksum(&bundle)?;
        info!(
            bundle_id = %bundle.id,
            entries = bundle.entries.len(),
            session = ?bundle.session.as_ref().map(|s| s.session_id),
            "reproducibility bundle assembled"
        );
        Ok(bundle)
    }
}

fn content_checksum(bundle: &ReproducibilityBundle) -> Result<String> {
    let mut value = serde_json::to_value(bundle)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.remove("checksum");
    }
    let mut canonical = String::new();
    write_canonical(&value, CHECKSUM_FLOAT_DIGITS, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestData, TestEngine, TestType};
    use crate::registry::CorrectionMethod;

    fn request() -> TestRequest {
        TestRequest::new(
            TestType::WelchT,
            TestData::Samples {
                groups: vec![
                    Sample::new("control", vec![4.1, 3.9, 4.4, 4.0, 4.2]),
                    Sample::new("treated", vec![4.8, 5.1, 4.6, 5.3, 4.9]),
                ],
            },
        )
    }

    fn run(request: &TestRequest) -> TestResult {
        TestEngine::default().execute(request.test_type, request).unwrap()
    }

    #[test]
    fn test_bundle_verifies_and_detects_tampering() {
        let req = request();
        let bundle = BundleBuilder::new(&EngineConfig::default())
            .entry(&req, &run(&req))
            .unwrap()
            .build()
            .unwrap();
        assert!(bundle.checksum.starts_with("sha256:"));
        assert!(bundle.verify().unwrap());
        assert_eq!(bundle.seed, None);

        let mut tampered = bundle.clone();
        tampered.entries[0].request.alpha = 0.01;
        assert!(!tampered.verify().unwrap());
    }

    #[test]
    fn test_bundle_survives_json_roundtrip() {
        let req = request();
        let bundle = BundleBuilder::new(&EngineConfig::default())
            .entry(&req, &run(&req))
            .unwrap()
            .seed(7)
            .build()
            .unwrap();
        let restored = ReproducibilityBundle::from_json(&bundle.to_json_pretty().unwrap()).unwrap();
        assert!(restored.verify().unwrap());
        assert_eq!(restored.seed, Some(7));
    }

    #[test]
    fn test_session_gate_applies() {
        let registry = HypothesisRegistry::default();
        let session = registry.open_session("analyst").unwrap();
        let req = request();
        registry.record(&session, &run(&req), &[]).unwrap();

        let blocked = BundleBuilder::new(&EngineConfig::default()).with_session(&registry, &session, &ExportIntent::default());
        assert_eq!(blocked.err().map(|e| e.code()), Some("CORRECTION_BLOCKED"));

        let forced = BundleBuilder::new(&EngineConfig::default())
            .with_session(&registry, &session, &ExportIntent::forced("exploratory run, shared internally"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(forced.session.as_ref().unwrap().policy_exceptions.len(), 1);

        registry.correct(&session, CorrectionMethod::Holm, 0.05).unwrap();
        let bundle = BundleBuilder::new(&EngineConfig::default())
            .with_session(&registry, &session, &ExportIntent::default())
            .unwrap()
            .build()
            .unwrap();
        let record = bundle.session.unwrap();
        assert!(record.hypotheses.iter().all(|h| h.adjusted_p_value.is_some()));
        assert_eq!(record.correction.unwrap().method, CorrectionMethod::Holm);
    }
}
