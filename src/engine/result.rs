//! Test results and their annotation blocks

use super::request::TestType;
use crate::constants::{ALGORITHM_TAG, ENGINE_VERSION};
use crate::precision::PrecisionValue;
use serde::{Deserialize, Serialize};

/// Degrees of freedom: one value for t/χ², a pair for F
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DegreesOfFreedom {
    Scalar(PrecisionValue),
    Pair(PrecisionValue, PrecisionValue),
}

/// Confidence interval around a point estimate
///
/// A missing bound is unbounded (one-sided intervals). `degenerate` marks
/// intervals whose bounds coincide or that were produced from a boundary
/// estimate; ordering is only guaranteed when it is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// What the interval covers (e.g. "mean difference", "odds ratio")
    pub parameter: String,
    pub estimate: PrecisionValue,
    pub lower: Option<PrecisionValue>,
    pub upper: Option<PrecisionValue>,
    /// Confidence level, 1 - alpha
    pub level: f64,
    #[serde(default)]
    pub degenerate: bool,
}

/// Conventional magnitude of an effect size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for EffectMagnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Negligible => write!(f, "negligible"),
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// Standardized effect measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSize {
    /// Measure name (e.g. "cohens_d", "cramers_v")
    pub measure: String,
    pub value: PrecisionValue,
    pub magnitude: EffectMagnitude,
}

/// Observed power and, when a target was given, the required sample size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerAnalysis {
    pub method: String,
    pub observed_power: PrecisionValue,
    pub alpha: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_power: Option<f64>,
    /// Per-group sample size reaching `target_power` at the observed effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_sample_size: Option<u64>,
}

/// Outcome of one diagnostic sub-test
///
/// A failed check (`met == false`) is an assumption violation: data for the
/// recommender and the caller, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumptionCheck {
    pub name: String,
    pub met: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistic: Option<PrecisionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<PrecisionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl AssumptionCheck {
    /// Structural check with no underlying statistic
    pub fn structural(name: &str, met: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            met,
            statistic: None,
            p_value: None,
            threshold: None,
            detail: detail.into(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, remediation: &str) -> Self {
        self.remediation = Some(remediation.to_string());
        self
    }
}

/// Precision block reported with every result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionMetadata {
    pub precision: u32,
    pub algorithm: String,
    pub version: String,
}

impl PrecisionMetadata {
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            algorithm: ALGORITHM_TAG.to_string(),
            version: ENGINE_VERSION.to_string(),
        }
    }
}

/// Complete result of one test request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test actually executed
    pub test_type: TestType,
    /// Test named in the request; differs from `test_type` after a switch
    pub requested_test: TestType,
    pub switched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,

    pub statistic_name: String,
    pub statistic: PrecisionValue,
    pub p_value: PrecisionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrees_of_freedom: Option<DegreesOfFreedom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<ConfidenceInterval>,
    /// How the p-value was obtained (e.g. "exact", "normal approximation")
    pub method: String,
    pub sample_sizes: Vec<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_size: Option<EffectSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerAnalysis>,
    #[serde(default)]
    pub assumptions: Vec<AssumptionCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,

    pub cache_hit: bool,
    pub metadata: PrecisionMetadata,
}

impl TestResult {
    /// Failed assumption checks
    pub fn violations(&self) -> impl Iterator<Item = &AssumptionCheck> {
        self.assumptions.iter().filter(|c| !c.met)
    }

    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value.to_f64() <= alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::{PrecisionContext, RoundingMode};

    #[test]
    fn test_degrees_of_freedom_serialize_untagged() {
        let ctx = PrecisionContext::new(6, RoundingMode::HalfEven).unwrap();
        let scalar = DegreesOfFreedom::Scalar(ctx.present(ctx.int(8)));
        let pair = DegreesOfFreedom::Pair(ctx.present(ctx.int(2)), ctx.present(ctx.int(27)));
        assert_eq!(serde_json::to_string(&scalar).unwrap(), "\"8\"");
        assert_eq!(serde_json::to_string(&pair).unwrap(), "[\"2\",\"27\"]");
        let back: DegreesOfFreedom = serde_json::from_str("[\"2\",\"27\"]").unwrap();
        assert_eq!(back, pair);
    }

    #[test]
    fn test_metadata_carries_engine_identity() {
        let meta = PrecisionMetadata::new(10);
        assert_eq!(meta.algorithm, "high_precision_decimal");
        assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
    }
}
