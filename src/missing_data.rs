//! Missing-data profiling and a caller-supplied classification policy
//!
//! The profile is pure observation: how much is missing and whether the
//! missing entries cluster (a Wald–Wolfowitz runs test on the
//! missing/present indicator sequence). Turning that into an
//! MCAR/MAR/MNAR label is left to an ordered rule table supplied by the
//! caller; no cutoffs are built in, and an empty table classifies every
//! pattern as `Unclassified`.

use crate::constants::DIAGNOSTIC_PRECISION_DIGITS;
use crate::errors::{EngineError, Result};
use crate::precision::distributions::{ContinuousDistribution, Normal};
use crate::precision::PrecisionContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingnessClass {
    /// Missing completely at random
    Mcar,
    /// Missing at random given observed variables
    Mar,
    /// Missing not at random
    Mnar,
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingProfile {
    pub total: usize,
    pub missing: usize,
    pub missing_fraction: f64,
    /// Maximal runs of consecutive missing entries
    pub missing_runs: usize,
    pub longest_missing_run: usize,
    /// Runs of either kind in the indicator sequence
    pub runs: usize,
    pub expected_runs: Option<f64>,
    pub runs_z: Option<f64>,
    /// Lower-tail normal p-value of `runs_z`: small when missing entries
    /// form fewer, longer blocks than random placement would give
    pub runs_p_value: Option<f64>,
}

/// Profile a column; `None` and NaN both count as missing
pub fn profile_missing(values: &[Option<f64>]) -> Result<MissingProfile> {
    let indicator: Vec<bool> = values.iter().map(|v| v.map_or(true, f64::is_nan)).collect();
    let total = indicator.len();
    let missing = indicator.iter().filter(|&&m| m).count();
    let present = total - missing;

    let mut runs = 0;
    let mut missing_runs = 0;
    let mut longest = 0;
    let mut current = 0;
    for (i, &m) in indicator.iter().enumerate() {
        if i == 0 || indicator[i - 1] != m {
            runs += 1;
            if m {
                missing_runs += 1;
            }
        }
        if m {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }

    let (expected_runs, runs_z, runs_p_value) = runs_test(missing, present, runs)?;
    Ok(MissingProfile {
        total,
        missing,
        missing_fraction: if total == 0 { 0.0 } else { missing as f64 / total as f64 },
        missing_runs,
        longest_missing_run: longest,
        runs,
        expected_runs,
        runs_z,
        runs_p_value,
    })
}

type RunsTest = (Option<f64>, Option<f64>, Option<f64>);

fn runs_test(n1: usize, n2: usize, runs: usize) -> Result<RunsTest> {
    if n1 == 0 || n2 == 0 {
        return Ok((None, None, None));
    }
    let (a, b) = (n1 as f64, n2 as f64);
    let n = a + b;
    let expected = 2.0 * a * b / n + 1.0;
    let variance = 2.0 * a * b * (2.0 * a * b - n) / (n * n * (n - 1.0));
    if variance <= 0.0 {
        return Ok((Some(expected), None, None));
    }
    let z = (runs as f64 - expected) / variance.sqrt();

    let ctx = PrecisionContext::internal(DIAGNOSTIC_PRECISION_DIGITS);
    let p = Normal::standard(&ctx)?.cdf(&ctx.value(z, "runs_z")?)?.to_f64();
    Ok((Some(expected), Some(z), Some(p)))
}

/// One row of the policy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule applies when the missing fraction is at most this
    pub max_missing_fraction: f64,
    /// `Some(true)`: only when missingness clusters; `Some(false)`: only when
    /// it does not; `None`: either
    #[serde(default)]
    pub requires_pattern_dependence: Option<bool>,
    pub classification: MissingnessClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingDataPolicy {
    pub rules: Vec<PolicyRule>,
    /// Runs-test level below which missingness counts as clustered
    #[serde(default = "default_dependence_alpha")]
    pub dependence_alpha: f64,
}

fn default_dependence_alpha() -> f64 {
    crate::constants::DEFAULT_ASSUMPTION_ALPHA
}

impl Default for MissingDataPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            dependence_alpha: default_dependence_alpha(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub class: MissingnessClass,
    /// Index of the first matching rule
    pub rule: Option<usize>,
    pub pattern_dependent: bool,
}

impl MissingDataPolicy {
    pub fn new(rules: Vec<PolicyRule>, dependence_alpha: f64) -> Result<Self> {
        if !(dependence_alpha > 0.0 && dependence_alpha < 1.0) {
            return Err(EngineError::validation("dependence_alpha", "must lie strictly between 0 and 1"));
        }
        for (i, rule) in rules.iter().enumerate() {
            if !(0.0..=1.0).contains(&rule.max_missing_fraction) {
                return Err(EngineError::validation(
                    "rules",
                    format!("rule {i}: max_missing_fraction must lie in [0, 1]"),
                ));
            }
        }
        Ok(Self { rules, dependence_alpha })
    }

    /// First rule that matches the profile wins
    pub fn classify(&self, profile: &MissingProfile) -> Classification {
        let pattern_dependent = profile
            .runs_p_value
            .is_some_and(|p| p < self.dependence_alpha);
        let matched = self.rules.iter().position(|rule| {
            profile.missing_fraction <= rule.max_missing_fraction
                && rule
                    .requires_pattern_dependence
                    .map_or(true, |required| required == pattern_dependent)
        });
        Classification {
            class: matched.map_or(MissingnessClass::Unclassified, |i| self.rules[i].classification),
            rule: matched,
            pattern_dependent,
        }
    }
}
