//! Test Recommender
//!
//! Decision procedure over assumption-check output: confirm the requested
//! test, confirm it with an asymptotic caveat, or switch to its robust
//! counterpart.

use crate::assumptions::NORMALITY;
use crate::engine::{AssumptionCheck, TestType};
use serde::{Deserialize, Serialize};

/// Robust or rank-based counterpart of every test
///
/// Already-robust tests map to themselves.
pub fn robust_counterpart(test_type: TestType) -> TestType {
    match test_type {
        TestType::OneSampleT | TestType::PairedT => TestType::WilcoxonSignedRank,
        TestType::TwoSampleT | TestType::WelchT => TestType::MannWhitneyU,
        TestType::OneWayAnova => TestType::KruskalWallis,
        TestType::VarianceRatioF => TestType::BrownForsythe,
        TestType::ChiSquareGoodnessOfFit => TestType::ExactMultinomial,
        TestType::ChiSquareIndependence => TestType::FisherExact,
        TestType::Pearson => TestType::Spearman,
        TestType::LinearRegression => TestType::TheilSen,
        TestType::BrownForsythe
        | TestType::BinomialExact
        | TestType::FisherExact
        | TestType::ExactMultinomial
        | TestType::MannWhitneyU
        | TestType::WilcoxonSignedRank
        | TestType::KruskalWallis
        | TestType::Spearman
        | TestType::TheilSen => test_type,
    }
}

/// How the requested test was treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Confirmed,
    ConfirmedWithCaveat,
    Switched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub requested_test: TestType,
    pub confirmed_test: TestType,
    pub switched: bool,
    pub decision: Decision,
    pub reason: String,
}

impl Recommendation {
    fn confirm(test_type: TestType, decision: Decision, reason: String) -> Self {
        Self {
            requested_test: test_type,
            confirmed_test: test_type,
            switched: false,
            decision,
            reason,
        }
    }
}

/// Select the test to run given its assumption checks
///
/// `asymptotic_threshold` is the smallest per-group sample size at which a
/// normality failure alone is excused.
pub fn recommend(
    test_type: TestType,
    checks: &[AssumptionCheck],
    sample_sizes: &[u64],
    asymptotic_threshold: usize,
) -> Recommendation {
    let failed: Vec<&AssumptionCheck> = checks.iter().filter(|c| !c.met).collect();
    if failed.is_empty() {
        return Recommendation::confirm(
            test_type,
            Decision::Confirmed,
            "all assumptions met".to_string(),
        );
    }

    let names = failure_summary(&failed);
    let smallest = sample_sizes.iter().copied().min().unwrap_or(0);
    let only_normality = failed.iter().all(|c| c.name == NORMALITY);
    // "too few" normality failures are never excused by sample size
    let assessed = failed.iter().all(|c| c.p_value.is_some());
    if only_normality && assessed && smallest >= asymptotic_threshold as u64 {
        return Recommendation::confirm(
            test_type,
            Decision::ConfirmedWithCaveat,
            format!(
                "{names} rejected, but every group has at least {asymptotic_threshold} observations; \
                 relying on asymptotic validity"
            ),
        );
    }

    let fallback = robust_counterpart(test_type);
    if fallback == test_type {
        return Recommendation::confirm(
            test_type,
            Decision::ConfirmedWithCaveat,
            format!("{names} not met; {test_type} is already the robust choice"),
        );
    }

    Recommendation {
        requested_test: test_type,
        confirmed_test: fallback,
        switched: true,
        decision: Decision::Switched,
        reason: format!("{names} not met; switched from {test_type} to {fallback}"),
    }
}

fn failure_summary(failed: &[&AssumptionCheck]) -> String {
    let mut names: Vec<&str> = failed.iter().map(|c| c.name.as_str()).collect();
    names.dedup();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions::{EXPECTED_FREQUENCY, HOMOGENEITY};
    use crate::precision::{Decimal, PrecisionValue, RoundingMode};

    fn failed_normality() -> AssumptionCheck {
        AssumptionCheck {
            p_value: Some(PrecisionValue::new(
                Decimal::parse("0.001", 4).unwrap(),
                4,
                RoundingMode::HalfEven,
            )),
            ..AssumptionCheck::structural(NORMALITY, false, "group a: shapiro-wilk")
        }
    }

    #[test]
    fn test_every_type_has_a_fallback() {
        for t in TestType::ALL {
            let fallback = robust_counterpart(t);
            // fallbacks are fixed points
            assert_eq!(robust_counterpart(fallback), fallback);
        }
    }

    #[test]
    fn test_all_met_confirms() {
        let checks = vec![AssumptionCheck::structural(NORMALITY, true, "ok")];
        let rec = recommend(TestType::TwoSampleT, &checks, &[5, 5], 30);
        assert_eq!(rec.decision, Decision::Confirmed);
        assert!(!rec.switched);
    }

    #[test]
    fn test_normality_failure_switches_small_samples() {
        let rec = recommend(TestType::TwoSampleT, &[failed_normality()], &[5, 5], 30);
        assert!(rec.switched);
        assert_eq!(rec.confirmed_test, TestType::MannWhitneyU);
        assert!(rec.reason.contains("normality"));
    }

    #[test]
    fn test_large_samples_confirm_with_caveat() {
        let rec = recommend(TestType::OneWayAnova, &[failed_normality()], &[40, 35, 31], 30);
        assert_eq!(rec.decision, Decision::ConfirmedWithCaveat);
        assert_eq!(rec.confirmed_test, TestType::OneWayAnova);
    }

    #[test]
    fn test_homogeneity_failure_not_excused_by_size() {
        let checks = vec![
            failed_normality(),
            AssumptionCheck::structural(HOMOGENEITY, false, "brown-forsythe"),
        ];
        let rec = recommend(TestType::OneWayAnova, &checks, &[100, 100], 30);
        assert_eq!(rec.confirmed_test, TestType::KruskalWallis);
    }

    #[test]
    fn test_sparse_table_goes_exact() {
        let checks = vec![AssumptionCheck::structural(EXPECTED_FREQUENCY, false, "smallest 2")];
        let rec = recommend(TestType::ChiSquareIndependence, &checks, &[8], 30);
        assert_eq!(rec.confirmed_test, TestType::FisherExact);
    }
}
