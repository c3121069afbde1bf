//! Assumption Checker
//!
//! Diagnostic sub-tests run against the same input data as the requested
//! test: Shapiro-Wilk normality (Royston's approximation), Brown-Forsythe
//! homogeneity of variance, structural independence of the grouping and
//! minimum expected cell counts. A failed check is data, never an error.
//!
//! Diagnostics run at a fixed moderate precision; their p-values only feed
//! a pass/fail decision against the threshold.

use crate::config::EngineConfig;
use crate::constants::{DIAGNOSTIC_PRECISION_DIGITS, SHAPIRO_WILK_MAX_N, SHAPIRO_WILK_MIN_N};
use crate::engine::categorical::expected_counts;
use crate::engine::regression::LinearFit;
use crate::engine::variance::brown_forsythe_table;
use crate::engine::{AssumptionCheck, TestData, TestRequest, TestType};
use crate::errors::Result;
use crate::precision::distributions::{approx_normal_quantile, ContinuousDistribution, FisherF, Normal};
use crate::precision::functions::{asin, pi, sqrt};
use crate::precision::{Decimal, PrecisionContext, RoundingMode};
use std::collections::HashSet;
use tracing::debug;

pub const NORMALITY: &str = "normality";
pub const HOMOGENEITY: &str = "homogeneity_of_variance";
pub const INDEPENDENCE: &str = "independence";
pub const EXPECTED_FREQUENCY: &str = "expected_frequency";

const SWITCH_TO_RANKS: &str = "switch to rank-based test";
const USE_EXACT_TEST: &str = "use exact test";

// Royston (1995) polynomial coefficients
const SW_C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.07119, 4.434685, -2.706056];
const SW_C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const SW_C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
const SW_C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const SW_C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const SW_C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const SW_G: [f64; 2] = [-2.273, 0.459];

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

// =============================================================================
// SHAPIRO-WILK
// =============================================================================

/// Shapiro-Wilk W and its p-value
#[derive(Debug, Clone)]
pub struct ShapiroWilk {
    pub w: Decimal,
    pub p_value: Decimal,
}

/// Royston's coefficients a_1..a_{n/2} for the lower half of the sample
fn royston_coefficients(n: usize) -> Vec<f64> {
    let half = n / 2;
    if n == 3 {
        return vec![std::f64::consts::FRAC_1_SQRT_2];
    }
    let an25 = n as f64 + 0.25;
    let m: Vec<f64> = (1..=half)
        .map(|i| approx_normal_quantile((i as f64 - 0.375) / an25))
        .collect();
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / (n as f64).sqrt();
    let a1 = poly(&SW_C1, rsn) - m[0] / ssumm2;

    let mut a = vec![0.0; half];
    a[0] = a1;
    let (first_free, fac) = if n > 5 {
        let a2 = -m[1] / ssumm2 + poly(&SW_C2, rsn);
        a[1] = a2;
        let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
            / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
            .sqrt();
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
        (1, fac)
    };
    for i in first_free..half {
        a[i] = -m[i] / fac;
    }
    a
}

/// Shapiro-Wilk test for 3 <= n <= 5000; `None` when the sample is constant
pub fn shapiro_wilk(ctx: &PrecisionContext, values: &[Decimal]) -> Result<Option<ShapiroWilk>> {
    let n = values.len();
    let mut sorted = values.to_vec();
    sorted.sort();
    let ssq = crate::engine::sum_sq_dev(ctx, &sorted);
    if !ssq.is_positive() {
        return Ok(None);
    }

    let coefficients = royston_coefficients(n);
    let mut numerator = ctx.int(0);
    for (i, a) in coefficients.iter().enumerate() {
        let a = ctx.value(*a, "coefficient")?;
        let spread = &sorted[n - 1 - i] - &sorted[i];
        numerator = &numerator + &(&a * &spread);
    }
    let one = ctx.int(1);
    let w = (&(&numerator * &numerator) / &ssq).min(one.clone());

    let p_value = if n == 3 {
        // exact null distribution: (6/pi) (asin(sqrt W) - pi/3)
        let pi = pi(ctx);
        let angle = &asin(ctx, &sqrt(ctx, &w)?)? - &(&pi / &ctx.int(3));
        (&(&ctx.int(6) / &pi) * &angle).max(ctx.int(0))
    } else if !(&one - &w).is_positive() {
        one
    } else {
        let w1 = (&one - &w).to_f64();
        let nf = n as f64;
        let y = w1.ln();
        let (z, m, s) = if n <= 11 {
            let gamma = poly(&SW_G, nf);
            if y >= gamma {
                // W far below the null range
                return Ok(Some(ShapiroWilk {
                    w,
                    p_value: ctx.epsilon(99),
                }));
            }
            (-(gamma - y).ln(), poly(&SW_C3, nf), poly(&SW_C4, nf).exp())
        } else {
            let ln_n = nf.ln();
            (y, poly(&SW_C5, ln_n), poly(&SW_C6, ln_n).exp())
        };
        let standardized = ctx.value((z - m) / s, "shapiro-wilk z")?;
        Normal::standard(ctx)?.sf(&standardized)?
    };
    Ok(Some(ShapiroWilk { w, p_value }))
}

// =============================================================================
// CHECKER
// =============================================================================

/// Runs the diagnostics that apply to a test type
#[derive(Debug, Clone, Default)]
pub struct AssumptionChecker {
    config: EngineConfig,
}

impl AssumptionChecker {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Threshold for diagnostic p-values: request option, then configuration
    pub fn threshold(&self, request: &TestRequest) -> Result<f64> {
        Ok(request
            .option_f64("assumption_alpha")?
            .filter(|a| *a > 0.0 && *a < 1.0)
            .unwrap_or(self.config.assumption_alpha))
    }

    pub fn check(&self, test_type: TestType, request: &TestRequest) -> Result<Vec<AssumptionCheck>> {
        let ctx = PrecisionContext::with_config(DIAGNOSTIC_PRECISION_DIGITS, RoundingMode::HalfEven, &self.config)?;
        let threshold = self.threshold(request)?;
        let data = &request.data;
        let mut checks = Vec::new();

        match test_type {
            TestType::OneSampleT => {
                checks.extend(self.normality_of_groups(&ctx, data, threshold)?);
            }
            TestType::PairedT => {
                checks.push(paired_structure(data));
                if let TestData::Paired { first, second } = data {
                    let diffs: Vec<f64> = first.iter().zip(second).map(|(a, b)| a - b).collect();
                    checks.push(self.normality(&ctx, "differences", &diffs, threshold)?);
                }
            }
            TestType::TwoSampleT | TestType::OneWayAnova => {
                checks.push(group_independence(data));
                checks.extend(self.normality_of_groups(&ctx, data, threshold)?);
                if let Some(check) = self.homogeneity(&ctx, data, threshold)? {
                    checks.push(check);
                }
            }
            TestType::WelchT | TestType::VarianceRatioF => {
                checks.push(group_independence(data));
                checks.extend(self.normality_of_groups(&ctx, data, threshold)?);
            }
            TestType::BrownForsythe | TestType::MannWhitneyU | TestType::KruskalWallis => {
                checks.push(group_independence(data));
            }
            TestType::WilcoxonSignedRank => {
                if matches!(data, TestData::Paired { .. }) {
                    checks.push(paired_structure(data));
                }
            }
            TestType::ChiSquareGoodnessOfFit | TestType::ChiSquareIndependence => {
                checks.push(self.expected_frequency(&ctx, data)?);
            }
            TestType::Pearson => {
                if let TestData::Bivariate { x, y } = data {
                    checks.push(self.normality(&ctx, "x", x, threshold)?);
                    checks.push(self.normality(&ctx, "y", y, threshold)?);
                }
            }
            TestType::LinearRegression => {
                if let TestData::Bivariate { x, y } = data {
                    checks.push(self.residual_normality(&ctx, x, y, threshold)?);
                }
            }
            TestType::BinomialExact
            | TestType::FisherExact
            | TestType::ExactMultinomial
            | TestType::Spearman
            | TestType::TheilSen => {}
        }

        debug!(
            test = %test_type,
            checks = checks.len(),
            violations = checks.iter().filter(|c| !c.met).count(),
            "assumptions checked"
        );
        Ok(checks)
    }

    fn normality(&self, ctx: &PrecisionContext, label: &str, values: &[f64], threshold: f64) -> Result<AssumptionCheck> {
        let n = values.len();
        if n < SHAPIRO_WILK_MIN_N {
            return Ok(AssumptionCheck::structural(
                NORMALITY,
                false,
                format!("{label}: {n} observations are too few to assess normality"),
            )
            .with_remediation(SWITCH_TO_RANKS));
        }
        if n > SHAPIRO_WILK_MAX_N {
            return Ok(AssumptionCheck::structural(
                NORMALITY,
                true,
                format!("{label}: not assessed above {SHAPIRO_WILK_MAX_N} observations"),
            ));
        }
        let decimals = ctx.values(values, label)?;
        let Some(sw) = shapiro_wilk(ctx, &decimals)? else {
            return Ok(AssumptionCheck::structural(
                NORMALITY,
                false,
                format!("{label}: constant sample"),
            )
            .with_remediation(SWITCH_TO_RANKS));
        };
        let met = sw.p_value.to_f64() > threshold;
        let mut check = AssumptionCheck {
            name: NORMALITY.to_string(),
            met,
            statistic: Some(ctx.present(sw.w)),
            p_value: Some(ctx.present(sw.p_value)),
            threshold: Some(threshold),
            detail: format!("{label}: shapiro-wilk"),
            remediation: None,
        };
        if !met {
            check = check.with_remediation(SWITCH_TO_RANKS);
        }
        Ok(check)
    }

    fn normality_of_groups(&self, ctx: &PrecisionContext, data: &TestData, threshold: f64) -> Result<Vec<AssumptionCheck>> {
        match data {
            TestData::Samples { groups } => groups
                .iter()
                .enumerate()
                .map(|(i, g)| {
                    let label = if g.label.is_empty() { format!("group{}", i + 1) } else { g.label.clone() };
                    self.normality(ctx, &label, &g.values, threshold)
                })
                .collect(),
            TestData::Summary { .. } => Ok(vec![AssumptionCheck::structural(
                NORMALITY,
                true,
                "not assessed: only summary statistics were supplied",
            )]),
            _ => Ok(Vec::new()),
        }
    }

    fn residual_normality(&self, ctx: &PrecisionContext, x: &[f64], y: &[f64], threshold: f64) -> Result<AssumptionCheck> {
        let xs = ctx.values(x, "x")?;
        let ys = ctx.values(y, "y")?;
        let fit = match LinearFit::fit(ctx, &xs, &ys) {
            Ok(fit) => fit,
            Err(_) => {
                return Ok(AssumptionCheck::structural(NORMALITY, false, "residuals: predictor is constant"))
            }
        };
        let residuals: Vec<f64> = fit.residuals(&xs, &ys).iter().map(Decimal::to_f64).collect();
        self.normality(ctx, "residuals", &residuals, threshold)
    }

    fn homogeneity(&self, ctx: &PrecisionContext, data: &TestData, threshold: f64) -> Result<Option<AssumptionCheck>> {
        let TestData::Samples { groups } = data else {
            return Ok(Some(AssumptionCheck::structural(
                HOMOGENEITY,
                true,
                "not assessed: raw observations are required",
            )));
        };
        if groups.len() < 2 || groups.iter().any(|g| g.values.len() < 2) {
            return Ok(None);
        }
        let decimals = groups
            .iter()
            .map(|g| ctx.values(&g.values, "values"))
            .collect::<Result<Vec<_>>>()?;
        let Ok(table) = brown_forsythe_table(ctx, &decimals) else {
            // every group constant around its median
            return Ok(Some(AssumptionCheck::structural(HOMOGENEITY, true, "no spread within groups")));
        };
        let dist = FisherF::new(ctx, ctx.uint(table.df_between), ctx.uint(table.df_within))?;
        let p_value = dist.sf(&table.f)?;
        let met = p_value.to_f64() > threshold;
        let mut check = AssumptionCheck {
            name: HOMOGENEITY.to_string(),
            met,
            statistic: Some(ctx.present(table.f)),
            p_value: Some(ctx.present(p_value)),
            threshold: Some(threshold),
            detail: "brown-forsythe".to_string(),
            remediation: None,
        };
        if !met {
            check = check.with_remediation(SWITCH_TO_RANKS);
        }
        Ok(Some(check))
    }

    fn expected_frequency(&self, ctx: &PrecisionContext, data: &TestData) -> Result<AssumptionCheck> {
        let minimum = self.config.min_expected_frequency;
        let smallest = match data {
            TestData::Frequencies { observed, expected } => {
                let total: u64 = observed.iter().sum();
                let weights = expected.clone().unwrap_or_else(|| vec![1.0; observed.len()]);
                let weight_sum: f64 = weights.iter().sum();
                weights
                    .iter()
                    .map(|w| w / weight_sum * total as f64)
                    .fold(f64::INFINITY, f64::min)
            }
            TestData::Contingency { table } if !table.is_empty() && !table[0].is_empty() => {
                expected_counts(ctx, table)
                    .iter()
                    .flatten()
                    .map(Decimal::to_f64)
                    .fold(f64::INFINITY, f64::min)
            }
            _ => return Ok(AssumptionCheck::structural(EXPECTED_FREQUENCY, true, "not applicable")),
        };
        let met = smallest >= minimum;
        let mut check = AssumptionCheck {
            threshold: Some(minimum),
            ..AssumptionCheck::structural(
                EXPECTED_FREQUENCY,
                met,
                format!("smallest expected count {smallest:.3}"),
            )
        };
        if !met {
            check = check.with_remediation(USE_EXACT_TEST);
        }
        Ok(check)
    }
}

/// Independent-group tests need at least two distinctly labelled groups
fn group_independence(data: &TestData) -> AssumptionCheck {
    let labels: Vec<&str> = match data {
        TestData::Samples { groups } => groups.iter().map(|g| g.label.as_str()).collect(),
        TestData::Summary { groups } => groups.iter().map(|g| g.label.as_str()).collect(),
        _ => Vec::new(),
    };
    let distinct: HashSet<&str> = labels.iter().copied().filter(|l| !l.is_empty()).collect();
    let unlabeled = labels.iter().filter(|l| l.is_empty()).count();
    let met = labels.len() >= 2 && distinct.len() + unlabeled == labels.len();
    let detail = if met {
        format!("{} independent groups", labels.len())
    } else {
        "groups must be at least two and distinctly labelled".to_string()
    };
    AssumptionCheck::structural(INDEPENDENCE, met, detail)
}

fn paired_structure(data: &TestData) -> AssumptionCheck {
    match data {
        TestData::Paired { first, second } if first.len() == second.len() => {
            AssumptionCheck::structural(INDEPENDENCE, true, format!("{} matched pairs", first.len()))
        }
        TestData::Paired { .. } => AssumptionCheck::structural(INDEPENDENCE, false, "pairs differ in length"),
        _ => AssumptionCheck::structural(INDEPENDENCE, true, "single sample of differences"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Sample;

    fn ctx() -> PrecisionContext {
        PrecisionContext::new(DIAGNOSTIC_PRECISION_DIGITS, RoundingMode::HalfEven).unwrap()
    }

    fn decimals(values: &[f64]) -> Vec<Decimal> {
        let c = ctx();
        c.values(values, "x").unwrap()
    }

    #[test]
    fn test_shapiro_wilk_n3_exact() {
        // equally spaced triple: W = 1, p = 1
        let sw = shapiro_wilk(&ctx(), &decimals(&[1.0, 2.0, 3.0])).unwrap().unwrap();
        assert!((sw.w.to_f64() - 1.0).abs() < 1e-12);
        assert!((sw.p_value.to_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shapiro_wilk_small_sample_reference() {
        // R: shapiro.test(c(2.1, 3.4, 1.9, 5.6, 4.4, 3.3, 2.8, 4.0, 3.9, 6.1))
        let values = [2.1, 3.4, 1.9, 5.6, 4.4, 3.3, 2.8, 4.0, 3.9, 6.1];
        let sw = shapiro_wilk(&ctx(), &decimals(&values)).unwrap().unwrap();
        assert!(sw.w.to_f64() > 0.9 && sw.w.to_f64() < 1.0);
        assert!(sw.p_value.to_f64() > 0.05);
    }

    #[test]
    fn test_shapiro_wilk_rejects_skewed_sample() {
        let values: Vec<f64> = (0..30).map(|i| (i as f64 / 3.0).exp()).collect();
        let sw = shapiro_wilk(&ctx(), &decimals(&values)).unwrap().unwrap();
        assert!(sw.p_value.to_f64() < 0.01);
    }

    #[test]
    fn test_constant_sample_has_no_statistic() {
        assert!(shapiro_wilk(&ctx(), &decimals(&[2.0, 2.0, 2.0, 2.0])).unwrap().is_none());
    }

    #[test]
    fn test_two_sample_checks() {
        let checker = AssumptionChecker::default();
        let request = TestRequest::new(
            TestType::TwoSampleT,
            TestData::Samples {
                groups: vec![
                    Sample::new("a", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
                    Sample::new("b", vec![2.0, 3.0, 4.0, 5.0, 6.0]),
                ],
            },
        );
        let checks = checker.check(TestType::TwoSampleT, &request).unwrap();
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![INDEPENDENCE, NORMALITY, NORMALITY, HOMOGENEITY]);
        assert!(checks.iter().all(|c| c.met));
    }

    #[test]
    fn test_duplicate_labels_fail_independence() {
        let data = TestData::Samples {
            groups: vec![Sample::new("a", vec![1.0, 2.0]), Sample::new("a", vec![3.0, 4.0])],
        };
        assert!(!group_independence(&data).met);
    }

    #[test]
    fn test_small_expected_counts_flagged() {
        let checker = AssumptionChecker::default();
        let request = TestRequest::new(
            TestType::ChiSquareIndependence,
            TestData::Contingency {
                table: vec![vec![3, 1], vec![1, 3]],
            },
        );
        let checks = checker.check(TestType::ChiSquareIndependence, &request).unwrap();
        assert_eq!(checks.len(), 1);
        assert!(!checks[0].met);
        assert_eq!(checks[0].remediation.as_deref(), Some(USE_EXACT_TEST));
    }

    #[test]
    fn test_too_few_observations_not_met() {
        let checker = AssumptionChecker::default();
        let request = TestRequest::new(
            TestType::OneSampleT,
            TestData::Samples {
                groups: vec![Sample::new("x", vec![1.0, 2.0])],
            },
        );
        let checks = checker.check(TestType::OneSampleT, &request).unwrap();
        assert!(!checks[0].met);
        assert!(checks[0].detail.contains("too few"));
    }
}
