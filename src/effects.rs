//! Effect Size Calculator
//!
//! Picks the canonical standardized effect for each test family, computes
//! it at the request's precision and pairs it with the power model used
//! for observed power and required sample size.

use crate::config::EngineConfig;
use crate::engine::categorical::{contingency, expected_counts, frequencies};
use crate::engine::correlation::pearson_r;
use crate::engine::location::{group_moments, GroupMoments};
use crate::engine::regression::{bivariate, LinearFit};
use crate::engine::variance::{anova_table, brown_forsythe_table};
use crate::engine::{
    mean, midranks, sample_variance, EffectMagnitude, EffectSize, PowerAnalysis, RunContext, TestData,
    TestRequest, TestResult, TestType,
};
use crate::errors::{EngineError, Result};
use crate::power::{power_analysis, Efficiency, PowerModel};
use crate::precision::functions::{asin, sqrt};
use crate::precision::{Decimal, PrecisionContext};
use tracing::debug;

/// Effect size and power attached to a result
#[derive(Debug, Clone, Default)]
pub struct Augmentation {
    pub effect_size: Option<EffectSize>,
    pub power: Option<PowerAnalysis>,
    pub notes: Vec<String>,
}

const COHEN_D: [f64; 3] = [0.2, 0.5, 0.8];
const COHEN_R: [f64; 3] = [0.1, 0.3, 0.5];
const VARIANCE_EXPLAINED: [f64; 3] = [0.01, 0.06, 0.14];
const R_SQUARED: [f64; 3] = [0.02, 0.13, 0.26];
const VARIANCE_RATIO: [f64; 3] = [1.5, 2.25, 4.0];

fn magnitude(value: f64, cuts: [f64; 3]) -> EffectMagnitude {
    let v = value.abs();
    if v < cuts[0] {
        EffectMagnitude::Negligible
    } else if v < cuts[1] {
        EffectMagnitude::Small
    } else if v < cuts[2] {
        EffectMagnitude::Medium
    } else {
        EffectMagnitude::Large
    }
}

/// An effect measure before presentation
struct Effect {
    measure: &'static str,
    value: Decimal,
    magnitude: EffectMagnitude,
}

impl Effect {
    fn new(measure: &'static str, value: Decimal, cuts: [f64; 3]) -> Self {
        let magnitude = magnitude(value.to_f64(), cuts);
        Self { measure, value, magnitude }
    }
}

/// Derive effect size and power for an executed result
///
/// `result.test_type` (the test actually run) selects the measure, so a
/// switched result gets the measure of its robust counterpart.
pub fn augment(result: &TestResult, request: &TestRequest, config: &EngineConfig) -> Result<Augmentation> {
    let digits = request.precision.unwrap_or(config.default_precision);
    let ctx = PrecisionContext::with_config(digits, request.rounding, config)?;
    let target_power = match request.option_f64("target_power")? {
        Some(t) if t > 0.0 && t < 1.0 => Some(t),
        Some(t) => {
            return Err(EngineError::validation(
                "target_power",
                format!("target power must be strictly between 0 and 1, got {t}"),
            ))
        }
        None => None,
    };
    let run = RunContext { ctx, request, config };

    let (effect, model, sizes) = measure(&run, result)?;
    let mut augmentation = Augmentation {
        effect_size: Some(EffectSize {
            measure: effect.measure.to_string(),
            value: ctx.present(effect.value),
            magnitude: effect.magnitude,
        }),
        ..Default::default()
    };

    match model {
        Some(model) if sizes.iter().all(|&n| n >= model.minimum_n()) => {
            augmentation.power = Some(power_analysis(
                &ctx,
                &model,
                request.alpha,
                request.tails,
                &sizes,
                target_power,
            )?);
        }
        Some(_) => augmentation
            .notes
            .push("power not computed: sample too small for the power model".to_string()),
        None => augmentation
            .notes
            .push("power not computed: no spread to standardize the effect".to_string()),
    }
    debug!(
        test = %result.test_type,
        measure = augmentation.effect_size.as_ref().map(|e| e.measure.as_str()).unwrap_or(""),
        "effect computed"
    );
    Ok(augmentation)
}

type Measured = (Effect, Option<PowerModel>, Vec<u64>);

fn measure(run: &RunContext<'_>, result: &TestResult) -> Result<Measured> {
    let ctx = &run.ctx;
    let statistic = result.statistic.raw().clone();
    let test_type = result.test_type;
    match test_type {
        TestType::OneSampleT | TestType::TwoSampleT | TestType::WelchT | TestType::PairedT => {
            let (d, two_groups, sizes) = standardized_difference(run, test_type)?
                .ok_or_else(|| EngineError::validation("data", "observations have no variability"))?;
            let model = PowerModel::T { d: d.clone(), two_groups, efficiency: Efficiency::Full };
            Ok((Effect::new("cohens_d", d, COHEN_D), Some(model), sizes))
        }
        TestType::OneWayAnova => {
            let groups = group_moments(run, test_type)?;
            let table = anova_table(ctx, &groups)?;
            let total = table.ss_total();
            let eta = &table.ss_between / &total;
            let ms_within = table.ms_within(ctx);
            let omega = (&(&table.ss_between - &(&ctx.uint(table.df_between) * &ms_within))
                / &(&total + &ms_within))
                .max(ctx.int(0));
            let sizes: Vec<u64> = groups.iter().map(|g| g.n).collect();
            let model = f_model(ctx, &eta, table.df_between, groups.len(), groups.len() as u64, Efficiency::Full);
            let mut effect = Effect::new("eta_squared", eta, VARIANCE_EXPLAINED);
            // omega-squared wins when it lands in a lower class
            if magnitude(omega.to_f64(), VARIANCE_EXPLAINED) < effect.magnitude {
                effect = Effect::new("omega_squared", omega, VARIANCE_EXPLAINED);
            }
            Ok((effect, model, sizes))
        }
        TestType::VarianceRatioF => {
            let groups = group_moments(run, test_type)?;
            let observed = &groups[0].variance / &groups[1].variance;
            let null_ratio = run.option_f64("ratio")?.unwrap_or_else(|| ctx.int(1));
            let folded = if observed < ctx.int(1) { &ctx.int(1) / &observed } else { observed.clone() };
            let model = PowerModel::VarianceRatio { ratio: &observed / &null_ratio };
            let effect = Effect {
                magnitude: magnitude(folded.to_f64(), VARIANCE_RATIO),
                ..Effect::new("variance_ratio", observed, VARIANCE_RATIO)
            };
            Ok((effect, Some(model), vec![groups[0].n, groups[1].n]))
        }
        TestType::BrownForsythe => {
            let groups = raw_groups(run)?;
            let table = brown_forsythe_table(ctx, &groups)?;
            let eta = &table.ss_between / &table.ss_total();
            let sizes: Vec<u64> = groups.iter().map(|g| g.len() as u64).collect();
            let model = f_model(ctx, &eta, table.df_between, groups.len(), groups.len() as u64, Efficiency::Full);
            Ok((Effect::new("eta_squared", eta, VARIANCE_EXPLAINED), model, sizes))
        }
        TestType::ChiSquareGoodnessOfFit | TestType::ExactMultinomial => {
            let (observed, probabilities) = frequencies(run, test_type)?;
            let total: u64 = observed.iter().sum();
            let n = ctx.uint(total);
            let w2 = observed.iter().zip(&probabilities).fold(ctx.int(0), |acc, (&o, p)| {
                let d = &(&ctx.uint(o) / &n) - p;
                &acc + &(&(&d * &d) / p)
            });
            let model = PowerModel::ChiSquare { w2: w2.clone(), df: observed.len() as u64 - 1 };
            Ok((Effect::new("cohens_w", sqrt(ctx, &w2)?, COHEN_R), Some(model), vec![total]))
        }
        TestType::ChiSquareIndependence | TestType::FisherExact => {
            let table = contingency(run, test_type)?;
            let expected = expected_counts(ctx, table);
            let mut chi2 = ctx.int(0);
            for (row, erow) in table.iter().zip(&expected) {
                for (&o, e) in row.iter().zip(erow) {
                    let d = &ctx.uint(o) - e;
                    chi2 = &chi2 + &(&(&d * &d) / e);
                }
            }
            let total: u64 = table.iter().flatten().sum();
            let (rows, cols) = (table.len() as u64, table[0].len() as u64);
            let smaller = rows.min(cols) - 1;
            let w2 = &chi2 / &ctx.uint(total);
            let v = sqrt(ctx, &(&w2 / &ctx.uint(smaller)))?;
            // conventional cut points shrink with the table's smaller dimension
            let scale = (smaller as f64).sqrt();
            let cuts = COHEN_R.map(|c| c / scale);
            let name = if rows == 2 && cols == 2 { "phi" } else { "cramers_v" };
            let model = PowerModel::ChiSquare { w2, df: (rows - 1) * (cols - 1) };
            Ok((Effect::new(name, v, cuts), Some(model), vec![total]))
        }
        TestType::BinomialExact => {
            let (successes, trials) = match &run.request.data {
                TestData::Binomial { successes, trials } => (*successes, *trials),
                other => return Err(crate::engine::wrong_data(test_type, "binomial", other)),
            };
            let p0 = run.option_f64("p0")?.unwrap_or_else(|| ctx.int(1).half());
            let observed = &ctx.uint(successes) / &ctx.uint(trials);
            let arcsine = |p: &Decimal| -> Result<Decimal> { Ok(&asin(ctx, &sqrt(ctx, p)?)? * &ctx.int(2)) };
            let h = &arcsine(&observed)? - &arcsine(&p0)?;
            let model = PowerModel::Binomial { p0, p1: observed };
            Ok((Effect::new("cohens_h", h, COHEN_D), Some(model), vec![trials]))
        }
        TestType::MannWhitneyU => {
            let groups = raw_groups(run)?;
            let (m, n) = (groups[0].len() as u64, groups[1].len() as u64);
            // 2U / mn - 1
            let r = &(&(&statistic * &ctx.int(2)) / &ctx.uint(m * n)) - &ctx.int(1);
            let model = pooled_d(ctx, &groups[0], &groups[1])
                .map(|d| PowerModel::T { d, two_groups: true, efficiency: Efficiency::Rank });
            Ok((Effect::new("rank_biserial", r, COHEN_R), model, vec![m, n]))
        }
        TestType::WilcoxonSignedRank => {
            let differences = centred_differences(run)?;
            let nonzero = differences.iter().filter(|d| !d.is_zero()).count() as u64;
            let total = ctx.uint(nonzero * (nonzero + 1) / 2);
            // (T+ - T-) / (T+ + T-)
            let r = &(&(&statistic * &ctx.int(2)) / &total) - &ctx.int(1);
            let model = one_sample_d(ctx, &differences)
                .map(|d| PowerModel::T { d, two_groups: false, efficiency: Efficiency::Rank });
            Ok((
                Effect::new("rank_biserial", r, COHEN_R),
                model,
                vec![differences.len() as u64],
            ))
        }
        TestType::KruskalWallis => {
            let groups = raw_groups(run)?;
            let total: u64 = groups.iter().map(|g| g.len() as u64).sum();
            let epsilon = &statistic / &ctx.uint(total - 1);
            let sizes: Vec<u64> = groups.iter().map(|g| g.len() as u64).collect();
            let moments: Vec<GroupMoments> = groups
                .iter()
                .enumerate()
                .map(|(i, g)| GroupMoments {
                    label: format!("group{}", i + 1),
                    n: g.len() as u64,
                    mean: mean(ctx, g),
                    variance: if g.len() > 1 { sample_variance(ctx, g) } else { ctx.int(0) },
                })
                .collect();
            let model = match anova_table(ctx, &moments) {
                Ok(table) => {
                    let eta = &table.ss_between / &table.ss_total();
                    f_model(ctx, &eta, table.df_between, groups.len(), groups.len() as u64, Efficiency::Rank)
                }
                Err(_) => None,
            };
            Ok((Effect::new("epsilon_squared", epsilon, VARIANCE_EXPLAINED), model, sizes))
        }
        TestType::Pearson | TestType::Spearman => {
            let (name, efficiency) = if test_type == TestType::Pearson {
                ("pearson_r", Efficiency::Full)
            } else {
                ("spearman_rho", Efficiency::RankCorrelation)
            };
            let n = result.sample_sizes.first().copied().unwrap_or(0);
            let model = PowerModel::Correlation { r: statistic.clone(), efficiency };
            Ok((Effect::new(name, statistic, COHEN_R), Some(model), vec![n]))
        }
        TestType::LinearRegression => {
            let (x, y) = bivariate(run, test_type)?;
            let r2 = LinearFit::fit(ctx, &x, &y)?.r_squared(ctx);
            let model = f_model(ctx, &r2, 1, 1, 2, Efficiency::Full);
            Ok((Effect::new("r_squared", r2, R_SQUARED), model, vec![x.len() as u64]))
        }
        TestType::TheilSen => {
            let (x, y) = bivariate(run, test_type)?;
            let tau = kendall_tau_b(ctx, &x, &y)?;
            let model = pearson_r(ctx, &x, &y)
                .ok()
                .map(|r| PowerModel::Correlation { r, efficiency: Efficiency::RankCorrelation });
            Ok((Effect::new("kendall_tau", tau, COHEN_R), model, vec![x.len() as u64]))
        }
    }
}

/// F model from a variance-explained share; `None` when the share is 1
fn f_model(
    ctx: &PrecisionContext,
    share: &Decimal,
    numerator_df: u64,
    groups: usize,
    df_offset: u64,
    efficiency: Efficiency,
) -> Option<PowerModel> {
    let rest = &ctx.int(1) - share;
    if !rest.is_positive() {
        return None;
    }
    Some(PowerModel::F {
        f2: share / &rest,
        numerator_df,
        df_offset,
        groups,
        efficiency,
    })
}

fn raw_groups(run: &RunContext<'_>) -> Result<Vec<Vec<Decimal>>> {
    match &run.request.data {
        TestData::Samples { groups } => groups
            .iter()
            .map(|g| run.ctx.values(&g.values, "values"))
            .collect(),
        other => Err(crate::engine::wrong_data(run.request.test_type, "samples", other)),
    }
}

/// Differences minus the hypothesized location, zeros kept
fn centred_differences(run: &RunContext<'_>) -> Result<Vec<Decimal>> {
    let ctx = &run.ctx;
    let shifted: Vec<Decimal> = match &run.request.data {
        TestData::Paired { first, second } => first
            .iter()
            .zip(second)
            .map(|(a, b)| Ok(&ctx.value(*a, "first")? - &ctx.value(*b, "second")?))
            .collect::<Result<_>>()?,
        TestData::Samples { groups } if groups.len() == 1 => ctx.values(&groups[0].values, "values")?,
        other => return Err(crate::engine::wrong_data(run.request.test_type, "paired or one-sample", other)),
    };
    let mu = run.option_f64("mu")?.unwrap_or_else(|| ctx.int(0));
    Ok(shifted.iter().map(|d| d - &mu).collect())
}

/// mean / sd of already centred values
fn one_sample_d(ctx: &PrecisionContext, centred: &[Decimal]) -> Option<Decimal> {
    if centred.len() < 2 {
        return None;
    }
    let variance = sample_variance(ctx, centred);
    if !variance.is_positive() {
        return None;
    }
    Some(&mean(ctx, centred) / &sqrt(ctx, &variance).ok()?)
}

fn pooled_d(ctx: &PrecisionContext, a: &[Decimal], b: &[Decimal]) -> Option<Decimal> {
    let df = (a.len() + b.len()).checked_sub(2).filter(|df| *df > 0)?;
    let ss = |g: &[Decimal]| {
        if g.len() > 1 {
            &sample_variance(ctx, g) * &ctx.uint(g.len() as u64 - 1)
        } else {
            ctx.int(0)
        }
    };
    let pooled = &(&ss(a) + &ss(b)) / &ctx.uint(df as u64);
    if !pooled.is_positive() {
        return None;
    }
    Some(&(&mean(ctx, a) - &mean(ctx, b)) / &sqrt(ctx, &pooled).ok()?)
}

/// Cohen's d for the location tests: (d, two groups, sizes)
fn standardized_difference(run: &RunContext<'_>, test_type: TestType) -> Result<Option<(Decimal, bool, Vec<u64>)>> {
    let ctx = &run.ctx;
    let mu = run.option_f64("mu")?.unwrap_or_else(|| ctx.int(0));
    if test_type == TestType::PairedT {
        let centred = centred_differences(run)?;
        let n = centred.len() as u64;
        return Ok(one_sample_d(ctx, &centred).map(|d| (d, false, vec![n])));
    }
    let groups = group_moments(run, test_type)?;
    if test_type == TestType::OneSampleT {
        let g = &groups[0];
        if !g.variance.is_positive() {
            return Ok(None);
        }
        let d = &(&g.mean - &mu) / &sqrt(ctx, &g.variance)?;
        return Ok(Some((d, false, vec![g.n])));
    }
    let (a, b) = (&groups[0], &groups[1]);
    let df = ctx.uint(a.n + b.n - 2);
    let pooled = &(&(&a.variance * &ctx.uint(a.n - 1)) + &(&b.variance * &ctx.uint(b.n - 1))) / &df;
    if !pooled.is_positive() {
        return Ok(None);
    }
    let d = &(&(&a.mean - &b.mean) - &mu) / &sqrt(ctx, &pooled)?;
    Ok(Some((d, true, vec![a.n, b.n])))
}

/// Kendall's tau-b
fn kendall_tau_b(ctx: &PrecisionContext, x: &[Decimal], y: &[Decimal]) -> Result<Decimal> {
    let n = x.len() as u64;
    let mut s: i64 = 0;
    for i in 0..x.len() {
        for j in i + 1..x.len() {
            let dx = x[j].cmp(&x[i]) as i64;
            let dy = y[j].cmp(&y[i]) as i64;
            s += dx * dy;
        }
    }
    let pairs = |ties: &[u64]| ties.iter().map(|t| t * (t - 1) / 2).sum::<u64>();
    let (_, x_ties) = midranks(ctx, x);
    let (_, y_ties) = midranks(ctx, y);
    let n0 = n * (n - 1) / 2;
    let denominator = &ctx.uint(n0 - pairs(&x_ties)) * &ctx.uint(n0 - pairs(&y_ties));
    if !denominator.is_positive() {
        return Err(EngineError::validation("data", "kendall tau undefined: an input is constant"));
    }
    Ok(&ctx.int(s) / &sqrt(ctx, &denominator)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestEngine};
    use serde_json::json;

    fn run_and_augment(request: TestRequest) -> Augmentation {
        let engine = TestEngine::default();
        let result = engine.execute(request.test_type, &request).unwrap();
        augment(&result, &request, engine.config()).unwrap()
    }

    fn two_groups(test_type: TestType, a: Vec<f64>, b: Vec<f64>) -> TestRequest {
        TestRequest::new(
            test_type,
            TestData::Samples {
                groups: vec![Sample::new("a", a), Sample::new("b", b)],
            },
        )
    }

    #[test]
    fn test_cohens_d_two_sample() {
        // means differ by 1, pooled sd sqrt(2.5)
        let aug = run_and_augment(two_groups(
            TestType::TwoSampleT,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![2.0, 3.0, 4.0, 5.0, 6.0],
        ));
        let effect = aug.effect_size.unwrap();
        assert_eq!(effect.measure, "cohens_d");
        assert!((effect.value.to_f64() + 1.0 / 2.5_f64.sqrt()).abs() < 1e-12);
        assert_eq!(effect.magnitude, EffectMagnitude::Medium);
        assert!(aug.power.is_some());
    }

    #[test]
    fn test_cramers_phi_for_two_by_two() {
        let request = TestRequest::new(
            TestType::ChiSquareIndependence,
            TestData::Contingency { table: vec![vec![10, 20], vec![30, 40]] },
        );
        let effect = run_and_augment(request).effect_size.unwrap();
        assert_eq!(effect.measure, "phi");
        // chi2 = 100/126 over n = 100
        let expected = (100.0_f64 / 126.0 / 100.0).sqrt();
        assert!((effect.value.to_f64() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rank_biserial_complete_separation() {
        let aug = run_and_augment(two_groups(
            TestType::MannWhitneyU,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![6.0, 7.0, 8.0, 9.0, 10.0],
        ));
        let effect = aug.effect_size.unwrap();
        assert_eq!(effect.value.to_string(), "-1");
        assert_eq!(effect.magnitude, EffectMagnitude::Large);
    }

    #[test]
    fn test_target_power_reports_required_size() {
        let request = two_groups(
            TestType::TwoSampleT,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .with_option("target_power", json!(0.8));
        let power = run_and_augment(request).power.unwrap();
        let n = power.required_sample_size.unwrap();
        assert!(n > 5);
        assert!(power.observed_power.to_f64() < 0.8);
    }

    #[test]
    fn test_invalid_target_power_rejected() {
        let engine = TestEngine::default();
        let request = two_groups(TestType::TwoSampleT, vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0])
            .with_option("target_power", json!(1.5));
        let result = engine.execute(TestType::TwoSampleT, &request).unwrap();
        let err = augment(&result, &request, engine.config()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_kendall_tau_b_with_ties() {
        let c = PrecisionContext::new(15, crate::precision::RoundingMode::HalfEven).unwrap();
        let x = c.values(&[1.0, 2.0, 3.0, 4.0], "x").unwrap();
        let y = c.values(&[1.0, 1.0, 2.0, 3.0], "y").unwrap();
        // S = 5, n0 = 6, one tied pair in y
        let tau = kendall_tau_b(&c, &x, &y).unwrap();
        assert!((tau.to_f64() - 5.0 / 30.0_f64.sqrt()).abs() < 1e-12);
    }
}
