//! Location tests: one-sample, pooled two-sample, Welch and paired t

use super::{
    mean, sample_variance, tail_p_value, wrong_data, Outcome, RawDf, RawInterval, RunContext,
    TestData, TestType,
};
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::precision::distributions::{ContinuousDistribution, StudentT};
use crate::precision::functions::sqrt;
use crate::precision::{Decimal, PrecisionContext};
use crate::validation::{validate_group_count, validate_sample};

/// First two moments of one group at working precision
#[derive(Debug, Clone)]
pub struct GroupMoments {
    pub label: String,
    pub n: u64,
    pub mean: Decimal,
    pub variance: Decimal,
}

impl GroupMoments {
    pub fn from_values(ctx: &PrecisionContext, label: &str, values: &[f64]) -> Result<Self> {
        validate_sample(values, 2).map_validation_err(&format!("groups[{label}]"))?;
        let decimals = ctx.values(values, "values")?;
        Ok(Self {
            label: label.to_string(),
            n: values.len() as u64,
            mean: mean(ctx, &decimals),
            variance: sample_variance(ctx, &decimals),
        })
    }

    pub fn from_summary(
        ctx: &PrecisionContext,
        label: &str,
        n: u64,
        group_mean: f64,
        sd: f64,
    ) -> Result<Self> {
        if n < 2 {
            return Err(EngineError::validation(
                "groups",
                format!("fewer than 2 observations in group '{label}'"),
            ));
        }
        if sd.is_nan() || sd < 0.0 {
            return Err(EngineError::validation(
                "groups",
                format!("standard deviation of group '{label}' must be non-negative"),
            ));
        }
        let sd = ctx.value(sd, "sd")?;
        Ok(Self {
            label: label.to_string(),
            n,
            mean: ctx.value(group_mean, "mean")?,
            variance: &sd * &sd,
        })
    }

    /// Squared standard error of the mean
    pub fn se2(&self, ctx: &PrecisionContext) -> Decimal {
        &self.variance / &ctx.uint(self.n)
    }
}

/// Moments of every group in `Samples` or `Summary` data
pub fn group_moments(run: &RunContext<'_>, test_type: TestType) -> Result<Vec<GroupMoments>> {
    let ctx = &run.ctx;
    match &run.request.data {
        TestData::Samples { groups } => groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let label = if g.label.is_empty() { format!("group{}", i + 1) } else { g.label.clone() };
                GroupMoments::from_values(ctx, &label, &g.values)
            })
            .collect(),
        TestData::Summary { groups } => groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let label = if g.label.is_empty() { format!("group{}", i + 1) } else { g.label.clone() };
                GroupMoments::from_summary(ctx, &label, g.n, g.mean, g.sd)
            })
            .collect(),
        other => Err(wrong_data(test_type, "samples or summary", other)),
    }
}

pub fn run(run: &RunContext<'_>, test_type: TestType) -> Result<Outcome> {
    match test_type {
        TestType::OneSampleT => one_sample(run),
        TestType::TwoSampleT => two_sample(run, false),
        TestType::WelchT => two_sample(run, true),
        TestType::PairedT => paired(run),
        other => Err(EngineError::Internal(anyhow::anyhow!(
            "{other} dispatched to the location family"
        ))),
    }
}

/// Shared tail of every t procedure: p-value and interval for `estimate`
fn t_outcome(
    run: &RunContext<'_>,
    estimate: Decimal,
    null_value: Decimal,
    se: Decimal,
    df: Decimal,
    parameter: &str,
    method: &str,
) -> Result<Outcome> {
    let ctx = &run.ctx;
    if !se.is_positive() {
        return Err(EngineError::validation(
            "data",
            "standard error is zero: observations have no variability",
        ));
    }
    let t = &(&estimate - &null_value) / &se;
    let dist = StudentT::new(ctx, df.clone())?;

    let p_value = match run.tails() {
        super::Tails::TwoSided => dist.two_sided(&t)?,
        tails => tail_p_value(ctx, tails, dist.cdf(&t)?, dist.sf(&t)?),
    };

    let crit = dist.quantile(&run.critical_probability())?;
    let margin = &crit * &se;
    let (lower, upper) = match run.tails() {
        super::Tails::TwoSided => (Some(&estimate - &margin), Some(&estimate + &margin)),
        super::Tails::Greater => (Some(&estimate - &margin), None),
        super::Tails::Less => (None, Some(&estimate + &margin)),
    };

    Ok(Outcome::new("t", t, p_value, method)
        .with_df(RawDf::Scalar(df))
        .with_interval(Some(RawInterval::new(parameter, estimate, lower, upper))))
}

fn one_sample(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let groups = group_moments(run, TestType::OneSampleT)?;
    validate_group_count(groups.len(), 1, Some(1)).map_validation_err("groups")?;
    let g = &groups[0];
    let mu = run.option_f64("mu")?.unwrap_or_else(|| ctx.int(0));
    let se = sqrt(ctx, &g.se2(ctx))?;
    let df = ctx.uint(g.n - 1);
    t_outcome(run, g.mean.clone(), mu, se, df, "mean", "student t")
}

fn two_sample(run: &RunContext<'_>, welch: bool) -> Result<Outcome> {
    let ctx = &run.ctx;
    let test_type = if welch { TestType::WelchT } else { TestType::TwoSampleT };
    let groups = group_moments(run, test_type)?;
    validate_group_count(groups.len(), 2, Some(2)).map_validation_err("groups")?;
    let (a, b) = (&groups[0], &groups[1]);
    let mu = run.option_f64("mu")?.unwrap_or_else(|| ctx.int(0));
    let diff = &a.mean - &b.mean;

    if welch {
        let (va, vb) = (a.se2(ctx), b.se2(ctx));
        let total = &va + &vb;
        let se = sqrt(ctx, &total)?;
        // Welch-Satterthwaite
        let denom = &(&(&va * &va) / &ctx.uint(a.n - 1)) + &(&(&vb * &vb) / &ctx.uint(b.n - 1));
        if !denom.is_positive() {
            return Err(EngineError::validation(
                "data",
                "standard error is zero: observations have no variability",
            ));
        }
        let df = &(&total * &total) / &denom;
        t_outcome(run, diff, mu, se, df, "mean difference", "welch t")
    } else {
        let df = ctx.uint(a.n + b.n - 2);
        let pooled = &(&(&a.variance * &ctx.uint(a.n - 1)) + &(&b.variance * &ctx.uint(b.n - 1))) / &df;
        let scale = &(&ctx.int(1) / &ctx.uint(a.n)) + &(&ctx.int(1) / &ctx.uint(b.n));
        let se = sqrt(ctx, &(&pooled * &scale))?;
        t_outcome(run, diff, mu, se, df, "mean difference", "pooled student t")
    }
}

fn paired(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let (first, second) = match &run.request.data {
        TestData::Paired { first, second } => (first, second),
        other => return Err(wrong_data(TestType::PairedT, "paired", other)),
    };
    super::require_finite_pairs(first, second, 2)?;
    let a = ctx.values(first, "first")?;
    let b = ctx.values(second, "second")?;
    let diffs: Vec<Decimal> = a.iter().zip(&b).map(|(x, y)| x - y).collect();
    let n = diffs.len() as u64;
    let mu = run.option_f64("mu")?.unwrap_or_else(|| ctx.int(0));
    let se = sqrt(ctx, &(&sample_variance(ctx, &diffs) / &ctx.uint(n)))?;
    let df = ctx.uint(n - 1);
    t_outcome(run, mean(ctx, &diffs), mu, se, df, "mean difference", "paired t")
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::{Sample, SummaryStats, Tails, TestData, TestEngine, TestRequest, TestType};
    use serde_json::json;

    fn two_groups(a: Vec<f64>, b: Vec<f64>) -> TestData {
        TestData::Samples {
            groups: vec![Sample::new("a", a), Sample::new("b", b)],
        }
    }

    #[test]
    fn test_pooled_t_scenario() {
        let engine = TestEngine::new(EngineConfig::default());
        let request = TestRequest::new(
            TestType::TwoSampleT,
            two_groups(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![2.0, 3.0, 4.0, 5.0, 6.0]),
        )
        .with_precision(10);
        let result = engine.execute(TestType::TwoSampleT, &request).unwrap();
        assert_eq!(result.statistic.to_string(), "-1");
        assert_eq!(result.p_value.to_string(), "0.3465935071");
        let ci = result.confidence_interval.unwrap();
        assert_eq!(ci.estimate.to_string(), "-1");
        // t(0.975, 8) = 2.306004135
        assert_eq!(ci.lower.unwrap().to_string(), "-3.306004135");
        assert_eq!(ci.upper.unwrap().to_string(), "1.306004135");
    }

    #[test]
    fn test_welch_matches_pooled_for_equal_designs() {
        let engine = TestEngine::default();
        let data = two_groups(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        let request = TestRequest::new(TestType::WelchT, data).with_precision(12);
        let result = engine.execute(TestType::WelchT, &request).unwrap();
        // equal n and equal variances: Welch df equals n1 + n2 - 2
        match result.degrees_of_freedom.unwrap() {
            crate::engine::DegreesOfFreedom::Scalar(df) => assert_eq!(df.to_string(), "8"),
            other => panic!("unexpected df {other:?}"),
        }
        assert_eq!(result.p_value.to_string(), "0.346593507087");
    }

    #[test]
    fn test_one_sample_with_mu_and_summary_data() {
        let engine = TestEngine::default();
        let raw = TestRequest::new(
            TestType::OneSampleT,
            TestData::Samples {
                groups: vec![Sample::new("x", vec![5.1, 4.9, 5.6, 5.8, 6.0, 5.2])],
            },
        )
        .with_option("mu", json!(5.0));
        let from_raw = engine.execute(TestType::OneSampleT, &raw).unwrap();
        assert!(from_raw.p_value.to_f64() > 0.05);

        let summary = TestRequest::new(
            TestType::OneSampleT,
            TestData::Summary {
                groups: vec![SummaryStats {
                    label: "x".into(),
                    n: 10,
                    mean: 1.0,
                    sd: 2.0,
                }],
            },
        );
        let result = engine.execute(TestType::OneSampleT, &summary).unwrap();
        // t = 1 / (2 / sqrt(10)) = sqrt(10) / 2
        assert!((result.statistic.to_f64() - 1.581_138_830_084_19).abs() < 1e-12);
    }

    #[test]
    fn test_one_sided_interval_is_unbounded_on_one_side() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::PairedT,
            TestData::Paired {
                first: vec![10.0, 12.0, 9.0, 11.0],
                second: vec![9.0, 10.0, 9.5, 9.0],
            },
        )
        .with_tails(Tails::Greater);
        let result = engine.execute(TestType::PairedT, &request).unwrap();
        let ci = result.confidence_interval.unwrap();
        assert!(ci.lower.is_some());
        assert!(ci.upper.is_none());
        assert!(result.p_value.to_f64() < 0.5);
    }

    #[test]
    fn test_constant_sample_is_rejected() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::OneSampleT,
            TestData::Samples {
                groups: vec![Sample::new("x", vec![3.0, 3.0, 3.0])],
            },
        );
        let err = engine.execute(TestType::OneSampleT, &request).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_single_observation_reports_reason() {
        let engine = TestEngine::default();
        let request = TestRequest::new(TestType::TwoSampleT, two_groups(vec![1.0], vec![2.0, 3.0]));
        let err = engine.execute(TestType::TwoSampleT, &request).unwrap_err();
        assert!(err.message().contains("fewer than 2 observations"));
    }
}
