//! Analysis of variance and variance-ratio tests
//!
//! One-way ANOVA, the two-sample F ratio and Brown-Forsythe (Levene's test
//! on deviations from group medians). The Brown-Forsythe statistic is also
//! used by the assumption checker for homogeneity of variance.

use super::location::{group_moments, GroupMoments};
use super::{median, tail_p_value, wrong_data, Outcome, RawDf, RawInterval, RunContext, Tails, TestData, TestType};
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::precision::distributions::{ContinuousDistribution, FisherF};
use crate::precision::{Decimal, PrecisionContext};
use crate::validation::{validate_group_count, validate_sample};

/// One-way ANOVA decomposition
#[derive(Debug, Clone)]
pub struct AnovaTable {
    pub ss_between: Decimal,
    pub ss_within: Decimal,
    pub df_between: u64,
    pub df_within: u64,
    pub f: Decimal,
}

impl AnovaTable {
    pub fn ss_total(&self) -> Decimal {
        &self.ss_between + &self.ss_within
    }

    /// Mean square within groups
    pub fn ms_within(&self, ctx: &PrecisionContext) -> Decimal {
        &self.ss_within / &ctx.uint(self.df_within)
    }
}

/// ANOVA from per-group moments
pub fn anova_table(ctx: &PrecisionContext, groups: &[GroupMoments]) -> Result<AnovaTable> {
    let k = groups.len() as u64;
    let total_n: u64 = groups.iter().map(|g| g.n).sum();
    if total_n <= k {
        return Err(EngineError::validation(
            "groups",
            "need more observations than groups for a within-group variance",
        ));
    }
    let weighted = groups
        .iter()
        .fold(ctx.int(0), |acc, g| &acc + &(&g.mean * &ctx.uint(g.n)));
    let grand = &weighted / &ctx.uint(total_n);

    let mut ss_between = ctx.int(0);
    let mut ss_within = ctx.int(0);
    for g in groups {
        let d = &g.mean - &grand;
        ss_between = &ss_between + &(&(&d * &d) * &ctx.uint(g.n));
        ss_within = &ss_within + &(&g.variance * &ctx.uint(g.n - 1));
    }

    if !ss_within.is_positive() {
        return Err(EngineError::validation(
            "groups",
            "within-group variance is zero: every group is constant",
        ));
    }
    let df_between = k - 1;
    let df_within = total_n - k;
    let f = &(&ss_between / &ctx.uint(df_between)) / &(&ss_within / &ctx.uint(df_within));
    Ok(AnovaTable {
        ss_between,
        ss_within,
        df_between,
        df_within,
        f,
    })
}

/// Brown-Forsythe table: ANOVA on |x - median| within each group
pub fn brown_forsythe_table(ctx: &PrecisionContext, groups: &[Vec<Decimal>]) -> Result<AnovaTable> {
    let deviations: Vec<GroupMoments> = groups
        .iter()
        .enumerate()
        .map(|(i, values)| {
            let m = median(ctx, values);
            let z: Vec<Decimal> = values.iter().map(|v| (v - &m).abs()).collect();
            GroupMoments {
                label: format!("group{}", i + 1),
                n: z.len() as u64,
                mean: super::mean(ctx, &z),
                variance: super::sample_variance(ctx, &z),
            }
        })
        .collect();
    anova_table(ctx, &deviations)
}

pub fn run(run: &RunContext<'_>, test_type: TestType) -> Result<Outcome> {
    match test_type {
        TestType::OneWayAnova => one_way_anova(run),
        TestType::VarianceRatioF => variance_ratio(run),
        TestType::BrownForsythe => brown_forsythe(run),
        other => Err(EngineError::Internal(anyhow::anyhow!(
            "{other} dispatched to the variance family"
        ))),
    }
}

fn f_upper_outcome(ctx: &PrecisionContext, table: &AnovaTable, method: &str) -> Result<Outcome> {
    let d1 = ctx.uint(table.df_between);
    let d2 = ctx.uint(table.df_within);
    let dist = FisherF::new(ctx, d1.clone(), d2.clone())?;
    let p_value = dist.sf(&table.f)?;
    Ok(Outcome::new("F", table.f.clone(), p_value, method).with_df(RawDf::Pair(d1, d2)))
}

fn one_way_anova(run: &RunContext<'_>) -> Result<Outcome> {
    let groups = group_moments(run, TestType::OneWayAnova)?;
    validate_group_count(groups.len(), 2, None).map_validation_err("groups")?;
    let table = anova_table(&run.ctx, &groups)?;
    f_upper_outcome(&run.ctx, &table, "one-way anova")
}

fn raw_groups(run: &RunContext<'_>, test_type: TestType, min_len: usize) -> Result<Vec<Vec<Decimal>>> {
    let groups = match &run.request.data {
        TestData::Samples { groups } => groups,
        other => return Err(wrong_data(test_type, "samples", other)),
    };
    groups
        .iter()
        .map(|g| {
            validate_sample(&g.values, min_len).map_validation_err("groups")?;
            run.ctx.values(&g.values, "values")
        })
        .collect()
}

fn brown_forsythe(run: &RunContext<'_>) -> Result<Outcome> {
    let groups = raw_groups(run, TestType::BrownForsythe, 2)?;
    validate_group_count(groups.len(), 2, None).map_validation_err("groups")?;
    let table = brown_forsythe_table(&run.ctx, &groups)?;
    f_upper_outcome(&run.ctx, &table, "brown-forsythe (median-centred levene)")
}

fn variance_ratio(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let groups = group_moments(run, TestType::VarianceRatioF)?;
    validate_group_count(groups.len(), 2, Some(2)).map_validation_err("groups")?;
    let (a, b) = (&groups[0], &groups[1]);
    if !b.variance.is_positive() || !a.variance.is_positive() {
        return Err(EngineError::validation(
            "groups",
            "variance ratio undefined: a group has zero variance",
        ));
    }
    let null_ratio = run.option_f64("ratio")?.unwrap_or_else(|| ctx.int(1));
    if !null_ratio.is_positive() {
        return Err(EngineError::validation("ratio", "hypothesized ratio must be positive"));
    }

    let estimate = &a.variance / &b.variance;
    let f = &estimate / &null_ratio;
    let d1 = ctx.uint(a.n - 1);
    let d2 = ctx.uint(b.n - 1);
    let dist = FisherF::new(ctx, d1.clone(), d2.clone())?;
    let p_value = tail_p_value(ctx, run.tails(), dist.cdf(&f)?, dist.sf(&f)?);

    // ratio CI: estimate / F quantiles
    let alpha = run.alpha();
    let one = ctx.int(1);
    let interval = match run.tails() {
        Tails::TwoSided => {
            let hi_q = dist.quantile(&(&one - &alpha.half()))?;
            let lo_q = dist.quantile(&alpha.half())?;
            RawInterval::new("variance ratio", estimate.clone(), Some(&estimate / &hi_q), Some(&estimate / &lo_q))
        }
        Tails::Greater => {
            let hi_q = dist.quantile(&(&one - &alpha))?;
            RawInterval::new("variance ratio", estimate.clone(), Some(&estimate / &hi_q), None)
        }
        Tails::Less => {
            let lo_q = dist.quantile(&alpha)?;
            RawInterval::new("variance ratio", estimate.clone(), None, Some(&estimate / &lo_q))
        }
    };

    Ok(Outcome::new("F", f, p_value, "variance ratio f")
        .with_df(RawDf::Pair(d1, d2))
        .with_interval(Some(interval)))
}
