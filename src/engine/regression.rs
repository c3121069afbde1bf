//! Simple linear regression: least-squares slope test and Theil-Sen
//!
//! Theil-Sen pairs the median of pairwise slopes with Kendall's S for the
//! test and Sen's order-statistic interval for the slope.

use super::correlation::cross_products;
use super::{
    median_sorted, midranks, require_finite_pairs, tail_p_value, wrong_data, Outcome, RawDf,
    RawInterval, RunContext, Tails, TestData, TestType, MAX_PAIRWISE_TERMS,
};
use crate::errors::{EngineError, Result};
use crate::precision::distributions::{ContinuousDistribution, Normal, StudentT};
use crate::precision::functions::sqrt;
use crate::precision::{Decimal, PrecisionContext};
use std::cmp::Ordering;

/// Least-squares line through (x, y)
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub n: usize,
    pub slope: Decimal,
    pub intercept: Decimal,
    pub sxx: Decimal,
    pub syy: Decimal,
    pub sse: Decimal,
}

impl LinearFit {
    pub fn fit(ctx: &PrecisionContext, x: &[Decimal], y: &[Decimal]) -> Result<Self> {
        let (sxx, syy, sxy) = cross_products(ctx, x, y);
        if !sxx.is_positive() {
            return Err(EngineError::validation("x", "predictor has zero variance"));
        }
        let slope = &sxy / &sxx;
        let intercept = &super::mean(ctx, y) - &(&slope * &super::mean(ctx, x));
        let sse = &syy - &(&slope * &sxy);
        Ok(Self {
            n: x.len(),
            slope,
            intercept,
            sxx,
            syy,
            sse: sse.max(ctx.int(0)),
        })
    }

    pub fn residuals(&self, x: &[Decimal], y: &[Decimal]) -> Vec<Decimal> {
        x.iter()
            .zip(y)
            .map(|(a, b)| b - &(&self.intercept + &(&self.slope * a)))
            .collect()
    }

    /// Coefficient of determination; zero when the response is constant
    pub fn r_squared(&self, ctx: &PrecisionContext) -> Decimal {
        if !self.syy.is_positive() {
            return ctx.int(0);
        }
        &ctx.int(1) - &(&self.sse / &self.syy)
    }
}

/// (x, y) of a bivariate request at working precision
pub fn bivariate(run: &RunContext<'_>, test_type: TestType) -> Result<(Vec<Decimal>, Vec<Decimal>)> {
    let (x, y) = match &run.request.data {
        TestData::Bivariate { x, y } => (x, y),
        other => return Err(wrong_data(test_type, "bivariate", other)),
    };
    require_finite_pairs(x, y, 3)?;
    Ok((run.ctx.values(x, "x")?, run.ctx.values(y, "y")?))
}

pub fn run(run: &RunContext<'_>, test_type: TestType) -> Result<Outcome> {
    let (x, y) = bivariate(run, test_type)?;
    match test_type {
        TestType::LinearRegression => least_squares(run, &x, &y),
        TestType::TheilSen => theil_sen(run, &x, &y),
        other => Err(EngineError::Internal(anyhow::anyhow!(
            "{other} dispatched to the regression family"
        ))),
    }
}

fn least_squares(run: &RunContext<'_>, x: &[Decimal], y: &[Decimal]) -> Result<Outcome> {
    let ctx = &run.ctx;
    let fit = LinearFit::fit(ctx, x, y)?;
    if !fit.sse.is_positive() {
        return Err(EngineError::validation(
            "y",
            "residual variance is zero: the points lie on a line",
        ));
    }
    let df = ctx.uint(fit.n as u64 - 2);
    let se = sqrt(ctx, &(&(&fit.sse / &df) / &fit.sxx))?;
    let t = &fit.slope / &se;
    let dist = StudentT::new(ctx, df.clone())?;
    let p_value = match run.tails() {
        Tails::TwoSided => dist.two_sided(&t)?,
        tails => tail_p_value(ctx, tails, dist.cdf(&t)?, dist.sf(&t)?),
    };

    let margin = &dist.quantile(&run.critical_probability())? * &se;
    let (lower, upper) = match run.tails() {
        Tails::TwoSided => (Some(&fit.slope - &margin), Some(&fit.slope + &margin)),
        Tails::Greater => (Some(&fit.slope - &margin), None),
        Tails::Less => (None, Some(&fit.slope + &margin)),
    };
    let intercept = fit.intercept.to_sig_string(ctx.digits, ctx.rounding);
    Ok(Outcome::new("t", t, p_value, "ordinary least squares slope t")
        .with_df(RawDf::Scalar(df))
        .with_interval(Some(RawInterval::new("slope", fit.slope, lower, upper)))
        .with_note(format!("intercept {intercept}")))
}

fn sign(ordering: Ordering) -> i64 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Variance of Kendall's S with ties in both variables
fn kendall_variance(ctx: &PrecisionContext, n: u64, x_ties: &[u64], y_ties: &[u64]) -> Decimal {
    // falling products t(t-1)...(t-k+1) kept in decimal arithmetic
    let falling = |t: u64, k: i64| (0..k).fold(ctx.int(1), |acc, j| &acc * &(&ctx.uint(t) - j));
    let base = |t: u64| &falling(t, 2) * &(&(&ctx.uint(t) * 2) + 5);
    let total = |ties: &[u64], term: &dyn Fn(u64) -> Decimal| {
        ties.iter().fold(ctx.int(0), |acc, &t| &acc + &term(t))
    };
    let pairs = |t: u64| falling(t, 2);
    let triples = |t: u64| falling(t, 3);

    let main = &(&base(n) - &total(x_ties, &base)) - &total(y_ties, &base);
    let mut var = &main / &ctx.int(18);
    if n > 2 {
        let cubic = &total(x_ties, &triples) * &total(y_ties, &triples);
        var = &var + &(&cubic / &(&falling(n, 3) * 9));
    }
    let square = &total(x_ties, &pairs) * &total(y_ties, &pairs);
    &var + &(&square / &(&falling(n, 2) * 2))
}

/// Nearest integer of a non-negative value
fn round_index(value: &Decimal) -> usize {
    (value + &Decimal::one(value.prec()).half())
        .floor()
        .to_i64()
        .unwrap_or(0)
        .max(0) as usize
}

fn theil_sen(run: &RunContext<'_>, x: &[Decimal], y: &[Decimal]) -> Result<Outcome> {
    let ctx = &run.ctx;
    let n = x.len();
    if n * (n - 1) / 2 > MAX_PAIRWISE_TERMS {
        return Err(EngineError::validation(
            "x",
            format!("too many points for pairwise slopes ({n})"),
        ));
    }

    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    let mut s: i64 = 0;
    for i in 0..n {
        for j in i + 1..n {
            s += sign(x[j].cmp(&x[i])) * sign(y[j].cmp(&y[i]));
            if x[j] != x[i] {
                slopes.push(&(&y[j] - &y[i]) / &(&x[j] - &x[i]));
            }
        }
    }
    if slopes.is_empty() {
        return Err(EngineError::validation("x", "predictor has zero variance"));
    }
    slopes.sort();
    let estimate = median_sorted(ctx, &slopes);

    let (_, x_ties) = midranks(ctx, x);
    let (_, y_ties) = midranks(ctx, y);
    let var = kendall_variance(ctx, n as u64, &x_ties, &y_ties);
    if !var.is_positive() {
        return Err(EngineError::validation("y", "response has zero variance"));
    }
    let sd = sqrt(ctx, &var)?;
    let corrected = ctx.int(s - s.signum());
    let z = &corrected / &sd;
    let normal = Normal::standard(ctx)?;
    let p_value = tail_p_value(ctx, run.tails(), normal.cdf(&z)?, normal.sf(&z)?);

    // Sen's interval from order statistics of the slopes
    let count = slopes.len();
    let spread = &normal.quantile(&run.critical_probability())? * &sd;
    let total = ctx.uint(count as u64);
    let m1 = (&total - &spread).half();
    let m2 = (&total + &spread).half();
    let lower_index = round_index(&m1.max(ctx.int(0))).max(1) - 1;
    let upper_index = round_index(&m2).min(count - 1);
    let (lower, upper) = match run.tails() {
        Tails::TwoSided => (Some(slopes[lower_index].clone()), Some(slopes[upper_index].clone())),
        Tails::Greater => (Some(slopes[lower_index].clone()), None),
        Tails::Less => (None, Some(slopes[upper_index].clone())),
    };

    Ok(Outcome::new("z", z, p_value, "theil-sen slope, kendall tau test")
        .with_interval(Some(RawInterval::new("slope", estimate, lower, upper)))
        .with_note(format!("kendall S = {s}")))
}
