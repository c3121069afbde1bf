//! Statistical power
//!
//! Observed power at the achieved effect and sample sizes, and the per-group
//! sample size needed to reach a target power. Every probability comes from
//! the noncentral (or central) distribution routines; there are no tables.

use crate::constants::{MAX_BINOMIAL_TRIALS, MAX_REQUIRED_SAMPLE_SIZE};
use crate::engine::{PowerAnalysis, Tails};
use crate::errors::Result;
use crate::precision::distributions::{Binomial, ChiSquare, ContinuousDistribution, FisherF, Normal, StudentT};
use crate::precision::functions::{atanh, pi, sqrt};
use crate::precision::noncentral::{noncentral_chi_square_tails, noncentral_f_tails, noncentral_t_cdf, noncentral_t_sf};
use crate::precision::{Decimal, PrecisionContext};
use tracing::debug;

/// Asymptotic relative efficiency applied to the sample size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Efficiency {
    Full,
    /// Rank tests against their t/F analogue under normality: 3/pi
    Rank,
    /// Rank correlation (Spearman, Kendall) against Pearson: 9/pi^2
    RankCorrelation,
}

impl Efficiency {
    fn factor(&self, ctx: &PrecisionContext) -> Decimal {
        match self {
            Efficiency::Full => ctx.int(1),
            Efficiency::Rank => &ctx.int(3) / &pi(ctx),
            Efficiency::RankCorrelation => {
                let p = pi(ctx);
                &ctx.int(9) / &(&p * &p)
            }
        }
    }
}

/// Alternative hypothesis a power computation is evaluated under
#[derive(Debug, Clone)]
pub enum PowerModel {
    /// t test with standardized difference `d`
    T {
        d: Decimal,
        two_groups: bool,
        efficiency: Efficiency,
    },
    /// F test with Cohen's f²; denominator df is N minus `df_offset`
    F {
        f2: Decimal,
        numerator_df: u64,
        df_offset: u64,
        groups: usize,
        efficiency: Efficiency,
    },
    /// Ratio of two variances relative to the null ratio
    VarianceRatio { ratio: Decimal },
    /// Chi-square test with Cohen's w²
    ChiSquare { w2: Decimal, df: u64 },
    /// Correlation test through Fisher's z
    Correlation { r: Decimal, efficiency: Efficiency },
    /// Exact binomial test of `p0` when the true proportion is `p1`
    Binomial { p0: Decimal, p1: Decimal },
}

impl PowerModel {
    pub fn method(&self) -> &'static str {
        match self {
            PowerModel::T { efficiency: Efficiency::Full, .. } => "noncentral t",
            PowerModel::T { .. } => "noncentral t, scaled by asymptotic relative efficiency",
            PowerModel::F { efficiency: Efficiency::Full, .. } => "noncentral f",
            PowerModel::F { .. } => "noncentral f, scaled by asymptotic relative efficiency",
            PowerModel::VarianceRatio { .. } => "central f under the observed variance ratio",
            PowerModel::ChiSquare { .. } => "noncentral chi-square",
            PowerModel::Correlation { .. } => "fisher z normal approximation",
            PowerModel::Binomial { .. } => "exact binomial rejection region",
        }
    }

    /// Groups a per-group sample size is replicated over
    pub fn groups(&self) -> usize {
        match self {
            PowerModel::T { two_groups: true, .. } | PowerModel::VarianceRatio { .. } => 2,
            PowerModel::F { groups, .. } => *groups,
            _ => 1,
        }
    }

    /// Smallest per-group size the model is defined for
    pub fn minimum_n(&self) -> u64 {
        match self {
            PowerModel::T { .. } | PowerModel::VarianceRatio { .. } => 2,
            PowerModel::F { df_offset, groups, .. } => {
                // denominator df must be positive
                (df_offset / *groups as u64 + 1).max(2)
            }
            PowerModel::ChiSquare { .. } | PowerModel::Binomial { .. } => 1,
            PowerModel::Correlation { .. } => 4,
        }
    }

    fn maximum_n(&self) -> u64 {
        match self {
            PowerModel::Binomial { .. } => MAX_BINOMIAL_TRIALS,
            _ => MAX_REQUIRED_SAMPLE_SIZE,
        }
    }

    /// True when the alternative coincides with the null
    fn is_null(&self) -> bool {
        match self {
            PowerModel::T { d, .. } => d.is_zero(),
            PowerModel::F { f2, .. } => f2.is_zero(),
            PowerModel::VarianceRatio { ratio } => ratio.to_f64() == 1.0,
            PowerModel::ChiSquare { w2, .. } => w2.is_zero(),
            PowerModel::Correlation { r, .. } => r.is_zero(),
            PowerModel::Binomial { p0, p1 } => p0 == p1,
        }
    }

    /// Power at the given group sizes
    pub fn power(&self, ctx: &PrecisionContext, alpha: &Decimal, tails: Tails, sizes: &[u64]) -> Result<Decimal> {
        let one = ctx.int(1);
        let total: u64 = sizes.iter().sum();
        let power = match self {
            PowerModel::T { d, two_groups, efficiency } => {
                let (df, scale) = if *two_groups {
                    let (n1, n2) = (sizes[0], sizes[1]);
                    let harmonic = &(&ctx.uint(n1) * &ctx.uint(n2)) / &ctx.uint(n1 + n2);
                    (n1 + n2 - 2, harmonic)
                } else {
                    (sizes[0] - 1, ctx.uint(sizes[0]))
                };
                let df = ctx.uint(df);
                let delta = d * &sqrt(ctx, &(&scale * &efficiency.factor(ctx)))?;
                let dist = StudentT::new(ctx, df.clone())?;
                match tails {
                    Tails::TwoSided => {
                        let crit = dist.quantile(&(&one - &alpha.half()))?;
                        &noncentral_t_sf(ctx, &crit, &df, &delta)? + &noncentral_t_cdf(ctx, &-&crit, &df, &delta)?
                    }
                    Tails::Greater => {
                        let crit = dist.quantile(&(&one - alpha))?;
                        noncentral_t_sf(ctx, &crit, &df, &delta)?
                    }
                    Tails::Less => {
                        let crit = dist.quantile(&(&one - alpha))?;
                        noncentral_t_cdf(ctx, &-&crit, &df, &delta)?
                    }
                }
            }
            PowerModel::F { f2, numerator_df, df_offset, efficiency, .. } => {
                let d1 = ctx.uint(*numerator_df);
                let d2 = ctx.uint(total - df_offset);
                let lambda = &(f2 * &ctx.uint(total)) * &efficiency.factor(ctx);
                let crit = FisherF::new(ctx, d1.clone(), d2.clone())?.quantile(&(&one - alpha))?;
                noncentral_f_tails(ctx, &crit, &d1, &d2, &lambda)?.1
            }
            PowerModel::VarianceRatio { ratio } => {
                let dist = FisherF::new(ctx, ctx.uint(sizes[0] - 1), ctx.uint(sizes[1] - 1))?;
                match tails {
                    Tails::TwoSided => {
                        let hi = dist.quantile(&(&one - &alpha.half()))?;
                        let lo = dist.quantile(&alpha.half())?;
                        &dist.sf(&(&hi / ratio))? + &dist.cdf(&(&lo / ratio))?
                    }
                    Tails::Greater => dist.sf(&(&dist.quantile(&(&one - alpha))? / ratio))?,
                    Tails::Less => dist.cdf(&(&dist.quantile(alpha)? / ratio))?,
                }
            }
            PowerModel::ChiSquare { w2, df } => {
                let df = ctx.uint(*df);
                let crit = ChiSquare::new(ctx, df.clone())?.quantile(&(&one - alpha))?;
                let lambda = w2 * &ctx.uint(total);
                noncentral_chi_square_tails(ctx, &crit, &df, &lambda)?.1
            }
            PowerModel::Correlation { r, efficiency } => {
                if r.abs() >= one {
                    return Ok(one);
                }
                let normal = Normal::standard(ctx)?;
                let n3 = ctx.uint(sizes[0].saturating_sub(3));
                let shift = &atanh(ctx, r)? * &sqrt(ctx, &(&n3 * &efficiency.factor(ctx)))?;
                match tails {
                    Tails::TwoSided => {
                        let crit = normal.quantile(&(&one - &alpha.half()))?;
                        &normal.cdf(&(&shift - &crit))? + &normal.cdf(&(&-&shift - &crit))?
                    }
                    Tails::Greater => normal.cdf(&(&shift - &normal.quantile(&(&one - alpha))?))?,
                    Tails::Less => normal.cdf(&(&-&shift - &normal.quantile(&(&one - alpha))?))?,
                }
            }
            PowerModel::Binomial { p0, p1 } => binomial_power(ctx, alpha, tails, sizes[0], p0, p1)?,
        };
        Ok(power.max(ctx.int(0)).min(one))
    }

    /// Smallest per-group size reaching `target`; `None` when unreachable
    ///
    /// Power is monotone in n, so a doubling phase brackets the answer and a
    /// binary search narrows it.
    pub fn required_sample_size(
        &self,
        ctx: &PrecisionContext,
        alpha: &Decimal,
        tails: Tails,
        target: &Decimal,
    ) -> Result<Option<u64>> {
        if self.is_null() {
            return Ok(None);
        }
        let groups = self.groups();
        let reaches = |n: u64| -> Result<bool> { Ok(self.power(ctx, alpha, tails, &vec![n; groups])? >= *target) };

        let mut lo = self.minimum_n();
        if reaches(lo)? {
            return Ok(Some(lo));
        }
        let max = self.maximum_n();
        let mut hi = lo;
        loop {
            if hi >= max {
                return Ok(None);
            }
            hi = hi.saturating_mul(2).min(max);
            if reaches(hi)? {
                break;
            }
            lo = hi;
        }
        // reaches(lo) is false, reaches(hi) is true
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if reaches(mid)? {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        debug!(method = self.method(), n = hi, "required sample size found");
        Ok(Some(hi))
    }
}

/// Power of the exact binomial test over its equal-tailed rejection region
fn binomial_power(
    ctx: &PrecisionContext,
    alpha: &Decimal,
    tails: Tails,
    n: u64,
    p0: &Decimal,
    p1: &Decimal,
) -> Result<Decimal> {
    let null = Binomial::new(ctx, n, p0.clone())?;
    let alt = Binomial::new(ctx, n, p1.clone())?;
    let one = ctx.int(1);
    let level = match tails {
        Tails::TwoSided => alpha.half(),
        _ => alpha.clone(),
    };

    let mut power = ctx.int(0);
    if tails != Tails::Greater {
        // largest k with P0(X <= k) <= level
        let q = null.quantile(&level)?;
        let lower = if null.cdf(q)? <= level {
            Some(q)
        } else {
            q.checked_sub(1)
        };
        if let Some(k) = lower {
            power = &power + &alt.cdf(k)?;
        }
    }
    if tails != Tails::Less {
        // smallest k with P0(X >= k) <= level
        let k = null.quantile(&(&one - &level))? + 1;
        if k <= n {
            power = &power + &alt.sf_inclusive(k)?;
        }
    }
    Ok(power)
}

/// Observed power and, for a target, the required per-group sample size
pub fn power_analysis(
    ctx: &PrecisionContext,
    model: &PowerModel,
    alpha: f64,
    tails: Tails,
    sizes: &[u64],
    target_power: Option<f64>,
) -> Result<PowerAnalysis> {
    let alpha_value = ctx.value(alpha, "alpha")?;
    let observed = model.power(ctx, &alpha_value, tails, sizes)?;
    let required_sample_size = match target_power {
        Some(target) => {
            let target = ctx.value(target, "target_power")?;
            model.required_sample_size(ctx, &alpha_value, tails, &target)?
        }
        None => None,
    };
    Ok(PowerAnalysis {
        method: model.method().to_string(),
        observed_power: ctx.present(observed),
        alpha,
        target_power,
        required_sample_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::RoundingMode;

    fn ctx() -> PrecisionContext {
        PrecisionContext::new(10, RoundingMode::HalfEven).unwrap()
    }

    fn alpha(c: &PrecisionContext) -> Decimal {
        c.value(0.05, "alpha").unwrap()
    }

    #[test]
    fn test_two_sample_t_power_reference() {
        // d = 1, n = 20 per group: power.t.test gives 0.8689528
        let c = ctx();
        let model = PowerModel::T {
            d: c.int(1),
            two_groups: true,
            efficiency: Efficiency::Full,
        };
        let power = model.power(&c, &alpha(&c), Tails::TwoSided, &[20, 20]).unwrap();
        assert!((power.to_f64() - 0.868_952_8).abs() < 1e-6);
    }

    #[test]
    fn test_required_sample_size_two_sample() {
        // d = 0.5 at 80% power needs 64 per group
        let c = ctx();
        let model = PowerModel::T {
            d: c.int(1).half(),
            two_groups: true,
            efficiency: Efficiency::Full,
        };
        let target = c.value(0.8, "target").unwrap();
        let n = model
            .required_sample_size(&c, &alpha(&c), Tails::TwoSided, &target)
            .unwrap();
        assert_eq!(n, Some(64));
    }

    #[test]
    fn test_rank_efficiency_lowers_power() {
        let c = ctx();
        let full = PowerModel::T { d: c.int(1), two_groups: true, efficiency: Efficiency::Full };
        let rank = PowerModel::T { d: c.int(1), two_groups: true, efficiency: Efficiency::Rank };
        let a = full.power(&c, &alpha(&c), Tails::TwoSided, &[10, 10]).unwrap();
        let b = rank.power(&c, &alpha(&c), Tails::TwoSided, &[10, 10]).unwrap();
        assert!(b < a);
    }

    #[test]
    fn test_null_effect_has_no_required_size() {
        let c = ctx();
        let model = PowerModel::ChiSquare { w2: c.int(0), df: 2 };
        let target = c.value(0.8, "target").unwrap();
        assert_eq!(
            model.required_sample_size(&c, &alpha(&c), Tails::TwoSided, &target).unwrap(),
            None
        );
        // size of the test
        let power = model.power(&c, &alpha(&c), Tails::TwoSided, &[50]).unwrap();
        assert!((power.to_f64() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_binomial_power_grows_with_n() {
        let c = ctx();
        let model = PowerModel::Binomial {
            p0: c.int(1).half(),
            p1: c.value(0.8, "p").unwrap(),
        };
        let small = model.power(&c, &alpha(&c), Tails::TwoSided, &[10]).unwrap();
        let large = model.power(&c, &alpha(&c), Tails::TwoSided, &[60]).unwrap();
        assert!(small < large);
        assert!(large.to_f64() > 0.95);
    }

    #[test]
    fn test_perfect_correlation_has_full_power() {
        let c = ctx();
        let model = PowerModel::Correlation { r: c.int(1), efficiency: Efficiency::Full };
        let power = model.power(&c, &alpha(&c), Tails::TwoSided, &[5]).unwrap();
        assert_eq!(power.to_f64(), 1.0);
    }
}
