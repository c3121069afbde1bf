//! Rank-based tests: Mann-Whitney U, Wilcoxon signed-rank and Kruskal-Wallis
//!
//! Small untied samples use the exact null distribution, built as the
//! coefficients of a generating polynomial with big-integer counts. Ties,
//! zero differences or large samples fall back to the tie-corrected normal
//! approximation with a continuity correction.

use super::{
    median_sorted, midranks, wrong_data, Outcome, RawDf, RawInterval, RunContext, Tails, TestData,
    TestType, MAX_PAIRWISE_TERMS,
};
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::precision::distributions::{ChiSquare, ContinuousDistribution, Normal};
use crate::precision::functions::sqrt;
use crate::precision::{Decimal, PrecisionContext};
use crate::validation::{validate_group_count, validate_sample};
use num_bigint::BigInt;
use num_traits::{One, Zero};

/// Largest generating polynomial degree built when exact mode is forced
const MAX_EXACT_DISTRIBUTION_DEGREE: usize = 250_000;

pub fn run(run: &RunContext<'_>, test_type: TestType) -> Result<Outcome> {
    match test_type {
        TestType::MannWhitneyU => mann_whitney(run),
        TestType::WilcoxonSignedRank => signed_rank(run),
        TestType::KruskalWallis => kruskal_wallis(run),
        other => Err(EngineError::Internal(anyhow::anyhow!(
            "{other} dispatched to the rank family"
        ))),
    }
}

// =============================================================================
// EXACT NULL DISTRIBUTIONS
// =============================================================================

/// Integer-valued null distribution held as exact counts
#[derive(Debug, Clone)]
pub struct ExactDistribution {
    counts: Vec<BigInt>,
    total: BigInt,
}

impl ExactDistribution {
    fn from_counts(counts: Vec<BigInt>) -> Self {
        let total = counts.iter().sum();
        Self { counts, total }
    }

    /// Mann-Whitney U for sample sizes `m` and `n`
    ///
    /// Coefficients of the Gaussian binomial [m+n choose m]_q, built as
    /// prod (1 - q^(n+i)) / (1 - q^i) for i = 1..m.
    pub fn mann_whitney(m: usize, n: usize) -> Self {
        let degree = m * n;
        // the product overshoots the quotient's degree by i before dividing
        let mut c = vec![BigInt::zero(); degree + m + 1];
        c[0] = BigInt::one();
        let mut top = 0usize;
        for i in 1..=m {
            let up = n + i;
            let product_top = top + up;
            for k in (up..=product_top).rev() {
                let lower = c[k - up].clone();
                c[k] -= lower;
            }
            for k in i..=product_top {
                let lower = c[k - i].clone();
                c[k] += lower;
            }
            top += n;
        }
        c.truncate(degree + 1);
        Self::from_counts(c)
    }

    /// Wilcoxon signed-rank T+ for `n` nonzero differences: prod (1 + q^i)
    pub fn signed_rank(n: usize) -> Self {
        let degree = n * (n + 1) / 2;
        let mut c = vec![BigInt::zero(); degree + 1];
        c[0] = BigInt::one();
        let mut current = 0usize;
        for i in 1..=n {
            current += i;
            for k in (i..=current).rev() {
                let lower = c[k - i].clone();
                c[k] += lower;
            }
        }
        Self::from_counts(c)
    }

    pub fn max(&self) -> usize {
        self.counts.len() - 1
    }

    fn ratio(&self, ctx: &PrecisionContext, count: BigInt) -> Decimal {
        let wp = ctx.working_digits();
        &Decimal::from_bigint(count, wp) / &Decimal::from_bigint(self.total.clone(), wp)
    }

    /// P(X <= k)
    pub fn cdf(&self, ctx: &PrecisionContext, k: usize) -> Decimal {
        let upto = k.min(self.max());
        self.ratio(ctx, self.counts[..=upto].iter().sum())
    }

    /// P(X >= k)
    pub fn sf_inclusive(&self, ctx: &PrecisionContext, k: usize) -> Decimal {
        if k > self.max() {
            return ctx.int(0);
        }
        self.ratio(ctx, self.counts[k..].iter().sum())
    }

    /// Smallest q with P(X <= q) >= p
    pub fn quantile(&self, ctx: &PrecisionContext, p: &Decimal) -> usize {
        let mut acc = BigInt::zero();
        for (q, count) in self.counts.iter().enumerate() {
            acc += count;
            if self.ratio(ctx, acc.clone()) >= *p {
                return q;
            }
        }
        self.max()
    }

    /// Exact p-value of an observed value, doubling the nearer tail
    fn p_value(&self, ctx: &PrecisionContext, tails: Tails, observed: usize) -> Decimal {
        match tails {
            Tails::Less => self.cdf(ctx, observed),
            Tails::Greater => self.sf_inclusive(ctx, observed),
            Tails::TwoSided => {
                let one_tail = if 2 * observed > self.max() {
                    self.sf_inclusive(ctx, observed)
                } else {
                    self.cdf(ctx, observed)
                };
                (one_tail * 2).min(ctx.int(1))
            }
        }
    }
}

// =============================================================================
// SHARED PIECES
// =============================================================================

/// Sum of t^3 - t over tie groups
fn tie_term(ctx: &PrecisionContext, ties: &[u64]) -> Decimal {
    ties.iter().fold(ctx.int(0), |acc, &t| &acc + &cubic_excess(ctx, t))
}

/// t^3 - t without leaving decimal arithmetic
fn cubic_excess(ctx: &PrecisionContext, t: u64) -> Decimal {
    let t = ctx.uint(t);
    &(&(&t * &t) * &t) - &t
}

/// Continuity-corrected normal p-value for `centred` = statistic - mean
fn normal_p_value(ctx: &PrecisionContext, tails: Tails, centred: &Decimal, sigma: &Decimal) -> Result<Decimal> {
    let half = ctx.int(1).half();
    let correction = match tails {
        Tails::TwoSided => match centred.signum() {
            1 => half,
            -1 => -half,
            _ => ctx.int(0),
        },
        Tails::Greater => half,
        Tails::Less => -half,
    };
    let z = &(centred - &correction) / sigma;
    let normal = Normal::standard(ctx)?;
    Ok(match tails {
        Tails::Less => normal.cdf(&z)?,
        Tails::Greater => normal.sf(&z)?,
        Tails::TwoSided => {
            let tail = if z.is_negative() { normal.cdf(&z)? } else { normal.sf(&z)? };
            (tail * 2).min(ctx.int(1))
        }
    })
}

/// Decide exact versus normal from the data and the `exact` option
fn use_exact(run: &RunContext<'_>, untied: bool, small: bool, degree: usize) -> Result<(bool, Option<String>)> {
    let requested = run.request.option_bool("exact")?;
    Ok(match requested {
        Some(false) => (false, None),
        Some(true) if !untied => (
            false,
            Some("exact distribution unavailable with ties or zeros; normal approximation used".into()),
        ),
        Some(true) if degree > MAX_EXACT_DISTRIBUTION_DEGREE => (
            false,
            Some("sample too large for the exact distribution; normal approximation used".into()),
        ),
        Some(true) => (true, None),
        None => (untied && small, None),
    })
}

/// Confidence bounds from sorted pairwise terms
///
/// `lower_rank` is the 1-based rank of the lower bound; the upper bound
/// mirrors it from the top of the sorted list.
fn order_statistic_interval(
    run: &RunContext<'_>,
    parameter: &str,
    sorted: &[Decimal],
    lower_rank: usize,
    estimate: Decimal,
) -> RawInterval {
    let total = sorted.len();
    let lower_rank = lower_rank.clamp(1, total);
    let lower = sorted[lower_rank - 1].clone();
    let upper = sorted[total - lower_rank].clone();
    let (lower, upper) = match run.tails() {
        Tails::TwoSided => (Some(lower), Some(upper)),
        Tails::Greater => (Some(lower), None),
        Tails::Less => (None, Some(upper)),
    };
    RawInterval::new(parameter, estimate, lower, upper)
}

/// Normal order-statistic rank for a pairwise-term interval
fn approximate_rank(run: &RunContext<'_>, mean: &Decimal, sigma: &Decimal) -> Result<usize> {
    let ctx = &run.ctx;
    let z = Normal::standard(ctx)?.quantile(&run.critical_probability())?;
    let rank = (mean - &(&z * sigma)).floor();
    Ok(rank.to_i64().unwrap_or(0).max(1) as usize)
}

/// Exact rank of the lower bound, as with quantile(alpha/2)
fn exact_rank(run: &RunContext<'_>, dist: &ExactDistribution) -> usize {
    let tail = match run.tails() {
        Tails::TwoSided => run.alpha().half(),
        Tails::Less | Tails::Greater => run.alpha(),
    };
    dist.quantile(&run.ctx, &tail).max(1)
}

// =============================================================================
// MANN-WHITNEY U
// =============================================================================

fn mann_whitney(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let groups = match &run.request.data {
        TestData::Samples { groups } => groups,
        other => return Err(wrong_data(TestType::MannWhitneyU, "samples", other)),
    };
    validate_group_count(groups.len(), 2, Some(2)).map_validation_err("groups")?;
    for g in groups {
        validate_sample(&g.values, 1).map_validation_err("groups")?;
    }
    let x = ctx.values(&groups[0].values, "values")?;
    let y = ctx.values(&groups[1].values, "values")?;
    let (m, n) = (x.len(), y.len());

    let combined: Vec<Decimal> = x.iter().chain(&y).cloned().collect();
    let (ranks, ties) = midranks(ctx, &combined);
    let r1 = super::sum(ctx, &ranks[..m]);
    let (dm, dn) = (ctx.uint(m as u64), ctx.uint(n as u64));
    let u = &r1 - &(&dm * &(&dm + 1)).half();
    let mn = &dm * &dn;
    let mean_u = mn.half();
    let total_n = &dm + &dn;
    let var_u = &(&mn / &ctx.int(12))
        * &(&(&total_n + 1)
            - &(&tie_term(ctx, &ties) / &(&total_n * &(&total_n - 1)).max(ctx.int(1))));
    let sigma = sqrt(ctx, &var_u)?;
    if !sigma.is_positive() {
        return Err(EngineError::validation("groups", "all observations are tied"));
    }

    let limit = run.config.exact_rank_limit;
    let (exact, note) = use_exact(run, ties.is_empty(), m <= limit && n <= limit, m * n)?;
    let (p_value, dist, method) = if exact {
        let dist = ExactDistribution::mann_whitney(m, n);
        let observed = u.to_i64().unwrap_or(0).max(0) as usize;
        (dist.p_value(ctx, run.tails(), observed), Some(dist), "exact")
    } else {
        let p = normal_p_value(ctx, run.tails(), &(&u - &mean_u), &sigma)?;
        (p, None, "normal approximation with tie correction")
    };

    // Hodges-Lehmann shift
    let mut outcome = Outcome::new("U", u, p_value, &format!("mann-whitney u, {method}"));
    if m * n > MAX_PAIRWISE_TERMS {
        outcome = outcome.with_note("too many pairwise differences for the hodges-lehmann interval");
    } else {
        let mut diffs: Vec<Decimal> = x.iter().flat_map(|a| y.iter().map(move |b| a - b)).collect();
        diffs.sort();
        let estimate = median_sorted(ctx, &diffs);
        let rank = match &dist {
            Some(d) => exact_rank(run, d),
            None => approximate_rank(run, &mean_u, &sigma)?,
        };
        outcome = outcome.with_interval(Some(order_statistic_interval(
            run,
            "location shift",
            &diffs,
            rank,
            estimate,
        )));
    }
    if let Some(note) = note {
        outcome = outcome.with_note(note);
    }
    Ok(outcome)
}

// =============================================================================
// WILCOXON SIGNED-RANK
// =============================================================================

fn signed_rank(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let shifted: Vec<Decimal> = match &run.request.data {
        TestData::Paired { first, second } => {
            super::require_finite_pairs(first, second, 1)?;
            let a = ctx.values(first, "first")?;
            let b = ctx.values(second, "second")?;
            a.iter().zip(&b).map(|(x, y)| x - y).collect()
        }
        TestData::Samples { groups } => {
            validate_group_count(groups.len(), 1, Some(1)).map_validation_err("groups")?;
            validate_sample(&groups[0].values, 1).map_validation_err("groups")?;
            ctx.values(&groups[0].values, "values")?
        }
        other => return Err(wrong_data(TestType::WilcoxonSignedRank, "paired or one-sample", other)),
    };
    let mu = run.option_f64("mu")?.unwrap_or_else(|| ctx.int(0));

    let centred: Vec<Decimal> = shifted.iter().map(|d| d - &mu).filter(|d| !d.is_zero()).collect();
    let zeros = shifted.len() - centred.len();
    let n = centred.len();
    if n == 0 {
        return Err(EngineError::validation("data", "every difference equals the hypothesized value"));
    }

    let magnitudes: Vec<Decimal> = centred.iter().map(Decimal::abs).collect();
    let (ranks, ties) = midranks(ctx, &magnitudes);
    let t_plus = centred
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| d.is_positive())
        .fold(ctx.int(0), |acc, (_, r)| &acc + r);

    let nn = ctx.uint(n as u64);
    let triangle = &nn * &(&nn + 1);
    let mean_t = triangle.half().half();
    let var_t = &(&(&triangle * &(&(&nn * 2) + 1)) / &ctx.int(24)) - &(&tie_term(ctx, &ties) / &ctx.int(48));
    let sigma = sqrt(ctx, &var_t)?;
    if !sigma.is_positive() {
        return Err(EngineError::validation("data", "all differences are tied"));
    }

    let untied = ties.is_empty() && zeros == 0;
    let (exact, note) = use_exact(run, untied, n <= run.config.exact_rank_limit, n * (n + 1) / 2)?;
    let (p_value, dist, method) = if exact {
        let dist = ExactDistribution::signed_rank(n);
        let observed = t_plus.to_i64().unwrap_or(0).max(0) as usize;
        (dist.p_value(ctx, run.tails(), observed), Some(dist), "exact")
    } else {
        let p = normal_p_value(ctx, run.tails(), &(&t_plus - &mean_t), &sigma)?;
        (p, None, "normal approximation with tie correction")
    };

    let mut outcome = Outcome::new("T+", t_plus, p_value, &format!("wilcoxon signed-rank, {method}"));
    if zeros > 0 {
        outcome = outcome.with_note(format!("{zeros} zero difference(s) dropped before ranking"));
    }

    // Walsh averages of the differences on their original scale
    let walsh_count = shifted.len() * (shifted.len() + 1) / 2;
    if walsh_count > MAX_PAIRWISE_TERMS {
        outcome = outcome.with_note("too many walsh averages for the hodges-lehmann interval");
    } else {
        let mut walsh = Vec::with_capacity(walsh_count);
        for i in 0..shifted.len() {
            for j in i..shifted.len() {
                walsh.push((&shifted[i] + &shifted[j]).half());
            }
        }
        walsh.sort();
        let estimate = median_sorted(ctx, &walsh);
        let rank = match &dist {
            Some(d) => exact_rank(run, d),
            None => approximate_rank(run, &mean_t, &sigma)?,
        };
        outcome = outcome.with_interval(Some(order_statistic_interval(
            run,
            "pseudo-median",
            &walsh,
            rank,
            estimate,
        )));
    }
    if let Some(note) = note {
        outcome = outcome.with_note(note);
    }
    Ok(outcome)
}

// =============================================================================
// KRUSKAL-WALLIS
// =============================================================================

fn kruskal_wallis(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let groups = match &run.request.data {
        TestData::Samples { groups } => groups,
        other => return Err(wrong_data(TestType::KruskalWallis, "samples", other)),
    };
    validate_group_count(groups.len(), 2, None).map_validation_err("groups")?;
    let mut combined = Vec::new();
    let mut sizes = Vec::with_capacity(groups.len());
    for g in groups {
        validate_sample(&g.values, 1).map_validation_err("groups")?;
        combined.extend(ctx.values(&g.values, "values")?);
        sizes.push(g.values.len());
    }
    let total = combined.len() as u64;
    let (ranks, ties) = midranks(ctx, &combined);

    let mut weighted = ctx.int(0);
    let mut offset = 0;
    for &size in &sizes {
        let r = super::sum(ctx, &ranks[offset..offset + size]);
        weighted = &weighted + &(&(&r * &r) / &ctx.uint(size as u64));
        offset += size;
    }
    let big_n = ctx.uint(total);
    let h_raw = &(&(&ctx.int(12) / &(&big_n * &(&big_n + 1))) * &weighted) - &(&(&big_n + 1) * 3);
    let correction = &ctx.int(1) - &(&tie_term(ctx, &ties) / &cubic_excess(ctx, total));
    if !correction.is_positive() {
        return Err(EngineError::validation("groups", "all observations are tied"));
    }
    let h = &h_raw / &correction;

    let df = ctx.uint(groups.len() as u64 - 1);
    let p_value = ChiSquare::new(ctx, df.clone())?.sf(&h)?;
    let mut outcome = Outcome::new("H", h, p_value, "kruskal-wallis").with_df(RawDf::Scalar(df));
    if !ties.is_empty() {
        outcome = outcome.with_note("H corrected for ties");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestEngine, TestRequest};
    use crate::precision::RoundingMode;
    use serde_json::json;

    fn two_groups(a: Vec<f64>, b: Vec<f64>) -> TestData {
        TestData::Samples {
            groups: vec![Sample::new("a", a), Sample::new("b", b)],
        }
    }

    #[test]
    fn test_exact_distributions_sum_to_all_arrangements() {
        let mw = ExactDistribution::mann_whitney(3, 4);
        // C(7, 3) arrangements, symmetric about mn/2
        assert_eq!(mw.total, BigInt::from(35));
        assert_eq!(mw.max(), 12);
        assert_eq!(mw.counts[0], mw.counts[12]);
        assert_eq!(mw.counts[5], mw.counts[7]);

        let sr = ExactDistribution::signed_rank(4);
        assert_eq!(sr.total, BigInt::from(16));
        // T+ = 5 from {1,4} and {2,3}
        assert_eq!(sr.counts[5], BigInt::from(2));
    }

    #[test]
    fn test_tie_term_is_exact_beyond_u64() {
        let ctx = PrecisionContext::new(30, RoundingMode::HalfEven).unwrap();
        assert_eq!(tie_term(&ctx, &[2, 3]).to_string(), "30");
        // 3_000_000^3 overflows u64
        let big = tie_term(&ctx, &[3_000_000, 2]);
        assert_eq!(big, Decimal::parse("26999999999997000006", 30).unwrap());
    }

    #[test]
    fn test_exact_quantile() {
        let ctx = PrecisionContext::new(10, RoundingMode::HalfEven).unwrap();
        let sr = ExactDistribution::signed_rank(10);
        let q = sr.quantile(&ctx, &Decimal::parse("0.025", ctx.working_digits()).unwrap());
        // qsignrank(0.025, 10) = 9
        assert_eq!(q, 9);
    }

    #[test]
    fn test_mann_whitney_exact_separation() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::MannWhitneyU,
            two_groups(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![6.0, 7.0, 8.0, 9.0, 10.0]),
        );
        let result = engine.execute(TestType::MannWhitneyU, &request).unwrap();
        assert_eq!(result.statistic.to_string(), "0");
        // 2 / C(10, 5)
        assert_eq!(result.p_value.to_string(), "0.00793650793650794");
        assert!(result.method.contains("exact"));
        let ci = result.confidence_interval.unwrap();
        assert_eq!(ci.estimate.to_string(), "-5");
        assert!(ci.lower.unwrap().raw() <= ci.upper.unwrap().raw());
    }

    #[test]
    fn test_mann_whitney_ties_use_normal() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::MannWhitneyU,
            two_groups(vec![1.0, 2.0, 2.0, 3.0], vec![2.0, 3.0, 4.0, 4.0]),
        );
        let result = engine.execute(TestType::MannWhitneyU, &request).unwrap();
        assert!(result.method.contains("normal"));
        let p = result.p_value.to_f64();
        assert!(p > 0.0 && p <= 1.0);
    }

    #[test]
    fn test_forced_exact_with_ties_leaves_note() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::MannWhitneyU,
            two_groups(vec![1.0, 2.0, 2.0], vec![2.0, 3.0, 4.0]),
        )
        .with_option("exact", json!(true));
        let result = engine.execute(TestType::MannWhitneyU, &request).unwrap();
        assert!(result.notes.iter().any(|n| n.contains("ties")));
    }

    #[test]
    fn test_signed_rank_all_positive() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::WilcoxonSignedRank,
            TestData::Samples {
                groups: vec![Sample::new("d", vec![1.0, 2.0, 3.0, 4.0, 5.0])],
            },
        );
        let result = engine.execute(TestType::WilcoxonSignedRank, &request).unwrap();
        assert_eq!(result.statistic_name, "T+");
        assert_eq!(result.statistic.to_string(), "15");
        // 2 / 2^5
        assert_eq!(result.p_value.to_string(), "0.0625000000000000");
        assert_eq!(result.confidence_interval.unwrap().estimate.to_string(), "3");
    }

    #[test]
    fn test_signed_rank_paired_drops_zeros() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::WilcoxonSignedRank,
            TestData::Paired {
                first: vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0],
                second: vec![5.0, 4.0, 8.0, 5.0, 5.0, 4.0],
            },
        );
        let result = engine.execute(TestType::WilcoxonSignedRank, &request).unwrap();
        assert!(result.notes.iter().any(|n| n.contains("zero difference")));
        assert!(result.method.contains("normal"));
    }

    #[test]
    fn test_kruskal_wallis_reference() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::KruskalWallis,
            TestData::Samples {
                groups: vec![
                    Sample::new("a", vec![1.0, 2.0, 3.0]),
                    Sample::new("b", vec![4.0, 5.0, 6.0]),
                    Sample::new("c", vec![7.0, 8.0, 9.0]),
                ],
            },
        );
        let result = engine.execute(TestType::KruskalWallis, &request).unwrap();
        assert_eq!(result.statistic.to_string(), "7.20000000000000");
        // chi-square(2) survival at 7.2 is e^-3.6
        assert_eq!(result.p_value.to_string(), "0.0273237224472926");
    }

    #[test]
    fn test_kruskal_wallis_all_tied_rejected() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::KruskalWallis,
            TestData::Samples {
                groups: vec![Sample::new("a", vec![1.0, 1.0]), Sample::new("b", vec![1.0, 1.0])],
            },
        );
        assert!(engine.execute(TestType::KruskalWallis, &request).is_err());
    }
}
