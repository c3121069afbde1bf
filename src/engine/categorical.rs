//! Categorical tests: chi-square, exact binomial, Fisher and exact multinomial
//!
//! Exact tests enumerate their reference set. Fisher's test ranks tables
//! by the product of their cell factorials, carried as decimals with
//! enough guard digits to absorb one rounding per factor; tables whose
//! probability matches the observed one within a small relative slack
//! count as at least as extreme. Both exact tests refuse grand totals
//! above the configured cap.

use super::{wrong_data, Outcome, RawDf, RawInterval, RunContext, Tails, TestData, TestType};
use crate::constants::MAX_BINOMIAL_TRIALS;
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::precision::distributions::{
    Beta, Binomial, ChiSquare, ContinuousDistribution, Hypergeometric, Normal,
};
use crate::precision::functions::{binomial, decimal_digits, exp, factorial_table, ln, sqrt};
use crate::precision::{Decimal, PrecisionContext};
use crate::validation::{validate_counts, validate_table};
use num_bigint::BigUint;
use tracing::debug;

/// Extra digits carried while summing many small probabilities
const ENUMERATION_GUARD_DIGITS: u32 = 7;

/// Relative slack when comparing point probabilities of exact reference sets
const RELATIVE_SLACK_DIGITS: u32 = 7;

pub fn run(run: &RunContext<'_>, test_type: TestType) -> Result<Outcome> {
    match test_type {
        TestType::ChiSquareGoodnessOfFit => goodness_of_fit(run),
        TestType::ChiSquareIndependence => independence(run),
        TestType::BinomialExact => binomial_exact(run),
        TestType::FisherExact => fisher_exact(run),
        TestType::ExactMultinomial => exact_multinomial(run),
        other => Err(EngineError::Internal(anyhow::anyhow!(
            "{other} dispatched to the categorical family"
        ))),
    }
}

// =============================================================================
// SHARED INPUT SHAPING
// =============================================================================

/// Observed counts and null probabilities of a `Frequencies` request
pub fn frequencies(run: &RunContext<'_>, test_type: TestType) -> Result<(Vec<u64>, Vec<Decimal>)> {
    let ctx = &run.ctx;
    let (observed, expected) = match &run.request.data {
        TestData::Frequencies { observed, expected } => (observed, expected),
        other => return Err(wrong_data(test_type, "frequencies", other)),
    };
    validate_counts(observed, 2).map_validation_err("observed")?;
    let probabilities = match expected {
        None => {
            let share = &ctx.int(1) / &ctx.uint(observed.len() as u64);
            vec![share; observed.len()]
        }
        Some(weights) => {
            if weights.len() != observed.len() {
                return Err(EngineError::validation(
                    "expected",
                    format!(
                        "expected has {} categories but observed has {}",
                        weights.len(),
                        observed.len()
                    ),
                ));
            }
            if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(EngineError::validation(
                    "expected",
                    "expected weights must be positive and finite",
                ));
            }
            let weights = ctx.values(weights, "expected")?;
            let total = super::sum(ctx, &weights);
            weights.iter().map(|w| w / &total).collect()
        }
    };
    Ok((observed.clone(), probabilities))
}

/// Contingency table of a request with its validated shape
pub fn contingency<'a>(run: &RunContext<'a>, test_type: TestType) -> Result<&'a [Vec<u64>]> {
    let request = run.request;
    match &request.data {
        TestData::Contingency { table } => {
            validate_table(table).map_validation_err("table")?;
            Ok(table.as_slice())
        }
        other => Err(wrong_data(test_type, "contingency", other)),
    }
}

/// Expected counts under independence, r_i * c_j / N
pub fn expected_counts(ctx: &PrecisionContext, table: &[Vec<u64>]) -> Vec<Vec<Decimal>> {
    let cols = table[0].len();
    let row_sums: Vec<u64> = table.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<u64> = (0..cols).map(|j| table.iter().map(|r| r[j]).sum()).collect();
    let total = ctx.uint(row_sums.iter().sum());
    row_sums
        .iter()
        .map(|&r| {
            col_sums
                .iter()
                .map(|&c| &(&ctx.uint(r) * &ctx.uint(c)) / &total)
                .collect()
        })
        .collect()
}

fn pearson_statistic<'a, I>(ctx: &PrecisionContext, cells: I) -> Decimal
where
    I: Iterator<Item = (u64, &'a Decimal)>,
{
    cells.fold(ctx.int(0), |acc, (o, e)| {
        let d = &ctx.uint(o) - e;
        &acc + &(&(&d * &d) / e)
    })
}

// =============================================================================
// CHI-SQUARE
// =============================================================================

fn goodness_of_fit(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let (observed, probabilities) = frequencies(run, TestType::ChiSquareGoodnessOfFit)?;
    let n = ctx.uint(observed.iter().sum());
    let expected: Vec<Decimal> = probabilities.iter().map(|p| p * &n).collect();
    let statistic = pearson_statistic(ctx, observed.iter().copied().zip(expected.iter()));
    let df = ctx.uint(observed.len() as u64 - 1);
    let p_value = ChiSquare::new(ctx, df.clone())?.sf(&statistic)?;
    Ok(Outcome::new("chi-square", statistic, p_value, "pearson chi-square goodness of fit")
        .with_df(RawDf::Scalar(df)))
}

fn independence(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let table = contingency(run, TestType::ChiSquareIndependence)?;
    let expected = expected_counts(ctx, table);
    let cells = table
        .iter()
        .zip(&expected)
        .flat_map(|(row, erow)| row.iter().copied().zip(erow.iter()));
    let statistic = pearson_statistic(ctx, cells);
    let df = ctx.uint(((table.len() - 1) * (table[0].len() - 1)) as u64);
    let p_value = ChiSquare::new(ctx, df.clone())?.sf(&statistic)?;
    Ok(Outcome::new("chi-square", statistic, p_value, "pearson chi-square independence")
        .with_df(RawDf::Scalar(df)))
}

// =============================================================================
// EXACT BINOMIAL
// =============================================================================

fn binomial_exact(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let (successes, trials) = match &run.request.data {
        TestData::Binomial { successes, trials } => (*successes, *trials),
        other => return Err(wrong_data(TestType::BinomialExact, "binomial", other)),
    };
    if trials == 0 {
        return Err(EngineError::validation("trials", "at least one trial is required"));
    }
    if trials > MAX_BINOMIAL_TRIALS {
        return Err(EngineError::validation(
            "trials",
            format!("too many trials: {trials} (max: {MAX_BINOMIAL_TRIALS})"),
        ));
    }
    if successes > trials {
        return Err(EngineError::validation("successes", "successes exceed trials"));
    }
    let p0 = run.option_f64("p0")?.unwrap_or_else(|| ctx.int(1).half());
    if !p0.is_positive() || p0 >= ctx.int(1) {
        return Err(EngineError::validation("p0", "null proportion must lie strictly between 0 and 1"));
    }

    let dist = Binomial::new(ctx, trials, p0.clone())?;
    let p_value = match run.tails() {
        Tails::Less => dist.cdf(successes)?,
        Tails::Greater => dist.sf_inclusive(successes)?,
        Tails::TwoSided => binomial_two_sided(ctx, &dist, &p0, successes)?,
    };

    let interval = clopper_pearson(run, successes, trials)?;
    Ok(Outcome::new("successes", ctx.uint(successes), p_value, "exact binomial")
        .with_interval(Some(interval)))
}

/// Two-sided p-value summing every outcome no more likely than the observed
///
/// The pmf is unimodal, so the outcomes on the far side of the mean that
/// qualify form a contiguous tail found by binary search.
fn binomial_two_sided(ctx: &PrecisionContext, dist: &Binomial, p0: &Decimal, x: u64) -> Result<Decimal> {
    let n = dist.trials();
    let mean = &ctx.uint(n) * p0;
    let observed = ctx.uint(x);
    if observed == mean {
        return Ok(ctx.int(1));
    }
    let slack = &ctx.int(1) + &ctx.epsilon(7);
    let threshold = &dist.pmf(x)? * &slack;

    if observed < mean {
        // first index at or above the mean whose mass is below the threshold
        let (mut lo, mut hi) = (mean_ceil(&mean), n + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if dist.pmf(mid)? <= threshold {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let upper = if lo > n { ctx.int(0) } else { dist.sf_inclusive(lo)? };
        Ok((&dist.cdf(x)? + &upper).min(ctx.int(1)))
    } else {
        // count of indices at or below the mean whose mass is below the threshold
        let floor = mean.floor().to_i64().unwrap_or(0).max(0) as u64;
        let (mut lo, mut hi) = (0u64, floor + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if dist.pmf(mid)? <= threshold {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let lower = if lo == 0 { ctx.int(0) } else { dist.cdf(lo - 1)? };
        Ok((&lower + &dist.sf_inclusive(x)?).min(ctx.int(1)))
    }
}

fn mean_ceil(mean: &Decimal) -> u64 {
    let floor = mean.floor();
    let base = floor.to_i64().unwrap_or(0).max(0) as u64;
    if &floor == mean {
        base
    } else {
        base + 1
    }
}

/// Clopper-Pearson interval from beta quantiles
fn clopper_pearson(run: &RunContext<'_>, x: u64, n: u64) -> Result<RawInterval> {
    let ctx = &run.ctx;
    let alpha = run.alpha();
    let one = ctx.int(1);
    let estimate = &ctx.uint(x) / &ctx.uint(n);

    let lower_at = |tail: &Decimal| -> Result<Decimal> {
        if x == 0 {
            return Ok(ctx.int(0));
        }
        Beta::new(ctx, ctx.uint(x), ctx.uint(n - x + 1))?.quantile(tail)
    };
    let upper_at = |tail: &Decimal| -> Result<Decimal> {
        if x == n {
            return Ok(ctx.int(1));
        }
        Beta::new(ctx, ctx.uint(x + 1), ctx.uint(n - x))?.quantile(tail)
    };

    let (lower, upper) = match run.tails() {
        Tails::TwoSided => (lower_at(&alpha.half())?, upper_at(&(&one - &alpha.half()))?),
        Tails::Greater => (lower_at(&alpha)?, one.clone()),
        Tails::Less => (ctx.int(0), upper_at(&(&one - &alpha))?),
    };
    Ok(RawInterval::new("proportion", estimate, Some(lower), Some(upper)))
}

// =============================================================================
// FISHER EXACT
// =============================================================================

/// Refuses exact enumeration over a grand total above the configured cap
fn check_exact_total(run: &RunContext<'_>, field: &str, total: u64, alternative: TestType) -> Result<()> {
    let cap = run.config.max_exact_total;
    if total > cap {
        return Err(EngineError::validation(
            field,
            format!("total count {total} exceeds the exact test limit of {cap}; use {alternative}"),
        ));
    }
    Ok(())
}

/// Walks every table with the margins of the observed one
struct TableEnumerator<'a> {
    factorials: &'a [Decimal],
    rows: usize,
    cols: usize,
    limit: usize,
    visited: usize,
}

impl TableEnumerator<'_> {
    /// Calls `visit` with the product of cell factorials of every table
    fn walk<F: FnMut(&Decimal)>(
        &mut self,
        row_rem: &mut [u64],
        col_rem: &mut [u64],
        cell: usize,
        acc: Decimal,
        visit: &mut F,
    ) -> Result<()> {
        let (i, j) = (cell / self.cols, cell % self.cols);
        if i == self.rows - 1 {
            // last row is forced by the column remainders
            let product = col_rem
                .iter()
                .fold(acc, |product, &c| &product * &self.factorials[c as usize]);
            self.visited += 1;
            if self.visited > self.limit {
                return Err(EngineError::validation(
                    "table",
                    format!(
                        "more than {} tables share these margins; use chi_square_independence",
                        self.limit
                    ),
                ));
            }
            visit(&product);
            return Ok(());
        }
        if j == self.cols - 1 {
            // last cell of a row takes the row remainder
            let v = row_rem[i];
            if v > col_rem[j] {
                return Ok(());
            }
            col_rem[j] -= v;
            row_rem[i] = 0;
            let next = &acc * &self.factorials[v as usize];
            let out = self.walk(row_rem, col_rem, cell + 1, next, visit);
            col_rem[j] += v;
            row_rem[i] = v;
            return out;
        }
        let room_right: u64 = col_rem[j + 1..].iter().sum();
        let lo = row_rem[i].saturating_sub(room_right);
        let hi = row_rem[i].min(col_rem[j]);
        for v in lo..=hi {
            row_rem[i] -= v;
            col_rem[j] -= v;
            let out = self.walk(row_rem, col_rem, cell + 1, &acc * &self.factorials[v as usize], visit);
            row_rem[i] += v;
            col_rem[j] += v;
            out?;
        }
        Ok(())
    }
}

fn fisher_exact(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let table = contingency(run, TestType::FisherExact)?;
    let (rows, cols) = (table.len(), table[0].len());
    let is_2x2 = rows == 2 && cols == 2;
    if run.tails() != Tails::TwoSided && !is_2x2 {
        return Err(EngineError::validation(
            "tails",
            "one-sided fisher exact test is only defined for 2x2 tables",
        ));
    }

    // validated: the grand total fits in a u64
    let row_sums: Vec<u64> = table.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<u64> = (0..cols).map(|j| table.iter().map(|r| r[j]).sum()).collect();
    let total: u64 = row_sums.iter().sum();
    check_exact_total(run, "table", total, TestType::ChiSquareIndependence)?;

    let (observed_probability, p_value) = match run.tails() {
        Tails::TwoSided => {
            let wide = ctx.widened(ENUMERATION_GUARD_DIGITS + decimal_digits(total));
            let facts = factorial_table(total, wide.working_digits());
            let numerator = &row_sums
                .iter()
                .chain(&col_sums)
                .fold(wide.int(1), |acc, &m| &acc * &facts[m as usize])
                / &facts[total as usize];
            let observed_product = table
                .iter()
                .flatten()
                .fold(wide.int(1), |acc, &c| &acc * &facts[c as usize]);
            // P(T) <= P(obs) (1 + slack) exactly when prod(T) >= prod(obs) / (1 + slack)
            let cutoff = &observed_product / &(&wide.int(1) + &wide.epsilon(RELATIVE_SLACK_DIGITS));

            let mut sum = wide.int(0);
            let mut enumerator = TableEnumerator {
                factorials: &facts,
                rows,
                cols,
                limit: run.config.max_exact_tables,
                visited: 0,
            };
            let mut row_rem = row_sums.clone();
            let mut col_rem = col_sums.clone();
            enumerator.walk(&mut row_rem, &mut col_rem, 0, wide.int(1), &mut |product| {
                if *product >= cutoff {
                    sum = &sum + &(&numerator / product);
                }
            })?;
            debug!(tables = enumerator.visited, total, "fisher reference set enumerated");
            (
                (&numerator / &observed_product).with_prec(ctx.working_digits()),
                sum.with_prec(ctx.working_digits()).min(ctx.int(1)),
            )
        }
        tails => {
            let dist = Hypergeometric::new(ctx, total, row_sums[0], col_sums[0])?;
            let a = table[0][0];
            let p_value = match tails {
                Tails::Less => dist.cdf(a),
                _ => dist.sf_inclusive(a),
            };
            (dist.pmf(a), p_value)
        }
    };

    let mut outcome = Outcome::new("table probability", observed_probability, p_value, "fisher exact");
    if is_2x2 {
        let (interval, corrected) = woolf_interval(run, table)?;
        outcome = outcome.with_interval(Some(interval));
        if corrected {
            outcome = outcome.with_note("zero cell: odds ratio uses the Haldane 0.5 correction");
        }
    }
    Ok(outcome)
}

/// Log odds-ratio interval for a 2x2 table
fn woolf_interval(run: &RunContext<'_>, table: &[Vec<u64>]) -> Result<(RawInterval, bool)> {
    let ctx = &run.ctx;
    let corrected = table.iter().flatten().any(|&c| c == 0);
    let cell = |i: usize, j: usize| {
        let v = ctx.uint(table[i][j]);
        if corrected {
            &v + &ctx.int(1).half()
        } else {
            v
        }
    };
    let (a, b, c, d) = (cell(0, 0), cell(0, 1), cell(1, 0), cell(1, 1));
    let odds_ratio = &(&a * &d) / &(&b * &c);
    let one = ctx.int(1);
    let var = &(&(&(&one / &a) + &(&one / &b)) + &(&one / &c)) + &(&one / &d);
    let se = sqrt(ctx, &var)?;
    let z = Normal::standard(ctx)?.quantile(&run.critical_probability())?;
    let log_or = ln(ctx, &odds_ratio)?;
    let margin = &z * &se;
    let lower = exp(ctx, &(&log_or - &margin))?;
    let upper = exp(ctx, &(&log_or + &margin))?;
    let (lower, upper) = match run.tails() {
        Tails::TwoSided => (Some(lower), Some(upper)),
        Tails::Greater => (Some(lower), None),
        Tails::Less => (None, Some(upper)),
    };
    Ok((RawInterval::new("odds ratio", odds_ratio, lower, upper), corrected))
}

// =============================================================================
// EXACT MULTINOMIAL
// =============================================================================

fn exact_multinomial(run: &RunContext<'_>) -> Result<Outcome> {
    let ctx = &run.ctx;
    let (observed, probabilities) = frequencies(run, TestType::ExactMultinomial)?;
    let total: u64 = observed.iter().sum();
    check_exact_total(run, "observed", total, TestType::ChiSquareGoodnessOfFit)?;
    let k = observed.len() as u64;

    let outcomes = binomial(total + k - 1, k - 1);
    if outcomes > BigUint::from(run.config.max_exact_tables) {
        return Err(EngineError::validation(
            "observed",
            format!(
                "{outcomes} outcomes exceed the enumeration limit of {}; use chi_square_goodness_of_fit",
                run.config.max_exact_tables
            ),
        ));
    }

    let wide = ctx.widened(ENUMERATION_GUARD_DIGITS + decimal_digits(total));
    let wp = wide.working_digits();
    let probabilities: Vec<Decimal> = probabilities.iter().map(|p| p.with_prec(wp)).collect();
    let facts = factorial_table(total, wp);
    let n_fact = &facts[total as usize];

    // N! prod p_i^x_i / x_i!
    let observed_term = observed
        .iter()
        .zip(&probabilities)
        .fold(wide.int(1), |acc, (&x, p)| &(&acc * &p.powi(x as i64)) / &facts[x as usize]);
    let observed_probability = n_fact * &observed_term;
    let cutoff = &observed_term * &(&wide.int(1) + &wide.epsilon(RELATIVE_SLACK_DIGITS));

    let mut sum = wide.int(0);
    compositions(&probabilities, 0, total, wide.int(1), &mut |term| {
        if *term <= cutoff {
            sum = &sum + term;
        }
    });
    let p_value = (&sum * n_fact).with_prec(ctx.working_digits()).min(ctx.int(1));

    Ok(Outcome::new(
        "outcome probability",
        observed_probability.with_prec(ctx.working_digits()),
        p_value,
        "exact multinomial",
    ))
}

/// Visits prod p_i^x_i / x_i! for every composition of `remaining`
fn compositions<F: FnMut(&Decimal)>(
    probabilities: &[Decimal],
    index: usize,
    remaining: u64,
    acc: Decimal,
    visit: &mut F,
) {
    let p = &probabilities[index];
    if index == probabilities.len() - 1 {
        let mut term = acc;
        for x in 1..=remaining {
            term = &(&term * p) / &Decimal::from_u64(x, p.prec());
        }
        visit(&term);
        return;
    }
    // term for x_i = 0, 1, ... built incrementally
    let mut term = acc;
    for x in 0..=remaining {
        if x > 0 {
            term = &(&term * p) / &Decimal::from_u64(x, p.prec());
        }
        compositions(probabilities, index + 1, remaining - x, term.clone(), visit);
    }
}
