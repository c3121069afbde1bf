//! Noncentral t, chi-square and F distributions
//!
//! Used by the power analysis module. All three are Poisson (or
//! half-Poisson) mixtures of central incomplete beta/gamma terms; successive
//! terms are produced by forward recurrences so that only the first term
//! needs a full special-function evaluation.

use super::distributions::{ContinuousDistribution, Normal};
use super::functions::{beta_inc, exp, gamma_inc, ln, ln_beta, ln_gamma, pi, sqrt};
use super::{Decimal, PrecisionContext};
use crate::errors::{EngineError, Result};

/// P(T <= t) for the noncentral t distribution (Lenth's AS 243 series)
pub fn noncentral_t_cdf(
    ctx: &PrecisionContext,
    t: &Decimal,
    df: &Decimal,
    delta: &Decimal,
) -> Result<Decimal> {
    if !df.is_positive() {
        return Err(EngineError::validation("degrees_of_freedom", "must be positive"));
    }
    let wp = ctx.working_digits();
    let one = Decimal::one(wp);
    let (tt, del, negated) = if t.is_negative() {
        (-t, -delta, true)
    } else {
        (t.clone(), delta.clone(), false)
    };

    let normal = Normal::standard(ctx)?;
    let mut total = normal.cdf(&-&del)?;

    if tt.is_positive() {
        let wide = ctx.widened(5);
        let ep = wide.working_digits();
        let t2 = &tt * &tt;
        let x = &t2 / &(&t2 + df);
        let y = &one.with_prec(ep) - &x;
        let lambda = &del * &del;

        let mut a = one.with_prec(ep).half();
        let b = df.half();
        let mut p = exp(&wide, &-lambda.half())?.half();
        let root_two_over_pi = sqrt(&wide, &(&wide.int(2) / &pi(&wide)))?;
        let mut q = &(&root_two_over_pi * &p) * &del;
        let mut remaining = &one.with_prec(ep).half() - &p;

        let rxb = exp(&wide, &(&b * &ln(&wide, &y)?))?;
        let (mut xodd, _) = beta_inc(&wide, &a, &b, &x, &y)?;
        let log_beta_half = ln_beta(&wide, &a, &b)?;
        let mut godd = &(&rxb * 2) * &exp(&wide, &(&(&a * &ln(&wide, &x)?) - &log_beta_half))?;
        let mut xeven = &one.with_prec(ep) - &rxb;
        let mut geven = &(&b * &x) * &rxb;
        let mut sum = &(&p * &xodd) + &(&q * &xeven);

        let eps = wide.epsilon(ep - 3);
        let mut j: i64 = 0;
        loop {
            j += 1;
            if j as usize > wide.max_series_iterations {
                return Err(ctx.overflow(j as usize, "noncentral t series"));
            }
            a = &a + 1;
            xodd = &xodd - &godd;
            xeven = &xeven - &geven;
            godd = &godd * &(&(&x * &(&(&a + &b) - 1)) / &a);
            geven = &geven * &(&(&x * &(&(&a + &b) - &one.half())) / &(&a + &one.half()));
            p = &p * &(&lambda / &wide.int(2 * j));
            q = &q * &(&lambda / &wide.int(2 * j + 1));
            remaining = &remaining - &p;
            sum = &sum + &(&(&p * &xodd) + &(&q * &xeven));
            let bound = &(&remaining * 2) * &(&xodd - &godd);
            if bound.abs() <= eps && (j as f64) > lambda.to_f64() / 2.0 {
                break;
            }
        }
        total = &total + &sum;
    }

    let clamped = total.with_prec(wp).max(Decimal::zero(wp)).min(one.clone());
    Ok(if negated { &one - &clamped } else { clamped })
}

/// P(T > t) for the noncentral t distribution
pub fn noncentral_t_sf(
    ctx: &PrecisionContext,
    t: &Decimal,
    df: &Decimal,
    delta: &Decimal,
) -> Result<Decimal> {
    // reflect so the computed tail is the lower one: P(T > t; δ) = P(T < -t; -δ)
    noncentral_t_cdf(ctx, &-t, df, &-delta)
}

/// Poisson mixture of a central family whose regularized lower tails obey
/// `L(j+1) = L(j) - term(j)` with `term(j+1) = term(j) * ratio(j)`.
fn poisson_mixture<R>(
    ctx: &PrecisionContext,
    half_lambda: &Decimal,
    lower0: Decimal,
    upper0: Decimal,
    term0: Decimal,
    ratio: R,
    routine: &str,
) -> Result<(Decimal, Decimal)>
where
    R: Fn(i64) -> Decimal,
{
    let wp = ctx.working_digits();
    let one = Decimal::one(wp);
    let eps = ctx.epsilon(wp - 3);
    let mut weight = exp(ctx, &-half_lambda)?;
    let mut mass = weight.clone();
    let (mut lower, mut upper, mut term) = (lower0, upper0, term0);
    let mut cdf = &weight * &lower;
    let mut sf = &weight * &upper;
    let mut j: i64 = 0;
    loop {
        j += 1;
        if j as usize > ctx.max_series_iterations {
            return Err(ctx.overflow(j as usize, routine));
        }
        lower = &lower - &term;
        upper = &upper + &term;
        term = &term * &ratio(j - 1);
        weight = &weight * &(half_lambda / &ctx.int(j));
        mass = &mass + &weight;
        cdf = &cdf + &(&weight * &lower);
        sf = &sf + &(&weight * &upper);
        let rest = &one - &mass;
        if (j as f64) > half_lambda.to_f64() && rest <= eps {
            // unassigned mass sits almost entirely in the upper tail
            sf = &sf + &rest.max(Decimal::zero(wp));
            break;
        }
    }
    Ok((
        cdf.max(Decimal::zero(wp)).min(one.clone()),
        sf.max(Decimal::zero(wp)).min(one),
    ))
}

/// (P(X <= x), P(X > x)) for the noncentral chi-square with noncentrality λ
pub fn noncentral_chi_square_tails(
    ctx: &PrecisionContext,
    x: &Decimal,
    df: &Decimal,
    lambda: &Decimal,
) -> Result<(Decimal, Decimal)> {
    let wp = ctx.working_digits();
    if !df.is_positive() || lambda.is_negative() {
        return Err(EngineError::validation(
            "noncentrality",
            "degrees of freedom must be positive and noncentrality non-negative",
        ));
    }
    if !x.is_positive() {
        return Ok((Decimal::zero(wp), Decimal::one(wp)));
    }
    let wide = ctx.widened(5);
    let a0 = df.half();
    let y = x.half();
    let (p0, q0) = gamma_inc(&wide, &a0, &y)?;
    if lambda.is_zero() {
        return Ok((p0.with_prec(wp), q0.with_prec(wp)));
    }
    // y^a e^-y / Γ(a+1)
    let ln_y = ln(&wide, &y)?;
    let term0 = exp(&wide, &(&(&(&a0 * &ln_y) - &y) - &ln_gamma(&wide, &(&a0 + 1))?))?;
    let ratio = |j: i64| &y / &(&(&a0 + j) + 1);
    let (cdf, sf) = poisson_mixture(
        &wide,
        &lambda.half(),
        p0,
        q0,
        term0,
        ratio,
        "noncentral chi-square series",
    )?;
    Ok((cdf.with_prec(wp), sf.with_prec(wp)))
}

/// (P(F <= f), P(F > f)) for the noncentral F with noncentrality λ
pub fn noncentral_f_tails(
    ctx: &PrecisionContext,
    f: &Decimal,
    d1: &Decimal,
    d2: &Decimal,
    lambda: &Decimal,
) -> Result<(Decimal, Decimal)> {
    let wp = ctx.working_digits();
    if !d1.is_positive() || !d2.is_positive() || lambda.is_negative() {
        return Err(EngineError::validation(
            "noncentrality",
            "degrees of freedom must be positive and noncentrality non-negative",
        ));
    }
    if !f.is_positive() {
        return Ok((Decimal::zero(wp), Decimal::one(wp)));
    }
    let wide = ctx.widened(5);
    let scaled = d1 * f;
    let denom = &scaled + d2;
    let x = &scaled / &denom;
    let y = d2 / &denom;
    let a0 = d1.half();
    let b = d2.half();
    let (p0, q0) = beta_inc(&wide, &a0, &b, &x, &y)?;
    if lambda.is_zero() {
        return Ok((p0.with_prec(wp), q0.with_prec(wp)));
    }
    // x^a y^b / (a B(a, b))
    let ln_term = &(&(&(&a0 * &ln(&wide, &x)?) + &(&b * &ln(&wide, &y)?)) - &ln(&wide, &a0)?)
        - &ln_beta(&wide, &a0, &b)?;
    let term0 = exp(&wide, &ln_term)?;
    let ratio = |j: i64| {
        let a = &a0 + j;
        &(&x * &(&a + &b)) / &(&a + 1)
    };
    let (cdf, sf) = poisson_mixture(
        &wide,
        &lambda.half(),
        p0,
        q0,
        term0,
        ratio,
        "noncentral f series",
    )?;
    Ok((cdf.with_prec(wp), sf.with_prec(wp)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::distributions::{ChiSquare, FisherF, StudentT};
    use crate::precision::RoundingMode;

    fn ctx(digits: u32) -> PrecisionContext {
        PrecisionContext::new(digits, RoundingMode::HalfEven).unwrap()
    }

    #[test]
    fn test_zero_noncentrality_matches_central_t() {
        let c = ctx(15);
        let df = c.int(8);
        let central = StudentT::new(&c, df.clone()).unwrap();
        let t = Decimal::parse("1.3", c.working_digits()).unwrap();
        let nc = noncentral_t_cdf(&c, &t, &df, &c.int(0)).unwrap();
        let expected = central.cdf(&t).unwrap();
        assert!((nc.to_f64() - expected.to_f64()).abs() < 1e-13);
    }

    #[test]
    fn test_two_sample_power_reference() {
        // n = 20 per group, delta = 1 sd, alpha = 0.05 two-sided
        let c = ctx(15);
        let df = c.int(38);
        let delta = (&c.int(10)).sqrt().unwrap();
        let crit = StudentT::new(&c, df.clone())
            .unwrap()
            .quantile(&Decimal::parse("0.975", c.working_digits()).unwrap())
            .unwrap();
        let upper = noncentral_t_sf(&c, &crit, &df, &delta).unwrap();
        let lower = noncentral_t_cdf(&c, &-&crit, &df, &delta).unwrap();
        let power = (&upper + &lower).to_f64();
        assert!((power - 0.868_952_8).abs() < 1e-6, "power = {power}");
    }

    #[test]
    fn test_noncentral_chi_square_reduces_and_grows() {
        let c = ctx(15);
        let x = c.int(6);
        let df = c.int(3);
        let central = ChiSquare::new(&c, df.clone()).unwrap().sf(&x).unwrap();
        let (_, sf0) = noncentral_chi_square_tails(&c, &x, &df, &c.int(0)).unwrap();
        assert_eq!(sf0.to_f64(), central.to_f64());
        let (cdf, sf) = noncentral_chi_square_tails(&c, &x, &df, &c.int(4)).unwrap();
        assert!(sf > sf0);
        assert!(((&cdf + &sf).to_f64() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_noncentral_f_reduces_and_grows() {
        let c = ctx(15);
        let f = c.int(3);
        let (d1, d2) = (c.int(2), c.int(27));
        let central = FisherF::new(&c, d1.clone(), d2.clone()).unwrap().sf(&f).unwrap();
        let (_, sf0) = noncentral_f_tails(&c, &f, &d1, &d2, &c.int(0)).unwrap();
        assert_eq!(sf0.to_f64(), central.to_f64());
        let (cdf, sf) = noncentral_f_tails(&c, &f, &d1, &d2, &c.int(10)).unwrap();
        assert!(sf > sf0);
        assert!(((&cdf + &sf).to_f64() - 1.0).abs() < 1e-14);
    }
}
