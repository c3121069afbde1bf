//! Reference distributions at arbitrary precision
//!
//! Each distribution is bound to the `PrecisionContext` it was built with and
//! precomputes its normalizing constant once. Quantiles invert the CDF (or the
//! survival function in the upper half) with a safeguarded Newton iteration.

use super::functions::{beta_inc, binomial, decimal_digits, exp, gamma_inc, ln, ln_beta, ln_gamma, pi};
use super::{Decimal, PrecisionContext};
use crate::errors::{EngineError, Result};
use num_bigint::BigInt;

// =============================================================================
// DOUBLE-PRECISION SEEDS
// =============================================================================

/// Acklam's rational approximation to the standard normal quantile
///
/// Relative error below 1.2e-9; used only to seed high-precision inversion
/// and by diagnostics that need order-statistic expectations.
pub fn approx_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let p = p.clamp(1e-300, 1.0 - 1e-16);
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

// =============================================================================
// CONTINUOUS DISTRIBUTIONS
// =============================================================================

/// A continuous distribution evaluated at its bound context's precision
pub trait ContinuousDistribution {
    fn context(&self) -> &PrecisionContext;

    /// Short name used in convergence error reports
    fn name(&self) -> &'static str;

    fn cdf(&self, x: &Decimal) -> Result<Decimal>;

    /// Survival function, computed directly rather than as 1 - cdf
    fn sf(&self, x: &Decimal) -> Result<Decimal>;

    fn pdf(&self, x: &Decimal) -> Result<Decimal>;

    fn support_lower(&self) -> Option<Decimal> {
        None
    }

    fn support_upper(&self) -> Option<Decimal> {
        None
    }

    /// Double-precision starting point for quantile inversion
    fn seed(&self, p: f64) -> f64;

    fn quantile(&self, p: &Decimal) -> Result<Decimal> {
        invert(self, p)
    }
}

fn validate_probability(ctx: &PrecisionContext, p: &Decimal) -> Result<()> {
    let one = Decimal::one(ctx.working_digits());
    if !p.is_positive() || *p >= one {
        return Err(EngineError::validation(
            "probability",
            format!("quantile probability must lie strictly between 0 and 1, got {p}"),
        ));
    }
    Ok(())
}

/// Safeguarded Newton inversion of a continuous CDF
///
/// The objective is `cdf(x) - p` below the median and `(1 - p) - sf(x)`
/// above it, so upper-tail quantiles never lose digits to cancellation.
/// Newton steps that leave the current bracket fall back to bisection.
fn invert<D: ContinuousDistribution + ?Sized>(dist: &D, p: &Decimal) -> Result<Decimal> {
    let ctx = *dist.context();
    validate_probability(&ctx, p)?;
    let wp = ctx.working_digits();
    let one = Decimal::one(wp);
    let half = one.half();
    let upper_tail = *p > half;
    let q = &one - p;
    let target = if upper_tail { q.clone() } else { p.clone() };

    let objective = |x: &Decimal| -> Result<Decimal> {
        if upper_tail {
            Ok(&q - &dist.sf(x)?)
        } else {
            Ok(&dist.cdf(x)? - p)
        }
    };

    let lower = dist.support_lower();
    let upper = dist.support_upper();
    let tol = ctx.root_tolerance();
    let floor = ctx.epsilon(wp);
    let noise = &target * &ctx.epsilon(wp - 3);
    let limit = ctx.max_root_iterations;
    let mut iterations = 0usize;

    // seed, pulled strictly inside the support
    let seed = dist.seed(p.to_f64());
    let mut x = Decimal::from_f64(seed, wp).unwrap_or_else(|| Decimal::zero(wp));
    if let Some(lb) = &lower {
        if x <= *lb {
            x = match &upper {
                Some(ub) => (lb + ub).half(),
                None => lb + &one,
            };
        }
    }
    if let Some(ub) = &upper {
        if x >= *ub {
            x = match &lower {
                Some(lb) => (lb + ub).half(),
                None => ub - &one,
            };
        }
    }

    let mut g = objective(&x)?;
    if g.is_zero() {
        return Ok(x);
    }

    // bracket expansion
    let (mut lo, mut hi) = if g.is_negative() {
        let mut lo = x.clone();
        let mut step = x.abs().max(one.clone());
        loop {
            iterations += 1;
            if iterations > limit {
                return Err(ctx.overflow(iterations, dist.name()));
            }
            let cand = match &upper {
                Some(ub) => (&lo + ub).half(),
                None => &lo + &step,
            };
            if objective(&cand)?.is_negative() {
                lo = cand;
                step = &step * 2;
            } else {
                break (lo, cand);
            }
        }
    } else {
        let mut hi = x.clone();
        let mut step = x.abs().max(one.clone());
        loop {
            iterations += 1;
            if iterations > limit {
                return Err(ctx.overflow(iterations, dist.name()));
            }
            let cand = match &lower {
                Some(lb) => (&hi + lb).half(),
                None => &hi - &step,
            };
            if objective(&cand)?.is_negative() {
                break (cand, hi);
            } else {
                hi = cand;
                step = &step * 2;
            }
        }
    };

    loop {
        iterations += 1;
        if iterations > limit {
            return Err(ctx.overflow(iterations, dist.name()));
        }
        if g.abs() <= noise {
            return Ok(x);
        }
        if g.is_negative() {
            lo = x.clone();
        } else {
            hi = x.clone();
        }
        let density = dist.pdf(&x)?;
        let mut next = if density.is_positive() {
            &x - &(&g / &density)
        } else {
            (&lo + &hi).half()
        };
        if next <= lo || next >= hi {
            next = (&lo + &hi).half();
        }
        let step = (&next - &x).abs();
        let scale = next.abs().max(floor.clone());
        if step <= &tol * &scale {
            return Ok(next);
        }
        let width = (&hi - &lo).abs();
        if width <= &tol * &scale {
            return Ok((&lo + &hi).half());
        }
        x = next;
        g = objective(&x)?;
        if g.is_zero() {
            return Ok(x);
        }
    }
}

// ---------------------------------------------------------------------------
// Normal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Normal {
    ctx: PrecisionContext,
    mean: Decimal,
    sd: Decimal,
    ln_norm: Decimal,
}

impl Normal {
    pub fn new(ctx: &PrecisionContext, mean: Decimal, sd: Decimal) -> Result<Self> {
        if !sd.is_positive() {
            return Err(EngineError::validation("sd", "standard deviation must be positive"));
        }
        // -ln(sd * sqrt(2π))
        let two_pi = pi(ctx) * 2;
        let ln_norm = -(&ln(ctx, &sd)? + &ln(ctx, &two_pi)?.half());
        Ok(Self {
            ctx: *ctx,
            mean,
            sd,
            ln_norm,
        })
    }

    pub fn standard(ctx: &PrecisionContext) -> Result<Self> {
        Self::new(ctx, ctx.int(0), ctx.int(1))
    }

    fn z(&self, x: &Decimal) -> Decimal {
        &(x - &self.mean) / &self.sd
    }

    /// (lower tail, upper tail) at x, each computed without cancellation
    fn tails(&self, x: &Decimal) -> Result<(Decimal, Decimal)> {
        let z = self.z(x);
        let half_z2 = (&z * &z).half();
        let wp = self.ctx.working_digits();
        let half = Decimal::one(wp).half();
        let (p, q) = gamma_inc(&self.ctx, &half, &half_z2)?;
        let near = q.half();
        let far = (&Decimal::one(wp) + &p).half();
        Ok(if z.is_negative() { (near, far) } else { (far, near) })
    }
}

impl ContinuousDistribution for Normal {
    fn context(&self) -> &PrecisionContext {
        &self.ctx
    }

    fn name(&self) -> &'static str {
        "normal quantile"
    }

    fn cdf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.0)
    }

    fn sf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.1)
    }

    fn pdf(&self, x: &Decimal) -> Result<Decimal> {
        let z = self.z(x);
        exp(&self.ctx, &(&self.ln_norm - &(&z * &z).half()))
    }

    fn seed(&self, p: f64) -> f64 {
        self.mean.to_f64() + self.sd.to_f64() * approx_normal_quantile(p)
    }
}

// ---------------------------------------------------------------------------
// Student's t
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StudentT {
    ctx: PrecisionContext,
    df: Decimal,
    ln_norm: Decimal,
}

impl StudentT {
    pub fn new(ctx: &PrecisionContext, df: Decimal) -> Result<Self> {
        if !df.is_positive() {
            return Err(EngineError::validation("degrees_of_freedom", "must be positive"));
        }
        let half_df = df.half();
        let half_df_plus = (&df + 1).half();
        // lnΓ((ν+1)/2) - lnΓ(ν/2) - ½ ln(νπ)
        let ln_norm = &(&ln_gamma(ctx, &half_df_plus)? - &ln_gamma(ctx, &half_df)?)
            - &ln(ctx, &(&df * &pi(ctx)))?.half();
        Ok(Self {
            ctx: *ctx,
            df,
            ln_norm,
        })
    }

    pub fn df(&self) -> &Decimal {
        &self.df
    }

    /// (P(T <= t), P(T > t))
    fn tails(&self, t: &Decimal) -> Result<(Decimal, Decimal)> {
        let wp = self.ctx.working_digits();
        let one = Decimal::one(wp);
        if t.is_zero() {
            let half = one.half();
            return Ok((half.clone(), half));
        }
        let t2 = t * t;
        let denom = &self.df + &t2;
        let x = &self.df / &denom;
        let y = &t2 / &denom;
        let half = one.half();
        let (i, i_complement) = beta_inc(&self.ctx, &self.df.half(), &half, &x, &y)?;
        let far = i.half();
        let near = (&one + &i_complement).half();
        Ok(if t.is_negative() { (far, near) } else { (near, far) })
    }

    /// Two-sided tail probability P(|T| >= |t|) = I_x(ν/2, ½)
    pub fn two_sided(&self, t: &Decimal) -> Result<Decimal> {
        let wp = self.ctx.working_digits();
        if t.is_zero() {
            return Ok(Decimal::one(wp));
        }
        let t2 = t * t;
        let denom = &self.df + &t2;
        let (i, _) = beta_inc(
            &self.ctx,
            &self.df.half(),
            &Decimal::one(wp).half(),
            &(&self.df / &denom),
            &(&t2 / &denom),
        )?;
        Ok(i)
    }
}

impl ContinuousDistribution for StudentT {
    fn context(&self) -> &PrecisionContext {
        &self.ctx
    }

    fn name(&self) -> &'static str {
        "student_t quantile"
    }

    fn cdf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.0)
    }

    fn sf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.1)
    }

    fn pdf(&self, x: &Decimal) -> Result<Decimal> {
        let wp = self.ctx.working_digits();
        let base = &Decimal::one(wp) + &(&(x * x) / &self.df);
        let power = (&self.df + 1).half();
        exp(&self.ctx, &(&self.ln_norm - &(&power * &ln(&self.ctx, &base)?)))
    }

    fn seed(&self, p: f64) -> f64 {
        // Cornish-Fisher expansion around the normal quantile
        let z = approx_normal_quantile(p);
        let nu = self.df.to_f64().max(0.5);
        let z3 = z * z * z;
        let z5 = z3 * z * z;
        z + (z3 + z) / (4.0 * nu) + (5.0 * z5 + 16.0 * z3 + 3.0 * z) / (96.0 * nu * nu)
    }
}

// ---------------------------------------------------------------------------
// Chi-square
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChiSquare {
    ctx: PrecisionContext,
    df: Decimal,
    ln_norm: Decimal,
}

impl ChiSquare {
    pub fn new(ctx: &PrecisionContext, df: Decimal) -> Result<Self> {
        if !df.is_positive() {
            return Err(EngineError::validation("degrees_of_freedom", "must be positive"));
        }
        // -(k/2) ln 2 - lnΓ(k/2)
        let half_df = df.half();
        let ln2 = ln(ctx, &ctx.int(2))?;
        let ln_norm = -(&(&half_df * &ln2) + &ln_gamma(ctx, &half_df)?);
        Ok(Self {
            ctx: *ctx,
            df,
            ln_norm,
        })
    }

    pub fn df(&self) -> &Decimal {
        &self.df
    }

    fn tails(&self, x: &Decimal) -> Result<(Decimal, Decimal)> {
        let wp = self.ctx.working_digits();
        if !x.is_positive() {
            return Ok((Decimal::zero(wp), Decimal::one(wp)));
        }
        gamma_inc(&self.ctx, &self.df.half(), &x.half())
    }
}

impl ContinuousDistribution for ChiSquare {
    fn context(&self) -> &PrecisionContext {
        &self.ctx
    }

    fn name(&self) -> &'static str {
        "chi_square quantile"
    }

    fn cdf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.0)
    }

    fn sf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.1)
    }

    fn pdf(&self, x: &Decimal) -> Result<Decimal> {
        if !x.is_positive() {
            return Ok(Decimal::zero(self.ctx.working_digits()));
        }
        let shape = &self.df.half() - 1;
        let log_density = &(&self.ln_norm + &(&shape * &ln(&self.ctx, x)?)) - &x.half();
        exp(&self.ctx, &log_density)
    }

    fn support_lower(&self) -> Option<Decimal> {
        Some(Decimal::zero(self.ctx.working_digits()))
    }

    fn seed(&self, p: f64) -> f64 {
        // Wilson-Hilferty cube-root approximation
        let k = self.df.to_f64().max(0.1);
        let z = approx_normal_quantile(p);
        let c = 2.0 / (9.0 * k);
        let v = k * (1.0 - c + z * c.sqrt()).powi(3);
        if v.is_finite() && v > 0.0 {
            v
        } else {
            k.max(1e-3) * 0.5
        }
    }
}

// ---------------------------------------------------------------------------
// Snedecor's F
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FisherF {
    ctx: PrecisionContext,
    d1: Decimal,
    d2: Decimal,
    ln_norm: Decimal,
}

impl FisherF {
    pub fn new(ctx: &PrecisionContext, d1: Decimal, d2: Decimal) -> Result<Self> {
        if !d1.is_positive() || !d2.is_positive() {
            return Err(EngineError::validation("degrees_of_freedom", "both must be positive"));
        }
        // (d1/2) ln d1 + (d2/2) ln d2 - ln B(d1/2, d2/2)
        let ln_norm = &(&(&d1.half() * &ln(ctx, &d1)?) + &(&d2.half() * &ln(ctx, &d2)?))
            - &ln_beta(ctx, &d1.half(), &d2.half())?;
        Ok(Self {
            ctx: *ctx,
            d1,
            d2,
            ln_norm,
        })
    }

    pub fn dfs(&self) -> (&Decimal, &Decimal) {
        (&self.d1, &self.d2)
    }

    fn tails(&self, f: &Decimal) -> Result<(Decimal, Decimal)> {
        let wp = self.ctx.working_digits();
        if !f.is_positive() {
            return Ok((Decimal::zero(wp), Decimal::one(wp)));
        }
        let scaled = &self.d1 * f;
        let denom = &scaled + &self.d2;
        beta_inc(
            &self.ctx,
            &self.d1.half(),
            &self.d2.half(),
            &(&scaled / &denom),
            &(&self.d2 / &denom),
        )
    }
}

impl ContinuousDistribution for FisherF {
    fn context(&self) -> &PrecisionContext {
        &self.ctx
    }

    fn name(&self) -> &'static str {
        "f quantile"
    }

    fn cdf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.0)
    }

    fn sf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.1)
    }

    fn pdf(&self, x: &Decimal) -> Result<Decimal> {
        if !x.is_positive() {
            return Ok(Decimal::zero(self.ctx.working_digits()));
        }
        let shape = &self.d1.half() - 1;
        let total = (&self.d1 + &self.d2).half();
        let log_density = &(&self.ln_norm + &(&shape * &ln(&self.ctx, x)?))
            - &(&total * &ln(&self.ctx, &(&(&self.d1 * x) + &self.d2))?);
        exp(&self.ctx, &log_density)
    }

    fn support_lower(&self) -> Option<Decimal> {
        Some(Decimal::zero(self.ctx.working_digits()))
    }

    fn seed(&self, p: f64) -> f64 {
        // log-normal approximation of the F distribution
        let d1 = self.d1.to_f64().max(0.1);
        let d2 = self.d2.to_f64().max(0.1);
        let z = approx_normal_quantile(p);
        let v = (z * (2.0 / d1 + 2.0 / d2).sqrt()).exp();
        if v.is_finite() && v > 0.0 {
            v
        } else {
            1.0
        }
    }
}

// ---------------------------------------------------------------------------
// Beta
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Beta {
    ctx: PrecisionContext,
    a: Decimal,
    b: Decimal,
    ln_norm: Decimal,
}

impl Beta {
    pub fn new(ctx: &PrecisionContext, a: Decimal, b: Decimal) -> Result<Self> {
        if !a.is_positive() || !b.is_positive() {
            return Err(EngineError::validation("shape", "beta shapes must be positive"));
        }
        let ln_norm = -ln_beta(ctx, &a, &b)?;
        Ok(Self {
            ctx: *ctx,
            a,
            b,
            ln_norm,
        })
    }

    fn tails(&self, x: &Decimal) -> Result<(Decimal, Decimal)> {
        let wp = self.ctx.working_digits();
        let one = Decimal::one(wp);
        if !x.is_positive() {
            return Ok((Decimal::zero(wp), one));
        }
        if *x >= one {
            return Ok((one, Decimal::zero(wp)));
        }
        beta_inc(&self.ctx, &self.a, &self.b, x, &(&one - x))
    }
}

impl ContinuousDistribution for Beta {
    fn context(&self) -> &PrecisionContext {
        &self.ctx
    }

    fn name(&self) -> &'static str {
        "beta quantile"
    }

    fn cdf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.0)
    }

    fn sf(&self, x: &Decimal) -> Result<Decimal> {
        Ok(self.tails(x)?.1)
    }

    fn pdf(&self, x: &Decimal) -> Result<Decimal> {
        let wp = self.ctx.working_digits();
        let one = Decimal::one(wp);
        if !x.is_positive() || *x >= one {
            return Ok(Decimal::zero(wp));
        }
        let log_density = &(&self.ln_norm + &(&(&self.a - 1) * &ln(&self.ctx, x)?))
            + &(&(&self.b - 1) * &ln(&self.ctx, &(&one - x))?);
        exp(&self.ctx, &log_density)
    }

    fn support_lower(&self) -> Option<Decimal> {
        Some(Decimal::zero(self.ctx.working_digits()))
    }

    fn support_upper(&self) -> Option<Decimal> {
        Some(Decimal::one(self.ctx.working_digits()))
    }

    fn seed(&self, p: f64) -> f64 {
        let a = self.a.to_f64();
        let b = self.b.to_f64();
        let mean = a / (a + b);
        let sd = (a * b / ((a + b) * (a + b) * (a + b + 1.0))).sqrt();
        (mean + sd * approx_normal_quantile(p)).clamp(1e-12, 1.0 - 1e-12)
    }
}

// =============================================================================
// DISCRETE DISTRIBUTIONS
// =============================================================================

/// Largest trial count for which the pmf uses an exact binomial coefficient
const EXACT_BINOMIAL_COEFFICIENT_LIMIT: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Binomial {
    ctx: PrecisionContext,
    n: u64,
    p: Decimal,
    q: Decimal,
}

impl Binomial {
    pub fn new(ctx: &PrecisionContext, n: u64, p: Decimal) -> Result<Self> {
        let one = Decimal::one(ctx.working_digits());
        if p.is_negative() || p > one {
            return Err(EngineError::validation("p", "success probability must lie in [0, 1]"));
        }
        let q = &one - &p;
        Ok(Self { ctx: *ctx, n, p, q })
    }

    pub fn trials(&self) -> u64 {
        self.n
    }

    /// P(X = k)
    pub fn pmf(&self, k: u64) -> Result<Decimal> {
        let wp = self.ctx.working_digits();
        if k > self.n {
            return Ok(Decimal::zero(wp));
        }
        if self.p.is_zero() {
            return Ok(if k == 0 { Decimal::one(wp) } else { Decimal::zero(wp) });
        }
        if self.q.is_zero() {
            return Ok(if k == self.n { Decimal::one(wp) } else { Decimal::zero(wp) });
        }
        if self.n <= EXACT_BINOMIAL_COEFFICIENT_LIMIT {
            let coeff = Decimal::from_bigint(BigInt::from(binomial(self.n, k)), wp + 2);
            let value = &(&coeff * &self.p.powi(k as i64)) * &self.q.powi((self.n - k) as i64);
            return Ok(value.with_prec(wp));
        }
        let ctx = &self.ctx;
        let ln_coeff = &(&ln_gamma(ctx, &ctx.uint(self.n + 1))? - &ln_gamma(ctx, &ctx.uint(k + 1))?)
            - &ln_gamma(ctx, &ctx.uint(self.n - k + 1))?;
        let ln_pmf = &(&ln_coeff + &(&ctx.uint(k) * &ln(ctx, &self.p)?))
            + &(&ctx.uint(self.n - k) * &ln(ctx, &self.q)?);
        exp(ctx, &ln_pmf)
    }

    /// (P(X <= k), P(X > k)) via the incomplete beta identity
    pub fn tails(&self, k: u64) -> Result<(Decimal, Decimal)> {
        let wp = self.ctx.working_digits();
        if k >= self.n {
            return Ok((Decimal::one(wp), Decimal::zero(wp)));
        }
        if self.p.is_zero() {
            return Ok((Decimal::one(wp), Decimal::zero(wp)));
        }
        if self.q.is_zero() {
            return Ok((Decimal::zero(wp), Decimal::one(wp)));
        }
        // P(X <= k) = I_q(n - k, k + 1)
        beta_inc(
            &self.ctx,
            &self.ctx.uint(self.n - k),
            &self.ctx.uint(k + 1),
            &self.q,
            &self.p,
        )
    }

    pub fn cdf(&self, k: u64) -> Result<Decimal> {
        Ok(self.tails(k)?.0)
    }

    /// P(X >= k)
    pub fn sf_inclusive(&self, k: u64) -> Result<Decimal> {
        if k == 0 {
            return Ok(Decimal::one(self.ctx.working_digits()));
        }
        Ok(self.tails(k - 1)?.1)
    }

    /// Smallest k with P(X <= k) >= prob
    pub fn quantile(&self, prob: &Decimal) -> Result<u64> {
        let (mut lo, mut hi) = (0u64, self.n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.cdf(mid)? >= *prob {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }
}

/// Hypergeometric distribution with exact integer arithmetic
///
/// Population of `total` items, `successes` of which are marked; `draws`
/// items are taken without replacement.
#[derive(Debug, Clone)]
pub struct Hypergeometric {
    ctx: PrecisionContext,
    total: u64,
    successes: u64,
    draws: u64,
}

impl Hypergeometric {
    pub fn new(ctx: &PrecisionContext, total: u64, successes: u64, draws: u64) -> Result<Self> {
        if successes > total || draws > total {
            return Err(EngineError::validation(
                "table",
                "hypergeometric margins exceed the population size",
            ));
        }
        Ok(Self {
            ctx: *ctx,
            total,
            successes,
            draws,
        })
    }

    pub fn support(&self) -> (u64, u64) {
        let lo = (self.draws + self.successes).saturating_sub(self.total);
        let hi = self.draws.min(self.successes);
        (lo, hi)
    }

    /// Point weights over the support relative to the lowest point
    ///
    /// Built from the ratio of consecutive terms,
    /// w(k) / w(k-1) = (K-k+1)(n-k+1) / (k (N-K-n+k)),
    /// so no binomial coefficient of the population is ever formed.
    fn relative_weights(&self, prec: u32) -> Vec<Decimal> {
        let (lo, hi) = self.support();
        let failures = self.total - self.successes;
        let int = |v: u64| Decimal::from_u64(v, prec);
        let mut weights = Vec::with_capacity((hi - lo + 1) as usize);
        let mut w = Decimal::one(prec);
        weights.push(w.clone());
        for k in lo + 1..=hi {
            let up = &int(self.successes - k + 1) * &int(self.draws - k + 1);
            let down = &int(k) * &int(failures + k - self.draws);
            w = &(&w * &up) / &down;
            weights.push(w.clone());
        }
        weights
    }

    /// Mass over `range`, normalized by the whole support
    fn mass(&self, range: std::ops::RangeInclusive<u64>) -> Decimal {
        let (lo, hi) = self.support();
        let wp = self.ctx.working_digits();
        // one rounding per recurrence step
        let prec = wp + 2 + decimal_digits(hi - lo + 1);
        let weights = self.relative_weights(prec);
        let sum = |from: u64, to: u64| {
            weights[(from - lo) as usize..=(to - lo) as usize]
                .iter()
                .fold(Decimal::zero(prec), |acc, w| &acc + w)
        };
        (&sum(*range.start(), *range.end()) / &sum(lo, hi)).with_prec(wp)
    }

    pub fn pmf(&self, k: u64) -> Decimal {
        let (lo, hi) = self.support();
        if k < lo || k > hi {
            return Decimal::zero(self.ctx.working_digits());
        }
        self.mass(k..=k)
    }

    /// P(X <= k)
    pub fn cdf(&self, k: u64) -> Decimal {
        let (lo, hi) = self.support();
        if k < lo {
            return Decimal::zero(self.ctx.working_digits());
        }
        self.mass(lo..=k.min(hi))
    }

    /// P(X >= k)
    pub fn sf_inclusive(&self, k: u64) -> Decimal {
        let (lo, hi) = self.support();
        if k > hi {
            return Decimal::zero(self.ctx.working_digits());
        }
        self.mass(k.max(lo)..=hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::RoundingMode;

    fn ctx(digits: u32) -> PrecisionContext {
        PrecisionContext::new(digits, RoundingMode::HalfEven).unwrap()
    }

    fn dec(c: &PrecisionContext, s: &str) -> Decimal {
        Decimal::parse(s, c.working_digits()).unwrap()
    }

    fn shown(v: &Decimal, digits: u32) -> String {
        v.to_sig_string(digits, RoundingMode::HalfEven)
    }

    #[test]
    fn test_normal_reference_values() {
        let c = ctx(20);
        let n = Normal::standard(&c).unwrap();
        let cdf = n.cdf(&dec(&c, "1.96")).unwrap();
        assert_eq!(shown(&cdf, 15), "0.97500210485178");
        let q = n.quantile(&dec(&c, "0.975")).unwrap();
        assert_eq!(shown(&q, 20), "1.9599639845400542355");
        // deep tail through the survival function, no cancellation
        let sf = n.sf(&dec(&c, "10")).unwrap();
        assert_eq!(shown(&sf, 12), "7.61985302416e-24");
    }

    #[test]
    fn test_student_t_scenario_value() {
        let c = ctx(15);
        let t = StudentT::new(&c, c.int(8)).unwrap();
        let p = t.two_sided(&c.int(-1)).unwrap();
        assert_eq!(shown(&p, 10), "0.3465935071");
        let cdf = t.cdf(&c.int(-1)).unwrap();
        assert_eq!(shown(&(cdf * 2), 10), "0.3465935071");
    }

    #[test]
    fn test_student_t_quantile_inverts_cdf() {
        let c = ctx(25);
        let t = StudentT::new(&c, c.int(5)).unwrap();
        let p = dec(&c, "0.975");
        let q = t.quantile(&p).unwrap();
        assert!((q.to_f64() - 2.570_582).abs() < 1e-6);
        let back = t.cdf(&q).unwrap();
        assert_eq!(shown(&back, 20), "0.975");
    }

    #[test]
    fn test_chi_square_and_f() {
        let c = ctx(15);
        let chi = ChiSquare::new(&c, c.int(2)).unwrap();
        // chi-square with 2 df is exponential with mean 2
        let sf = chi.sf(&c.int(4)).unwrap();
        assert_eq!(shown(&sf, 15), "0.135335283236613");
        let q = chi.quantile(&dec(&c, "0.95")).unwrap();
        assert!((q.to_f64() - 5.991_464_547_107_979).abs() < 1e-12);

        let f = FisherF::new(&c, c.int(2), c.int(10)).unwrap();
        let back = f.cdf(&f.quantile(&dec(&c, "0.9")).unwrap()).unwrap();
        assert_eq!(shown(&back, 15), "0.9");
    }

    #[test]
    fn test_beta_quantile() {
        let c = ctx(20);
        let b = Beta::new(&c, c.int(2), c.int(2)).unwrap();
        let median = b.quantile(&dec(&c, "0.5")).unwrap();
        assert_eq!(shown(&median, 20), "0.5");
    }

    #[test]
    fn test_binomial_tails_match_pmf_sum() {
        let c = ctx(20);
        let b = Binomial::new(&c, 10, dec(&c, "0.3")).unwrap();
        let direct: Decimal = (0..=3u64)
            .map(|k| b.pmf(k).unwrap())
            .fold(Decimal::zero(c.working_digits()), |acc, v| &acc + &v);
        assert_eq!(shown(&b.cdf(3).unwrap(), 18), shown(&direct, 18));
        assert_eq!(b.quantile(&dec(&c, "0.5")).unwrap(), 3);
    }

    #[test]
    fn test_hypergeometric_exact() {
        let c = ctx(15);
        // 2x2 table [[3,1],[1,3]]: N=8, row total 4, col total 4
        let h = Hypergeometric::new(&c, 8, 4, 4).unwrap();
        assert_eq!(h.support(), (0, 4));
        // C(4,3)C(4,1)/C(8,4) = 16/70
        assert_eq!(shown(&h.pmf(3), 15), "0.228571428571429");
        let total = &h.cdf(2) + &h.sf_inclusive(3);
        assert_eq!(shown(&total, 15), "1");
    }

    #[test]
    fn test_hypergeometric_large_population_with_shifted_support() {
        let c = ctx(20);
        let h = Hypergeometric::new(&c, 10_000, 6_000, 5_000).unwrap();
        assert_eq!(h.support(), (1_000, 5_000));
        assert_eq!(shown(&h.pmf(3_000), 20), "0.016285461080073445243");
        assert_eq!(shown(&h.cdf(2_990), 20), "0.34906993362863852325");
        assert!(h.pmf(999).is_zero());
    }

    #[test]
    fn test_quantile_rejects_invalid_probability() {
        let c = ctx(10);
        let n = Normal::standard(&c).unwrap();
        assert!(n.quantile(&c.int(0)).is_err());
        assert!(n.quantile(&c.int(1)).is_err());
    }

    #[test]
    fn test_seed_accuracy() {
        assert!((approx_normal_quantile(0.975) - 1.959_963_984_540_054).abs() < 1e-8);
        assert!((approx_normal_quantile(0.5)).abs() < 1e-12);
    }
}
