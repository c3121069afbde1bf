//! Pearson and Spearman correlation

use super::{midranks, require_finite_pairs, tail_p_value, wrong_data, Outcome, RawDf, RawInterval, RunContext, Tails, TestData, TestType};
use crate::errors::{EngineError, Result};
use crate::precision::distributions::{ContinuousDistribution, Normal, StudentT};
use crate::precision::functions::{atanh, sqrt, tanh};
use crate::precision::{Decimal, PrecisionContext};

pub fn run(run: &RunContext<'_>, test_type: TestType) -> Result<Outcome> {
    let ctx = &run.ctx;
    let (x, y) = match &run.request.data {
        TestData::Bivariate { x, y } => (x, y),
        other => return Err(wrong_data(test_type, "bivariate", other)),
    };
    require_finite_pairs(x, y, 3)?;
    let x = ctx.values(x, "x")?;
    let y = ctx.values(y, "y")?;
    match test_type {
        TestType::Pearson => correlate(run, &x, &y, false),
        TestType::Spearman => {
            let (rx, _) = midranks(ctx, &x);
            let (ry, _) = midranks(ctx, &y);
            correlate(run, &rx, &ry, true)
        }
        other => Err(EngineError::Internal(anyhow::anyhow!(
            "{other} dispatched to the correlation family"
        ))),
    }
}

/// Centred cross products (Sxx, Syy, Sxy)
pub fn cross_products(ctx: &PrecisionContext, x: &[Decimal], y: &[Decimal]) -> (Decimal, Decimal, Decimal) {
    let mx = super::mean(ctx, x);
    let my = super::mean(ctx, y);
    let mut sxx = ctx.int(0);
    let mut syy = ctx.int(0);
    let mut sxy = ctx.int(0);
    for (a, b) in x.iter().zip(y) {
        let dx = a - &mx;
        let dy = b - &my;
        sxx = &sxx + &(&dx * &dx);
        syy = &syy + &(&dy * &dy);
        sxy = &sxy + &(&dx * &dy);
    }
    (sxx, syy, sxy)
}

/// Product-moment correlation; zero variance in either input is rejected
pub fn pearson_r(ctx: &PrecisionContext, x: &[Decimal], y: &[Decimal]) -> Result<Decimal> {
    let (sxx, syy, sxy) = cross_products(ctx, x, y);
    if !sxx.is_positive() || !syy.is_positive() {
        return Err(EngineError::validation(
            "data",
            "correlation undefined: an input has zero variance",
        ));
    }
    let r = &sxy / &sqrt(ctx, &(&sxx * &syy))?;
    // snap values within rounding noise of +-1
    let one = ctx.int(1);
    if &(&one - &r.abs()) <= &ctx.epsilon(ctx.working_digits().saturating_sub(3)) {
        return Ok(if r.is_negative() { -one } else { one });
    }
    Ok(r)
}

fn correlate(run: &RunContext<'_>, x: &[Decimal], y: &[Decimal], ranked: bool) -> Result<Outcome> {
    let ctx = &run.ctx;
    let n = x.len() as u64;
    let r = pearson_r(ctx, x, y)?;
    let one = ctx.int(1);
    let df = ctx.uint(n - 2);
    let (name, method, parameter) = if ranked {
        ("rho", "spearman rank correlation, t approximation", "spearman rho")
    } else {
        ("r", "pearson product-moment correlation", "pearson r")
    };

    if r.abs() == one {
        // perfect association: the t statistic is unbounded
        let p_value = match run.tails() {
            Tails::TwoSided => ctx.int(0),
            Tails::Greater => if r.is_positive() { ctx.int(0) } else { one.clone() },
            Tails::Less => if r.is_negative() { ctx.int(0) } else { one.clone() },
        };
        let interval = RawInterval {
            degenerate: true,
            ..RawInterval::new(parameter, r.clone(), Some(r.clone()), Some(r.clone()))
        };
        return Ok(Outcome::new(name, r, p_value, method)
            .with_df(RawDf::Scalar(df))
            .with_interval(Some(interval))
            .with_note("perfect correlation: interval collapses to the estimate"));
    }

    let t = &r * &sqrt(ctx, &(&df / &(&one - &(&r * &r))))?;
    let dist = StudentT::new(ctx, df.clone())?;
    let p_value = match run.tails() {
        Tails::TwoSided => dist.two_sided(&t)?,
        tails => tail_p_value(ctx, tails, dist.cdf(&t)?, dist.sf(&t)?),
    };

    let mut outcome = Outcome::new(name, r.clone(), p_value, method).with_df(RawDf::Scalar(df));
    if n < 4 {
        return Ok(outcome.with_note("fisher z interval needs at least 4 pairs"));
    }

    // Fisher z interval; Bonett-Wright standard error for ranks
    let n3 = ctx.uint(n - 3);
    let se = if ranked {
        sqrt(ctx, &(&(&one + &(&r * &r).half()) / &n3))?
    } else {
        &one / &sqrt(ctx, &n3)?
    };
    let z = atanh(ctx, &r)?;
    let crit = Normal::standard(ctx)?.quantile(&run.critical_probability())?;
    let margin = &crit * &se;
    let lower = tanh(ctx, &(&z - &margin))?;
    let upper = tanh(ctx, &(&z + &margin))?;
    let (lower, upper) = match run.tails() {
        Tails::TwoSided => (lower, upper),
        Tails::Greater => (lower, one.clone()),
        Tails::Less => (-one.clone(), upper),
    };
    outcome = outcome.with_interval(Some(RawInterval::new(parameter, r, Some(lower), Some(upper))));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use crate::engine::{Tails, TestData, TestEngine, TestRequest, TestType};

    fn bivariate(x: Vec<f64>, y: Vec<f64>) -> TestData {
        TestData::Bivariate { x, y }
    }

    #[test]
    fn test_pearson_reference() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::Pearson,
            bivariate(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![2.0, 4.0, 5.0, 4.0, 5.0]),
        );
        let result = engine.execute(TestType::Pearson, &request).unwrap();
        // Sxy = 6, Sxx = 10, Syy = 6
        assert!((result.statistic.to_f64() - 0.6_f64.sqrt()).abs() < 1e-14);
        // t = sqrt(0.6 * 3 / 0.4) = sqrt(4.5)
        assert!((result.p_value.to_f64() - 0.124_027_062_657_554_6).abs() < 1e-12);
        let ci = result.confidence_interval.unwrap();
        assert!(ci.lower.unwrap().to_f64() < 0.0);
        assert!(ci.upper.unwrap().to_f64() < 1.0);
    }

    #[test]
    fn test_perfect_correlation_is_degenerate() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::Pearson,
            bivariate(vec![1.0, 2.0, 3.0, 4.0], vec![3.0, 5.0, 7.0, 9.0]),
        );
        let result = engine.execute(TestType::Pearson, &request).unwrap();
        assert_eq!(result.statistic.to_string(), "1");
        assert!(result.p_value.raw().is_zero());
        assert!(result.confidence_interval.unwrap().degenerate);
    }

    #[test]
    fn test_spearman_monotone_nonlinear() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::Spearman,
            bivariate(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![1.0, 8.0, 27.0, 64.0, 125.0, 216.0]),
        );
        let result = engine.execute(TestType::Spearman, &request).unwrap();
        assert_eq!(result.statistic.to_string(), "1");
    }

    #[test]
    fn test_spearman_one_sided_bounds() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::Spearman,
            bivariate(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2.0, 1.0, 4.0, 3.0, 6.0, 5.0]),
        )
        .with_tails(Tails::Greater);
        let result = engine.execute(TestType::Spearman, &request).unwrap();
        let ci = result.confidence_interval.unwrap();
        assert_eq!(ci.upper.unwrap().to_string(), "1");
        assert!(result.p_value.to_f64() < 0.05);
    }

    #[test]
    fn test_constant_input_rejected() {
        let engine = TestEngine::default();
        let request = TestRequest::new(
            TestType::Pearson,
            bivariate(vec![1.0, 1.0, 1.0], vec![1.0, 2.0, 3.0]),
        );
        let err = engine.execute(TestType::Pearson, &request).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
