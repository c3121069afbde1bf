//! Test Execution Engine
//!
//! `TestEngine::execute` dispatches on the closed `TestType` enum to one
//! module per family. Family modules compute in working precision and return
//! an unrounded `Outcome`; this module validates the request envelope and
//! turns the outcome into a presented `TestResult`.

pub mod categorical;
pub mod correlation;
pub mod location;
pub mod rank;
pub mod regression;
pub mod request;
pub mod result;
pub mod variance;

pub use request::{Sample, SummaryStats, Tails, TestData, TestFamily, TestRequest, TestType};
pub use result::{
    AssumptionCheck, ConfidenceInterval, DegreesOfFreedom, EffectMagnitude, EffectSize,
    PowerAnalysis, PrecisionMetadata, TestResult,
};

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::metrics::{Timer, COMPUTATION_DURATION, TESTS_EXECUTED_TOTAL};
use crate::precision::{Decimal, PrecisionContext};
use crate::validation::validate_alpha;
use tracing::debug;

/// Largest number of pairwise differences or slopes materialized by
/// Hodges-Lehmann and Theil-Sen estimators
pub const MAX_PAIRWISE_TERMS: usize = 5_000_000;

// =============================================================================
// RAW OUTCOME
// =============================================================================

/// Unrounded degrees of freedom
#[derive(Debug, Clone)]
pub enum RawDf {
    Scalar(Decimal),
    Pair(Decimal, Decimal),
}

/// Unrounded confidence interval
#[derive(Debug, Clone)]
pub struct RawInterval {
    pub parameter: String,
    pub estimate: Decimal,
    pub lower: Option<Decimal>,
    pub upper: Option<Decimal>,
    pub degenerate: bool,
}

impl RawInterval {
    pub fn new(parameter: &str, estimate: Decimal, lower: Option<Decimal>, upper: Option<Decimal>) -> Self {
        let degenerate = matches!((&lower, &upper), (Some(l), Some(u)) if l >= u);
        Self {
            parameter: parameter.to_string(),
            estimate,
            lower,
            upper,
            degenerate,
        }
    }
}

/// What a family implementation hands back to the engine
#[derive(Debug, Clone)]
pub struct Outcome {
    pub statistic_name: String,
    pub statistic: Decimal,
    pub p_value: Decimal,
    pub df: Option<RawDf>,
    pub interval: Option<RawInterval>,
    pub method: String,
    pub notes: Vec<String>,
}

impl Outcome {
    pub fn new(statistic_name: &str, statistic: Decimal, p_value: Decimal, method: &str) -> Self {
        Self {
            statistic_name: statistic_name.to_string(),
            statistic,
            p_value,
            df: None,
            interval: None,
            method: method.to_string(),
            notes: Vec::new(),
        }
    }

    pub fn with_df(mut self, df: RawDf) -> Self {
        self.df = Some(df);
        self
    }

    pub fn with_interval(mut self, interval: Option<RawInterval>) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Everything a family implementation reads
pub struct RunContext<'a> {
    pub ctx: PrecisionContext,
    pub request: &'a TestRequest,
    pub config: &'a EngineConfig,
}

impl RunContext<'_> {
    pub fn alpha(&self) -> Decimal {
        // alpha is validated finite before dispatch
        Decimal::from_f64(self.request.alpha, self.ctx.working_digits())
            .unwrap_or_else(|| self.ctx.int(0))
    }

    /// Probability whose quantile bounds the confidence interval
    pub fn critical_probability(&self) -> Decimal {
        let alpha = self.alpha();
        let one = self.ctx.int(1);
        match self.request.tails {
            Tails::TwoSided => &one - &alpha.half(),
            Tails::Less | Tails::Greater => &one - &alpha,
        }
    }

    pub fn level(&self) -> f64 {
        1.0 - self.request.alpha
    }

    pub fn tails(&self) -> Tails {
        self.request.tails
    }

    pub fn option_f64(&self, key: &str) -> Result<Option<Decimal>> {
        match self.request.option_f64(key)? {
            None => Ok(None),
            Some(v) => Ok(Some(self.ctx.value(v, key)?)),
        }
    }
}

// =============================================================================
// SHARED NUMERIC HELPERS
// =============================================================================

/// p-value from the two tails of a continuous statistic
pub fn tail_p_value(ctx: &PrecisionContext, tails: Tails, lower: Decimal, upper: Decimal) -> Decimal {
    match tails {
        Tails::Less => lower,
        Tails::Greater => upper,
        Tails::TwoSided => {
            let doubled = lower.min(upper) * 2;
            doubled.min(ctx.int(1))
        }
    }
}

pub fn sum(ctx: &PrecisionContext, values: &[Decimal]) -> Decimal {
    values.iter().fold(ctx.int(0), |acc, v| &acc + v)
}

pub fn mean(ctx: &PrecisionContext, values: &[Decimal]) -> Decimal {
    &sum(ctx, values) / &ctx.uint(values.len() as u64)
}

/// Sum of squared deviations about the mean (two-pass)
pub fn sum_sq_dev(ctx: &PrecisionContext, values: &[Decimal]) -> Decimal {
    let m = mean(ctx, values);
    values.iter().fold(ctx.int(0), |acc, v| {
        let d = v - &m;
        &acc + &(&d * &d)
    })
}

/// Sample variance with n - 1 denominator
pub fn sample_variance(ctx: &PrecisionContext, values: &[Decimal]) -> Decimal {
    &sum_sq_dev(ctx, values) / &ctx.uint(values.len() as u64 - 1)
}

/// Median of an unsorted slice; empty input yields zero
pub fn median(ctx: &PrecisionContext, values: &[Decimal]) -> Decimal {
    let mut sorted = values.to_vec();
    sorted.sort();
    median_sorted(ctx, &sorted)
}

pub fn median_sorted(ctx: &PrecisionContext, sorted: &[Decimal]) -> Decimal {
    let n = sorted.len();
    if n == 0 {
        return ctx.int(0);
    }
    if n % 2 == 1 {
        sorted[n / 2].clone()
    } else {
        (&sorted[n / 2 - 1] + &sorted[n / 2]).half()
    }
}

/// Midranks (1-based) and the tie-group sizes of `values`
pub fn midranks(ctx: &PrecisionContext, values: &[Decimal]) -> (Vec<Decimal>, Vec<u64>) {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].cmp(&values[b]));
    let mut ranks = vec![ctx.int(0); n];
    let mut ties = Vec::new();
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share rank ((i+1) + (j+1)) / 2
        let rank = ctx.uint((i + j + 2) as u64).half();
        for &idx in &order[i..=j] {
            ranks[idx] = rank.clone();
        }
        let size = (j - i + 1) as u64;
        if size > 1 {
            ties.push(size);
        }
        i = j + 1;
    }
    (ranks, ties)
}

pub fn require_finite_pairs(x: &[f64], y: &[f64], min_len: usize) -> Result<()> {
    if x.len() != y.len() {
        return Err(EngineError::validation(
            "data",
            format!("paired inputs differ in length ({} vs {})", x.len(), y.len()),
        ));
    }
    crate::validation::validate_sample(x, min_len).map_validation_err("x")?;
    crate::validation::validate_sample(y, min_len).map_validation_err("y")?;
    Ok(())
}

pub fn wrong_data(test_type: TestType, expected: &str, data: &TestData) -> EngineError {
    EngineError::validation(
        "data",
        format!("{test_type} requires {expected} data, got '{}'", data.kind()),
    )
}

// =============================================================================
// ENGINE
// =============================================================================

/// Stateless executor for single test requests
#[derive(Debug, Clone, Default)]
pub struct TestEngine {
    config: EngineConfig,
}

impl TestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Precision context a request runs under
    pub fn context_for(&self, request: &TestRequest) -> Result<PrecisionContext> {
        let digits = request.precision.unwrap_or(self.config.default_precision);
        PrecisionContext::with_config(digits, request.rounding, &self.config)
    }

    /// Execute `test_type` on the request's data
    ///
    /// `test_type` may differ from `request.test_type` when the recommender
    /// has switched to a robust counterpart.
    pub fn execute(&self, test_type: TestType, request: &TestRequest) -> Result<TestResult> {
        let family = test_type.family();
        let family_label = family.to_string();
        let _timer = Timer::new(COMPUTATION_DURATION.with_label_values(&[family_label.as_str()]));

        let outcome = self.run(test_type, request);
        let label = match &outcome {
            Ok(_) => "ok",
            Err(EngineError::Validation { .. }) => "validation",
            Err(EngineError::PrecisionOverflow { .. }) => "overflow",
            Err(_) => "error",
        };
        TESTS_EXECUTED_TOTAL
            .with_label_values(&[family_label.as_str(), label])
            .inc();

        let outcome = outcome?;
        let ctx = self.context_for(request)?;
        debug!(
            test = %test_type,
            statistic = %outcome.statistic_name,
            method = %outcome.method,
            digits = ctx.digits,
            "test computed"
        );
        Ok(package(&ctx, test_type, request, outcome))
    }

    fn run(&self, test_type: TestType, request: &TestRequest) -> Result<Outcome> {
        let ctx = self.context_for(request)?;
        validate_alpha(request.alpha).map_validation_err("alpha")?;
        if test_type.is_omnibus() && request.tails != Tails::TwoSided {
            return Err(EngineError::validation(
                "tails",
                format!("{test_type} is an omnibus test; only two_sided is defined"),
            ));
        }

        let run = RunContext {
            ctx,
            request,
            config: &self.config,
        };
        match test_type.family() {
            TestFamily::Location => location::run(&run, test_type),
            TestFamily::Anova | TestFamily::VarianceRatio => variance::run(&run, test_type),
            TestFamily::Categorical => categorical::run(&run, test_type),
            TestFamily::RankBased => rank::run(&run, test_type),
            TestFamily::Correlation => correlation::run(&run, test_type),
            TestFamily::Regression => regression::run(&run, test_type),
        }
    }
}

/// Present an outcome at the request's digit count
fn package(
    ctx: &PrecisionContext,
    test_type: TestType,
    request: &TestRequest,
    outcome: Outcome,
) -> TestResult {
    let zero = ctx.int(0);
    let one = ctx.int(1);
    let p_value = outcome.p_value.max(zero).min(one);

    let degrees_of_freedom = outcome.df.map(|df| match df {
        RawDf::Scalar(v) => DegreesOfFreedom::Scalar(ctx.present(v)),
        RawDf::Pair(a, b) => DegreesOfFreedom::Pair(ctx.present(a), ctx.present(b)),
    });

    let level = 1.0 - request.alpha;
    let confidence_interval = outcome.interval.map(|ci| ConfidenceInterval {
        parameter: ci.parameter,
        estimate: ctx.present(ci.estimate),
        lower: ci.lower.map(|v| ctx.present(v)),
        upper: ci.upper.map(|v| ctx.present(v)),
        level,
        degenerate: ci.degenerate,
    });

    TestResult {
        test_type,
        requested_test: request.test_type,
        switched: test_type != request.test_type,
        recommendation: None,
        statistic_name: outcome.statistic_name,
        statistic: ctx.present(outcome.statistic),
        p_value: ctx.present(p_value),
        degrees_of_freedom,
        confidence_interval,
        method: outcome.method,
        sample_sizes: request.data.sample_sizes(),
        effect_size: None,
        power: None,
        assumptions: Vec::new(),
        notes: outcome.notes,
        cache_hit: false,
        metadata: PrecisionMetadata::new(ctx.digits),
    }
}
