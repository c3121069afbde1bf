//! Precision arithmetic adapter
//!
//! Every statistical routine in the crate computes through this module.
//! Values carry `digits + guard_digits` working digits and are rounded only
//! when they cross the presentation boundary as a [`PrecisionValue`].

pub mod decimal;
pub mod distributions;
pub mod functions;
pub mod noncentral;

pub use decimal::{Decimal, RoundingMode};

use crate::config::EngineConfig;
use crate::constants::{
    DEFAULT_GUARD_DIGITS, DEFAULT_MAX_ROOT_ITERATIONS, DEFAULT_MAX_SERIES_ITERATIONS,
    MAX_PRECISION_DIGITS, MIN_PRECISION_DIGITS,
};
use crate::errors::{EngineError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Requested precision plus the limits numeric routines run under
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionContext {
    /// Significant digits guaranteed in presented values
    pub digits: u32,
    /// Extra digits carried internally
    pub guard_digits: u32,
    /// Rounding applied at presentation
    pub rounding: RoundingMode,
    pub max_root_iterations: usize,
    pub max_series_iterations: usize,
}

impl PrecisionContext {
    /// Validated context with default limits
    pub fn new(digits: u32, rounding: RoundingMode) -> Result<Self> {
        if !(MIN_PRECISION_DIGITS..=MAX_PRECISION_DIGITS).contains(&digits) {
            return Err(EngineError::validation(
                "precision",
                format!(
                    "precision must be between {MIN_PRECISION_DIGITS} and {MAX_PRECISION_DIGITS} significant digits, got {digits}"
                ),
            ));
        }
        Ok(Self {
            digits,
            guard_digits: DEFAULT_GUARD_DIGITS,
            rounding,
            max_root_iterations: DEFAULT_MAX_ROOT_ITERATIONS,
            max_series_iterations: DEFAULT_MAX_SERIES_ITERATIONS,
        })
    }

    /// Validated context with limits taken from engine configuration
    pub fn with_config(digits: u32, rounding: RoundingMode, config: &EngineConfig) -> Result<Self> {
        let mut ctx = Self::new(digits, rounding)?;
        ctx.guard_digits = config.guard_digits;
        ctx.max_root_iterations = config.max_root_iterations;
        ctx.max_series_iterations = config.max_series_iterations;
        Ok(ctx)
    }

    /// Unvalidated context for internal constants and diagnostics
    pub(crate) fn internal(digits: u32) -> Self {
        Self {
            digits,
            guard_digits: DEFAULT_GUARD_DIGITS,
            rounding: RoundingMode::HalfEven,
            max_root_iterations: DEFAULT_MAX_ROOT_ITERATIONS,
            max_series_iterations: DEFAULT_MAX_SERIES_ITERATIONS,
        }
    }

    /// Digits carried by intermediate values
    pub fn working_digits(&self) -> u32 {
        self.digits + self.guard_digits
    }

    /// Same limits with `extra` additional guard digits
    pub fn widened(&self, extra: u32) -> Self {
        Self {
            guard_digits: self.guard_digits + extra,
            ..*self
        }
    }

    /// Integer constant at working precision
    pub fn int(&self, value: i64) -> Decimal {
        Decimal::from_i64(value, self.working_digits())
    }

    pub fn uint(&self, value: u64) -> Decimal {
        Decimal::from_u64(value, self.working_digits())
    }

    /// Exact decimal image of a finite input value
    pub fn value(&self, value: f64, field: &str) -> Result<Decimal> {
        Decimal::from_f64(value, self.working_digits()).ok_or_else(|| {
            EngineError::validation(field, format!("non-finite value {value}"))
        })
    }

    /// Convert a slice of inputs
    pub fn values(&self, values: &[f64], field: &str) -> Result<Vec<Decimal>> {
        values.iter().map(|&v| self.value(v, field)).collect()
    }

    /// `10^-k` at working precision
    pub fn epsilon(&self, k: u32) -> Decimal {
        Decimal::one(self.working_digits()).mul_pow10(-(k as i64))
    }

    /// Relative convergence tolerance for root finding
    ///
    /// Half the guard digits are spent here; the rest absorb evaluation noise.
    pub fn root_tolerance(&self) -> Decimal {
        self.epsilon(self.digits + self.guard_digits / 2 + 1)
    }

    /// Wrap a working value for presentation
    pub fn present(&self, value: Decimal) -> PrecisionValue {
        PrecisionValue::new(value, self.digits, self.rounding)
    }

    pub fn overflow(&self, iterations: usize, routine: &str) -> EngineError {
        EngineError::overflow(self.digits, iterations, routine)
    }
}

/// A working value paired with its requested digit count and rounding policy
///
/// The unrounded value is kept so that chains built on it never see an
/// intermediate rounding; serialization emits the presented string.
#[derive(Clone)]
pub struct PrecisionValue {
    value: Decimal,
    digits: u32,
    rounding: RoundingMode,
}

impl PrecisionValue {
    pub fn new(value: Decimal, digits: u32, rounding: RoundingMode) -> Self {
        Self {
            value,
            digits: digits.max(1),
            rounding,
        }
    }

    /// Unrounded working value
    pub fn raw(&self) -> &Decimal {
        &self.value
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    pub fn rounding(&self) -> RoundingMode {
        self.rounding
    }

    /// Value rounded to the requested digits
    pub fn presented(&self) -> Decimal {
        self.value.round_sig(self.digits, self.rounding)
    }

    pub fn to_f64(&self) -> f64 {
        self.presented().to_f64()
    }
}

impl PartialEq for PrecisionValue {
    fn eq(&self, other: &Self) -> bool {
        self.presented() == other.presented()
    }
}

impl fmt::Display for PrecisionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value.to_fixed_sig_string(self.digits, self.rounding))
    }
}

impl fmt::Debug for PrecisionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrecisionValue({self} @{} digits)", self.digits)
    }
}

impl Serialize for PrecisionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PrecisionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let value = Decimal::parse(&text, u32::MAX)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal: {text}")))?;
        // trailing zeros in the text are part of the requested digits
        let digits = decimal::written_digits(&text).max(value.significant_digits());
        Ok(Self::new(value.with_prec(digits), digits, RoundingMode::HalfEven))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rejects_out_of_range_precision() {
        assert!(PrecisionContext::new(0, RoundingMode::HalfEven).is_err());
        assert!(PrecisionContext::new(51, RoundingMode::HalfEven).is_err());
        let ctx = PrecisionContext::new(50, RoundingMode::HalfEven).unwrap();
        assert_eq!(ctx.working_digits(), 60);
    }

    #[test]
    fn test_present_rounds_only_at_boundary() {
        let ctx = PrecisionContext::new(3, RoundingMode::HalfEven).unwrap();
        let third = &ctx.int(1) / &ctx.int(3);
        let shown = ctx.present(third.clone());
        assert_eq!(shown.to_string(), "0.333");
        // raw value still carries working digits
        assert_eq!(shown.raw(), &third);
        assert_eq!(shown.raw().significant_digits(), 13);
    }

    #[test]
    fn test_non_finite_input_is_validation_error() {
        let ctx = PrecisionContext::new(10, RoundingMode::HalfEven).unwrap();
        let err = ctx.value(f64::INFINITY, "groups").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_precision_value_serde_round_trip_compares_equal() {
        let ctx = PrecisionContext::new(10, RoundingMode::HalfEven).unwrap();
        let v = ctx.present(&ctx.int(2) / &ctx.int(7));
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"0.2857142857\"");
        let back: PrecisionValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_trailing_zeros_survive_display_and_serde() {
        let ctx = PrecisionContext::new(12, RoundingMode::HalfEven).unwrap();
        let v = ctx.present(Decimal::parse("0.2301996410799", 30).unwrap());
        assert_eq!(v.to_string(), "0.230199641080");
        let json = serde_json::to_string(&v).unwrap();
        let back: PrecisionValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.digits(), 12);
        assert_eq!(back.to_string(), "0.230199641080");
    }
}
