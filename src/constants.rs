//! Documented constants for the statistics engine
//!
//! Tunable parameters with the reasoning behind their values. Runtime
//! overrides for most of them live in `EngineConfig`.

// =============================================================================
// PRECISION CONSTANTS
// =============================================================================

/// Smallest significant-digit count a caller may request
pub const MIN_PRECISION_DIGITS: u32 = 1;

/// Largest significant-digit count a caller may request
pub const MAX_PRECISION_DIGITS: u32 = 50;

/// Digit count used when a request does not specify one
///
/// Justification:
/// - 15 digits is the most an IEEE double round-trips faithfully
/// - Callers comparing against double-based tools see no spurious mismatch
pub const DEFAULT_PRECISION_DIGITS: u32 = 15;

/// Extra digits carried internally beyond the requested count
///
/// Justification:
/// - Continued fractions and series lose a few ulps per hundred terms
/// - Quantile inversion composes CDF and PDF errors
/// - 10 digits absorbs both with margin for the largest supported samples
pub const DEFAULT_GUARD_DIGITS: u32 = 10;

/// Precision at which diagnostic sub-tests (normality, homogeneity) run
///
/// Diagnostics only feed a threshold comparison, so full request precision
/// would be wasted work.
pub const DIAGNOSTIC_PRECISION_DIGITS: u32 = 12;

/// Precision of the cached constants (pi, ln 10)
///
/// Must exceed MAX_PRECISION_DIGITS + guard digits + the extra digits
/// that argument reduction requests.
pub const CONSTANT_CACHE_DIGITS: u32 = 120;

/// Iteration cap for Newton/bisection quantile inversion
///
/// Justification:
/// - Newton converges in under 10 steps from a double-precision seed
/// - Pure bisection needs ~3.3 steps per digit, ~200 for 60 working digits
/// - 400 leaves headroom for bracket expansion on heavy tails
pub const DEFAULT_MAX_ROOT_ITERATIONS: usize = 400;

/// Iteration cap for series and continued-fraction evaluation
///
/// Incomplete beta continued fractions need O(sqrt(a + b)) terms; 20k
/// covers degrees of freedom in the tens of millions.
pub const DEFAULT_MAX_SERIES_ITERATIONS: usize = 20_000;

// =============================================================================
// ASSUMPTION & RECOMMENDER CONSTANTS
// =============================================================================

/// Default significance threshold for diagnostic sub-tests
pub const DEFAULT_ASSUMPTION_ALPHA: f64 = 0.05;

/// Sample size above which the central limit theorem excuses non-normality
///
/// Justification:
/// - The classical n >= 30 rule for t and F procedures
/// - Below this, skewed data inflates type I error noticeably
pub const DEFAULT_ASYMPTOTIC_THRESHOLD: usize = 30;

/// Minimum expected cell count for chi-square approximations (Cochran's rule)
pub const DEFAULT_MIN_EXPECTED_FREQUENCY: f64 = 5.0;

/// Shapiro-Wilk is defined for 3..=5000 observations (Royston 1995)
pub const SHAPIRO_WILK_MIN_N: usize = 3;
pub const SHAPIRO_WILK_MAX_N: usize = 5000;

// =============================================================================
// MULTIPLICITY CONSTANTS
// =============================================================================

/// Uncorrected hypotheses in a session before a warning is raised
pub const DEFAULT_WARNING_THRESHOLD: usize = 5;

/// Uncorrected hypotheses in a session before the warning escalates
pub const DEFAULT_ESCALATION_THRESHOLD: usize = 20;

/// Bounded history of registry events kept by the in-memory sink
pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 1000;

// =============================================================================
// CACHE CONSTANTS
// =============================================================================

/// Cache entry time-to-live (1 hour)
///
/// Recomputation is deterministic, so expiry only bounds memory use.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Significant digits kept when normalizing floating inputs into a cache key
///
/// Justification:
/// - 15 digits round-trip through IEEE doubles
/// - Noise below this (0.1 + 0.2 vs 0.3) would otherwise fragment keys
pub const DEFAULT_CACHE_KEY_DIGITS: usize = 15;

// =============================================================================
// EXACT TEST LIMITS
// =============================================================================

/// Largest per-group size for which rank tests use the exact null distribution
///
/// Above this the normal approximation with tie correction is accurate to
/// well beyond the diagnostic tolerance.
pub const DEFAULT_EXACT_RANK_LIMIT: usize = 50;

/// Largest number of tables enumerated by exact categorical tests
pub const DEFAULT_MAX_EXACT_TABLES: usize = 2_000_000;

/// Largest grand total accepted by Fisher's exact and exact multinomial tests
///
/// Factorial tables grow linearly with the total; beyond this the chi-square
/// counterparts are the supported route.
pub const DEFAULT_MAX_EXACT_TOTAL: u64 = 100_000;

/// Largest trial count for exact binomial enumeration
pub const MAX_BINOMIAL_TRIALS: u64 = 1_000_000;

/// Largest sample size searched when solving for required sample size
pub const MAX_REQUIRED_SAMPLE_SIZE: u64 = 10_000_000;

// =============================================================================
// INPUT LIMITS
// =============================================================================

/// Maximum observations per group
pub const MAX_OBSERVATIONS_PER_GROUP: usize = 1_000_000;

/// Maximum number of groups in a single request
pub const MAX_GROUPS: usize = 1_000;

/// Maximum number of cells in a contingency table
pub const MAX_TABLE_CELLS: usize = 10_000;

// =============================================================================
// ENGINE IDENTITY
// =============================================================================

/// Algorithm tag reported in every result's metadata block
pub const ALGORITHM_TAG: &str = "high_precision_decimal";

/// Engine version reported in every result's metadata block
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_bounds_are_consistent() {
        assert!(MIN_PRECISION_DIGITS <= DEFAULT_PRECISION_DIGITS);
        assert!(DEFAULT_PRECISION_DIGITS <= MAX_PRECISION_DIGITS);
        assert!(CONSTANT_CACHE_DIGITS > MAX_PRECISION_DIGITS + DEFAULT_GUARD_DIGITS + 20);
    }

    #[test]
    fn test_multiplicity_thresholds_ordered() {
        assert!(DEFAULT_WARNING_THRESHOLD < DEFAULT_ESCALATION_THRESHOLD);
    }
}
