//! Configuration management for the statistics engine
//!
//! All configurable parameters in one place with environment variable overrides.
//! Sensible defaults, configurable per deployment.

use crate::constants::*;
use std::env;
use tracing::{info, warn};

/// Engine configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Significant digits used when a request omits `precision` (default: 15)
    pub default_precision: u32,

    /// Extra digits carried internally (default: 10)
    pub guard_digits: u32,

    /// Iteration cap for quantile root finding (default: 400)
    pub max_root_iterations: usize,

    /// Iteration cap for series and continued fractions (default: 20000)
    pub max_series_iterations: usize,

    /// Cache entry time-to-live in seconds (default: 3600)
    pub cache_ttl_secs: u64,

    /// Significant digits kept when normalizing numbers into cache keys (default: 15)
    pub cache_key_digits: usize,

    /// Threshold for diagnostic sub-tests (default: 0.05)
    pub assumption_alpha: f64,

    /// Per-group sample size at which non-normality is excused (default: 30)
    pub asymptotic_threshold: usize,

    /// Minimum expected cell count for chi-square tests (default: 5.0)
    pub min_expected_frequency: f64,

    /// Execute the robust counterpart when the recommender switches (default: true)
    pub auto_switch: bool,

    /// Uncorrected hypotheses before a multiplicity warning (default: 5)
    pub warning_threshold: usize,

    /// Uncorrected hypotheses before the warning escalates (default: 20)
    pub escalation_threshold: usize,

    /// Registry events retained by the in-memory sink (default: 1000)
    pub event_buffer_capacity: usize,

    /// Largest group size for exact rank distributions (default: 50)
    pub exact_rank_limit: usize,

    /// Largest table count enumerated by exact categorical tests (default: 2000000)
    pub max_exact_tables: usize,

    /// Largest grand total for Fisher's exact and exact multinomial tests (default: 100000)
    pub max_exact_total: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_precision: DEFAULT_PRECISION_DIGITS,
            guard_digits: DEFAULT_GUARD_DIGITS,
            max_root_iterations: DEFAULT_MAX_ROOT_ITERATIONS,
            max_series_iterations: DEFAULT_MAX_SERIES_ITERATIONS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_key_digits: DEFAULT_CACHE_KEY_DIGITS,
            assumption_alpha: DEFAULT_ASSUMPTION_ALPHA,
            asymptotic_threshold: DEFAULT_ASYMPTOTIC_THRESHOLD,
            min_expected_frequency: DEFAULT_MIN_EXPECTED_FREQUENCY,
            auto_switch: true,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            event_buffer_capacity: DEFAULT_EVENT_BUFFER_CAPACITY,
            exact_rank_limit: DEFAULT_EXACT_RANK_LIMIT,
            max_exact_tables: DEFAULT_MAX_EXACT_TABLES,
            max_exact_total: DEFAULT_MAX_EXACT_TOTAL,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Precision
        if let Ok(val) = env::var("STATCORE_DEFAULT_PRECISION") {
            if let Ok(n) = val.parse::<u32>() {
                config.default_precision = n.clamp(MIN_PRECISION_DIGITS, MAX_PRECISION_DIGITS);
            }
        }

        if let Ok(val) = env::var("STATCORE_GUARD_DIGITS") {
            if let Ok(n) = val.parse::<u32>() {
                config.guard_digits = n.clamp(2, 40);
            }
        }

        if let Ok(val) = env::var("STATCORE_MAX_ROOT_ITERATIONS") {
            if let Ok(n) = val.parse() {
                config.max_root_iterations = n;
            }
        }

        if let Ok(val) = env::var("STATCORE_MAX_SERIES_ITERATIONS") {
            if let Ok(n) = val.parse() {
                config.max_series_iterations = n;
            }
        }

        // Cache
        if let Ok(val) = env::var("STATCORE_CACHE_TTL") {
            if let Ok(n) = val.parse() {
                config.cache_ttl_secs = n;
            }
        }

        if let Ok(val) = env::var("STATCORE_CACHE_KEY_DIGITS") {
            if let Ok(n) = val.parse::<usize>() {
                config.cache_key_digits = n.clamp(1, 17);
            }
        }

        // Assumptions and recommender
        if let Ok(val) = env::var("STATCORE_ASSUMPTION_ALPHA") {
            if let Ok(a) = val.parse::<f64>() {
                if a > 0.0 && a < 1.0 {
                    config.assumption_alpha = a;
                } else {
                    warn!("STATCORE_ASSUMPTION_ALPHA={} outside (0, 1), keeping default", val);
                }
            }
        }

        if let Ok(val) = env::var("STATCORE_ASYMPTOTIC_N") {
            if let Ok(n) = val.parse() {
                config.asymptotic_threshold = n;
            }
        }

        if let Ok(val) = env::var("STATCORE_MIN_EXPECTED") {
            if let Ok(n) = val.parse::<f64>() {
                if n.is_finite() && n >= 0.0 {
                    config.min_expected_frequency = n;
                }
            }
        }

        if let Ok(val) = env::var("STATCORE_AUTO_SWITCH") {
            config.auto_switch = val.to_lowercase() == "true" || val == "1";
        }

        // Multiplicity
        if let Ok(val) = env::var("STATCORE_WARN_UNCORRECTED") {
            if let Ok(n) = val.parse() {
                config.warning_threshold = n;
            }
        }

        if let Ok(val) = env::var("STATCORE_ESCALATE_UNCORRECTED") {
            if let Ok(n) = val.parse() {
                config.escalation_threshold = n;
            }
        }

        if config.escalation_threshold < config.warning_threshold {
            warn!(
                "Escalation threshold {} below warning threshold {}, raising it",
                config.escalation_threshold, config.warning_threshold
            );
            config.escalation_threshold = config.warning_threshold;
        }

        if let Ok(val) = env::var("STATCORE_EVENT_BUFFER") {
            if let Ok(n) = val.parse::<usize>() {
                config.event_buffer_capacity = n.max(1);
            }
        }

        // Exact test limits
        if let Ok(val) = env::var("STATCORE_EXACT_RANK_LIMIT") {
            if let Ok(n) = val.parse() {
                config.exact_rank_limit = n;
            }
        }

        if let Ok(val) = env::var("STATCORE_MAX_EXACT_TABLES") {
            if let Ok(n) = val.parse() {
                config.max_exact_tables = n;
            }
        }

        if let Ok(val) = env::var("STATCORE_MAX_EXACT_TOTAL") {
            if let Ok(n) = val.parse() {
                config.max_exact_total = n;
            }
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("📋 Configuration:");
        info!(
            "   Precision: {} digits (+{} guard)",
            self.default_precision, self.guard_digits
        );
        info!(
            "   Iteration caps: root {} / series {}",
            self.max_root_iterations, self.max_series_iterations
        );
        info!(
            "   Cache: ttl {}s, key digits {}",
            self.cache_ttl_secs, self.cache_key_digits
        );
        info!(
            "   Assumptions: alpha {:.3}, asymptotic n >= {}, min expected {:.1}",
            self.assumption_alpha, self.asymptotic_threshold, self.min_expected_frequency
        );
        if self.auto_switch {
            info!("   Auto-switch: enabled");
        } else {
            info!("   Auto-switch: disabled (recommendations only)");
        }
        info!(
            "   Multiplicity: warn at {}, escalate at {}",
            self.warning_threshold, self.escalation_threshold
        );
        info!(
            "   Exact limits: rank n <= {}, tables <= {}, total <= {}",
            self.exact_rank_limit, self.max_exact_tables, self.max_exact_total
        );
    }
}

/// Environment variable documentation
pub fn print_env_help() {
    println!("statcore Configuration Environment Variables:");
    println!();
    println!("  STATCORE_DEFAULT_PRECISION     - Significant digits when unspecified (default: 15)");
    println!("  STATCORE_GUARD_DIGITS          - Extra internal digits (default: 10)");
    println!("  STATCORE_MAX_ROOT_ITERATIONS   - Quantile root-finding cap (default: 400)");
    println!("  STATCORE_MAX_SERIES_ITERATIONS - Series/continued fraction cap (default: 20000)");
    println!();
    println!("Cache Configuration:");
    println!("  STATCORE_CACHE_TTL             - Entry time-to-live in seconds (default: 3600)");
    println!("  STATCORE_CACHE_KEY_DIGITS      - Digits kept in key normalization (default: 15)");
    println!();
    println!("Assumption Checks:");
    println!("  STATCORE_ASSUMPTION_ALPHA      - Diagnostic threshold (default: 0.05)");
    println!("  STATCORE_ASYMPTOTIC_N          - Sample size excusing non-normality (default: 30)");
    println!("  STATCORE_MIN_EXPECTED          - Minimum expected cell count (default: 5)");
    println!("  STATCORE_AUTO_SWITCH           - Run robust fallback on switch true/false (default: true)");
    println!();
    println!("Multiplicity:");
    println!("  STATCORE_WARN_UNCORRECTED      - Uncorrected tests before warning (default: 5)");
    println!("  STATCORE_ESCALATE_UNCORRECTED  - Uncorrected tests before escalation (default: 20)");
    println!("  STATCORE_EVENT_BUFFER          - Registry events kept in memory (default: 1000)");
    println!();
    println!("Exact Tests:");
    println!("  STATCORE_EXACT_RANK_LIMIT      - Largest group for exact rank tests (default: 50)");
    println!("  STATCORE_MAX_EXACT_TABLES      - Enumeration cap for exact tables (default: 2000000)");
    println!("  STATCORE_MAX_EXACT_TOTAL       - Largest table total for exact tests (default: 100000)");
    println!();
    println!("  RUST_LOG                       - Log level (e.g., info, debug, trace)");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.default_precision, 15);
        assert_eq!(config.guard_digits, 10);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.warning_threshold, 5);
        assert_eq!(config.escalation_threshold, 20);
        assert!(config.auto_switch);
        assert_eq!(config.max_exact_total, DEFAULT_MAX_EXACT_TOTAL);
    }

    #[test]
    fn test_exact_total_override() {
        env::set_var("STATCORE_MAX_EXACT_TOTAL", "500");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_exact_total, 500);
        env::remove_var("STATCORE_MAX_EXACT_TOTAL");
    }

    #[test]
    fn test_env_override() {
        env::set_var("STATCORE_DEFAULT_PRECISION", "30");
        env::set_var("STATCORE_CACHE_TTL", "60");
        env::set_var("STATCORE_AUTO_SWITCH", "false");

        let config = EngineConfig::from_env();
        assert_eq!(config.default_precision, 30);
        assert_eq!(config.cache_ttl_secs, 60);
        assert!(!config.auto_switch);

        env::remove_var("STATCORE_DEFAULT_PRECISION");
        env::remove_var("STATCORE_CACHE_TTL");
        env::remove_var("STATCORE_AUTO_SWITCH");
    }

    #[test]
    fn test_invalid_alpha_keeps_default() {
        env::set_var("STATCORE_ASSUMPTION_ALPHA", "1.5");
        let config = EngineConfig::from_env();
        assert_eq!(config.assumption_alpha, DEFAULT_ASSUMPTION_ALPHA);
        env::remove_var("STATCORE_ASSUMPTION_ALPHA");
    }
}
