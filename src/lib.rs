//! statcore Library
//!
//! Statistics computation and validation engine.
//! Runs classical hypothesis tests at a caller-chosen number of significant
//! digits and keeps the analysis honest around them.
//!
//! # Key Features
//! - 19 tests across location, variance, categorical, rank, correlation and
//!   regression families, computed in arbitrary-precision decimal arithmetic
//! - Assumption checks with automatic switching to robust counterparts
//! - Effect sizes, observed power and required sample size
//! - Session registry with Bonferroni/Holm/Benjamini–Hochberg correction and
//!   export gating
//! - Content-addressed result cache with singleflight
//! - Checksummed reproducibility bundles

pub mod assumptions;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod constants;
pub mod effects;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod missing_data;
pub mod pipeline;
pub mod power;
pub mod precision;
pub mod recommender;
pub mod registry;
pub mod tracing_setup;
pub mod validation;

pub use engine::{Sample, SummaryStats, Tails, TestData, TestRequest, TestResult, TestType};
pub use errors::{EngineError, Result};
pub use pipeline::{Envelope, StatisticsService};
pub use precision::{Decimal, PrecisionContext, PrecisionValue, RoundingMode};

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;
