//! Structured error types with machine-readable reason codes
//! Callers receive a stable code plus the context needed to remediate

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error response for boundary layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Engine error taxonomy
///
/// Assumption violations are not represented here: they are data attached
/// to a `TestResult` and never abort a computation.
#[derive(Debug)]
pub enum EngineError {
    // Request-level input errors (fatal to the single request, never retried)
    Validation { field: String, reason: String },

    // A numeric routine failed to converge at the requested digit count
    PrecisionOverflow {
        precision: u32,
        iterations: usize,
        routine: String,
    },

    // Export attempted while uncorrected hypotheses exist
    CorrectionBlocked {
        uncorrected: usize,
        available_methods: Vec<String>,
    },

    // Backing cache store failed; absorbed by the caching layer
    CacheUnavailable(String),

    // Caller-side deadline elapsed while waiting on an in-flight computation
    DeadlineExceeded { waited_ms: u64 },

    SerializationError(String),

    // Generic wrapper for unexpected failures
    Internal(anyhow::Error),
}

impl EngineError {
    /// Shorthand for a validation failure on a named field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a convergence failure
    pub fn overflow(precision: u32, iterations: usize, routine: &str) -> Self {
        Self::PrecisionOverflow {
            precision,
            iterations,
            routine: routine.to_string(),
        }
    }

    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::PrecisionOverflow { .. } => "PRECISION_OVERFLOW",
            Self::CorrectionBlocked { .. } => "CORRECTION_BLOCKED",
            Self::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Deterministic errors are pointless to retry with the same input
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::PrecisionOverflow { .. }
        )
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::Validation { field, reason } => {
                format!("Invalid input for '{field}': {reason}")
            }
            Self::PrecisionOverflow {
                precision,
                iterations,
                routine,
            } => format!(
                "{routine} did not converge to {precision} significant digits within {iterations} iterations"
            ),
            Self::CorrectionBlocked {
                uncorrected,
                available_methods,
            } => format!(
                "Export blocked: {uncorrected} hypotheses have no multiplicity correction (available methods: {})",
                available_methods.join(", ")
            ),
            Self::CacheUnavailable(msg) => format!("Cache store unavailable: {msg}"),
            Self::DeadlineExceeded { waited_ms } => {
                format!("Computation still in flight after {waited_ms}ms")
            }
            Self::SerializationError(msg) => format!("Serialization error: {msg}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Structured details that let the caller remediate
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            Self::PrecisionOverflow {
                precision,
                iterations,
                routine,
            } => Some(serde_json::json!({
                "precision": precision,
                "iterations": iterations,
                "routine": routine,
            })),
            Self::CorrectionBlocked {
                uncorrected,
                available_methods,
            } => Some(serde_json::json!({
                "uncorrected": uncorrected,
                "available_methods": available_methods,
            })),
            _ => None,
        }
    }

    /// Convert to structured response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            details: self.details(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

impl std::error::Error for EngineError {}

// Waiters on a shared computation each receive their own copy of the error.
// anyhow::Error is not Clone, so internal errors are re-wrapped by message.
impl Clone for EngineError {
    fn clone(&self) -> Self {
        match self {
            Self::Validation { field, reason } => Self::Validation {
                field: field.clone(),
                reason: reason.clone(),
            },
            Self::PrecisionOverflow {
                precision,
                iterations,
                routine,
            } => Self::PrecisionOverflow {
                precision: *precision,
                iterations: *iterations,
                routine: routine.clone(),
            },
            Self::CorrectionBlocked {
                uncorrected,
                available_methods,
            } => Self::CorrectionBlocked {
                uncorrected: *uncorrected,
                available_methods: available_methods.clone(),
            },
            Self::CacheUnavailable(msg) => Self::CacheUnavailable(msg.clone()),
            Self::DeadlineExceeded { waited_ms } => Self::DeadlineExceeded {
                waited_ms: *waited_ms,
            },
            Self::SerializationError(msg) => Self::SerializationError(msg.clone()),
            Self::Internal(err) => Self::Internal(anyhow::anyhow!("{err:#}")),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Helper trait for mapping `anyhow` validation failures onto a named field
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| EngineError::Validation {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}
