//! Multiplicity corrections over a family of p-values
//!
//! Adjusted p-values are computed in exact decimal arithmetic so that a
//! comparison against alpha is never decided by binary floating noise.

use crate::errors::{EngineError, Result};
use crate::precision::{Decimal, PrecisionContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    Bonferroni,
    Holm,
    BenjaminiHochberg,
}

impl CorrectionMethod {
    pub const ALL: [CorrectionMethod; 3] = [Self::Bonferroni, Self::Holm, Self::BenjaminiHochberg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bonferroni => "bonferroni",
            Self::Holm => "holm",
            Self::BenjaminiHochberg => "benjamini_hochberg",
        }
    }

    /// Names offered to a caller whose export was blocked
    pub fn available() -> Vec<String> {
        Self::ALL.iter().map(|m| m.as_str().to_string()).collect()
    }
}

impl fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bonferroni" => Ok(Self::Bonferroni),
            "holm" | "holm_bonferroni" => Ok(Self::Holm),
            "benjamini_hochberg" | "bh" | "fdr" => Ok(Self::BenjaminiHochberg),
            other => Err(EngineError::validation(
                "method",
                format!("unknown correction method '{other}' (expected one of: bonferroni, holm, benjamini_hochberg)"),
            )),
        }
    }
}

/// Outcome for one p-value, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedP {
    pub raw_p: Decimal,
    pub adjusted_p: Decimal,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub method: CorrectionMethod,
    pub adjusted: Vec<AdjustedP>,
    /// Per-comparison threshold implied by the method
    ///
    /// Bonferroni: `alpha / n`. Holm: the threshold of the first rank that
    /// failed (or `alpha` when every rank passed). Benjamini–Hochberg:
    /// `k * q / n` for the largest passing rank `k`, `q / n` when none passed.
    pub adjusted_alpha: Decimal,
}

impl Adjustment {
    pub fn significant_count(&self) -> usize {
        self.adjusted.iter().filter(|a| a.significant).count()
    }
}

/// Adjust `p_values` for multiplicity at family level `alpha`
pub fn adjust(
    ctx: &PrecisionContext,
    p_values: &[Decimal],
    method: CorrectionMethod,
    alpha: &Decimal,
) -> Result<Adjustment> {
    let zero = ctx.int(0);
    let one = ctx.int(1);
    if alpha <= &zero || alpha >= &one {
        return Err(EngineError::validation("alpha", "alpha must lie strictly between 0 and 1"));
    }
    for p in p_values {
        if p < &zero || p > &one {
            return Err(EngineError::validation("p_values", format!("p-value {p} outside [0, 1]")));
        }
    }

    let n = p_values.len();
    if n == 0 {
        return Ok(Adjustment {
            method,
            adjusted: Vec::new(),
            adjusted_alpha: alpha.clone(),
        });
    }
    let count = ctx.uint(n as u64);

    // ascending by p, ties keep input order
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p_values[a].cmp(&p_values[b]).then(a.cmp(&b)));

    let mut adjusted = vec![zero.clone(); n];
    let mut significant = vec![false; n];

    let adjusted_alpha = match method {
        CorrectionMethod::Bonferroni => {
            let threshold = alpha / &count;
            for i in 0..n {
                adjusted[i] = (&p_values[i] * &count).min(one.clone());
                significant[i] = p_values[i] <= threshold;
            }
            threshold
        }
        CorrectionMethod::Holm => {
            let mut running = zero.clone();
            let mut rejecting = true;
            let mut failed_threshold = None;
            for (rank, &idx) in order.iter().enumerate() {
                let remaining = ctx.uint((n - rank) as u64);
                let scaled = (&p_values[idx] * &remaining).min(one.clone());
                running = running.max(scaled);
                adjusted[idx] = running.clone();

                if rejecting {
                    let threshold = alpha / &remaining;
                    if p_values[idx] <= threshold {
                        significant[idx] = true;
                    } else {
                        rejecting = false;
                        failed_threshold = Some(threshold);
                    }
                }
            }
            failed_threshold.unwrap_or_else(|| alpha.clone())
        }
        CorrectionMethod::BenjaminiHochberg => {
            let mut passing = 0usize;
            for (rank, &idx) in order.iter().enumerate() {
                let threshold = &(alpha * &ctx.uint(rank as u64 + 1)) / &count;
                if p_values[idx] <= threshold {
                    passing = rank + 1;
                }
            }
            for &idx in order.iter().take(passing) {
                significant[idx] = true;
            }

            // step-up: running minimum from the largest rank down
            let mut running = one.clone();
            for (rank, &idx) in order.iter().enumerate().rev() {
                let scaled = &(&p_values[idx] * &count) / &ctx.uint(rank as u64 + 1);
                running = running.min(scaled.min(one.clone()));
                adjusted[idx] = running.clone();
            }
            &(alpha * &ctx.uint(passing.max(1) as u64)) / &count
        }
    };

    let adjusted = p_values
        .iter()
        .zip(adjusted)
        .zip(significant)
        .map(|((raw, adjusted_p), significant)| AdjustedP {
            raw_p: raw.clone(),
            adjusted_p,
            significant,
        })
        .collect();

    Ok(Adjustment {
        method,
        adjusted,
        adjusted_alpha,
    })
}
