//! Input validation for test requests
//! Rejects malformed input before any numeric routine runs

use crate::constants::{
    MAX_GROUPS, MAX_OBSERVATIONS_PER_GROUP, MAX_PRECISION_DIGITS, MAX_TABLE_CELLS,
    MIN_PRECISION_DIGITS,
};
use anyhow::{anyhow, Result};

/// Maximum lengths for identifiers and free text
pub const MAX_OWNER_LENGTH: usize = 128;
pub const MAX_LABEL_LENGTH: usize = 256;
pub const MAX_JUSTIFICATION_LENGTH: usize = 4_000;
pub const MAX_VARIABLES_PER_HYPOTHESIS: usize = 64;

/// Validate session owner
pub fn validate_owner(owner: &str) -> Result<()> {
    if owner.is_empty() {
        return Err(anyhow!("owner cannot be empty"));
    }

    if owner.len() > MAX_OWNER_LENGTH {
        return Err(anyhow!(
            "owner too long: {} chars (max: {})",
            owner.len(),
            MAX_OWNER_LENGTH
        ));
    }

    if !owner
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "owner contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate session id (UUID format)
pub fn validate_session_id(session_id: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(session_id).map_err(|e| anyhow!("Invalid session id UUID format: {e}"))
}

/// Validate significance level
pub fn validate_alpha(alpha: f64) -> Result<()> {
    if !alpha.is_finite() || alpha <= 0.0 || alpha >= 1.0 {
        return Err(anyhow!("alpha must lie strictly between 0 and 1, got {alpha}"));
    }
    Ok(())
}

/// Validate requested significant digits
pub fn validate_precision(digits: u32) -> Result<()> {
    if !(MIN_PRECISION_DIGITS..=MAX_PRECISION_DIGITS).contains(&digits) {
        return Err(anyhow!(
            "precision must be between {MIN_PRECISION_DIGITS} and {MAX_PRECISION_DIGITS}, got {digits}"
        ));
    }
    Ok(())
}

/// Validate a probability parameter in the closed or open unit interval
pub fn validate_probability(p: f64, open: bool) -> Result<()> {
    let ok = if open {
        p > 0.0 && p < 1.0
    } else {
        (0.0..=1.0).contains(&p)
    };
    if !p.is_finite() || !ok {
        return Err(anyhow!("probability out of range: {p}"));
    }
    Ok(())
}

/// Validate one sample of observations
pub fn validate_sample(values: &[f64], min_len: usize) -> Result<()> {
    if values.len() < min_len {
        return Err(anyhow!(
            "fewer than {min_len} observations in group (got {})",
            values.len()
        ));
    }

    if values.len() > MAX_OBSERVATIONS_PER_GROUP {
        return Err(anyhow!(
            "too many observations: {} (max: {})",
            values.len(),
            MAX_OBSERVATIONS_PER_GROUP
        ));
    }

    if values.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("observations contain NaN or Inf values"));
    }

    Ok(())
}

/// Validate group count
pub fn validate_group_count(count: usize, min: usize, max: Option<usize>) -> Result<()> {
    if count < min {
        return Err(anyhow!("at least {min} groups required (got {count})"));
    }
    let max = max.unwrap_or(MAX_GROUPS);
    if count > max {
        return Err(anyhow!("too many groups: {count} (max: {max})"));
    }
    Ok(())
}

/// Validate group label
pub fn validate_label(label: &str) -> Result<()> {
    if label.len() > MAX_LABEL_LENGTH {
        return Err(anyhow!(
            "label too long: {} chars (max: {})",
            label.len(),
            MAX_LABEL_LENGTH
        ));
    }
    Ok(())
}

/// Validate a count vector (non-negative integers)
pub fn validate_counts(counts: &[u64], min_len: usize) -> Result<()> {
    if counts.len() < min_len {
        return Err(anyhow!(
            "at least {min_len} categories required (got {})",
            counts.len()
        ));
    }
    if counts.len() > MAX_TABLE_CELLS {
        return Err(anyhow!(
            "too many categories: {} (max: {})",
            counts.len(),
            MAX_TABLE_CELLS
        ));
    }
    if counts.iter().all(|&c| c == 0) {
        return Err(anyhow!("all counts are zero"));
    }
    checked_total(counts.iter().copied())?;
    Ok(())
}

/// Sum of counts, refusing totals that do not fit in a u64
pub fn checked_total(counts: impl IntoIterator<Item = u64>) -> Result<u64> {
    counts
        .into_iter()
        .try_fold(0u64, |acc, c| acc.checked_add(c))
        .ok_or_else(|| anyhow!("total count exceeds {}", u64::MAX))
}

/// Validate a contingency table: rectangular, at least 2x2, non-empty margins
pub fn validate_table(table: &[Vec<u64>]) -> Result<(usize, usize)> {
    let rows = table.len();
    if rows < 2 {
        return Err(anyhow!("contingency table needs at least 2 rows (got {rows})"));
    }
    let cols = table[0].len();
    if cols < 2 {
        return Err(anyhow!(
            "contingency table needs at least 2 columns (got {cols})"
        ));
    }
    if table.iter().any(|row| row.len() != cols) {
        return Err(anyhow!("contingency table rows have unequal lengths"));
    }
    if rows * cols > MAX_TABLE_CELLS {
        return Err(anyhow!(
            "contingency table too large: {} cells (max: {})",
            rows * cols,
            MAX_TABLE_CELLS
        ));
    }
    if table.iter().any(|row| row.iter().all(|&c| c == 0)) {
        return Err(anyhow!("contingency table has an empty row"));
    }
    if (0..cols).any(|j| table.iter().all(|row| row[j] == 0)) {
        return Err(anyhow!("contingency table has an empty column"));
    }
    // every margin is bounded by the grand total
    checked_total(table.iter().flatten().copied())?;
    Ok((rows, cols))
}

/// Validate export justification text
pub fn validate_justification(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(anyhow!("forced export requires a justification"));
    }
    if text.len() > MAX_JUSTIFICATION_LENGTH {
        return Err(anyhow!(
            "justification too long: {} chars (max: {})",
            text.len(),
            MAX_JUSTIFICATION_LENGTH
        ));
    }
    Ok(())
}

/// Validate the variable names attached to a hypothesis
pub fn validate_variables(variables: &[String]) -> Result<()> {
    if variables.len() > MAX_VARIABLES_PER_HYPOTHESIS {
        return Err(anyhow!(
            "too many variables: {} (max: {})",
            variables.len(),
            MAX_VARIABLES_PER_HYPOTHESIS
        ));
    }
    for variable in variables {
        validate_label(variable)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("analyst-7").is_ok());
        assert!(validate_owner("a.b@c_d").is_ok());
        assert!(validate_owner("").is_err());
        assert!(validate_owner("has space").is_err());
        assert!(validate_owner(&"x".repeat(MAX_OWNER_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_alpha() {
        assert!(validate_alpha(0.05).is_ok());
        assert!(validate_alpha(0.0).is_err());
        assert!(validate_alpha(1.0).is_err());
        assert!(validate_alpha(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_sample() {
        assert!(validate_sample(&[1.0, 2.0], 2).is_ok());
        let err = validate_sample(&[1.0], 2).unwrap_err();
        assert!(err.to_string().contains("fewer than 2 observations"));
        assert!(validate_sample(&[1.0, f64::INFINITY], 2).is_err());
    }

    #[test]
    fn test_validate_table() {
        assert_eq!(validate_table(&[vec![1, 2], vec![3, 4]]).unwrap(), (2, 2));
        assert!(validate_table(&[vec![1, 2]]).is_err());
        assert!(validate_table(&[vec![1, 2], vec![3]]).is_err());
        assert!(validate_table(&[vec![0, 0], vec![3, 4]]).is_err());
        assert!(validate_table(&[vec![0, 2], vec![0, 4]]).is_err());
    }

    #[test]
    fn test_counts_that_overflow_are_rejected() {
        let huge = u64::MAX / 2 + 1;
        assert!(validate_table(&[vec![huge, 1], vec![huge, 1]]).is_err());
        assert!(validate_counts(&[huge, huge], 2).is_err());
        assert_eq!(checked_total([huge, huge - 1]).unwrap(), u64::MAX);
    }

    #[test]
    fn test_validate_precision() {
        assert!(validate_precision(1).is_ok());
        assert!(validate_precision(50).is_ok());
        assert!(validate_precision(0).is_err());
        assert!(validate_precision(51).is_err());
    }

    #[test]
    fn test_validate_session_id() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(validate_session_id(&id.to_string()).unwrap(), id);
        assert!(validate_session_id("not-a-uuid").is_err());
    }
}
