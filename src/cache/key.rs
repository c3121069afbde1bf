//! Deterministic cache keys
//!
//! A key is the hex SHA-256 of a canonical JSON rendering of
//! `{test_type, params, precision}`: object keys sorted, nulls dropped and
//! every number normalized to a fixed count of significant digits, so that
//! field order and floating noise below that count never split a key.

use crate::engine::TestRequest;
use crate::errors::{EngineError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a request; `default_precision` stands in for an absent precision
    pub fn derive(request: &TestRequest, significant_digits: usize, default_precision: u32) -> Result<Self> {
        let canonical = canonical_request(request, significant_digits, default_precision)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical text hashed into the key
pub fn canonical_request(request: &TestRequest, significant_digits: usize, default_precision: u32) -> Result<String> {
    let mut params = serde_json::to_value(request).map_err(|e| EngineError::SerializationError(e.to_string()))?;
    if let Value::Object(map) = &mut params {
        map.remove("test_type");
        map.remove("precision");
    }
    let envelope = serde_json::json!({
        "test_type": request.test_type,
        "params": params,
        "precision": request.precision.unwrap_or(default_precision),
    });
    let mut out = String::new();
    write_canonical(&envelope, significant_digits.max(1), &mut out);
    Ok(out)
}

/// Render `value` with sorted keys and normalized numbers
pub fn write_canonical(value: &Value, digits: usize, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = write!(out, "{i}");
            } else if let Some(u) = n.as_u64() {
                let _ = write!(out, "{u}");
            } else if let Some(f) = n.as_f64() {
                out.push_str(&normalize_float(f, digits));
            }
        }
        Value::String(s) => {
            // serde_json escaping of a plain string cannot fail
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, digits, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_default());
                out.push(':');
                write_canonical(v, digits, out);
            }
            out.push('}');
        }
    }
}

/// Floats with an integral value print as integers; the rest in scientific
/// notation rounded to `digits` significant digits without trailing zeros
fn normalize_float(f: f64, digits: usize) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        return format!("{}", f as i64);
    }
    let formatted = format!("{:.*e}", digits - 1, f);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let mantissa = if mantissa.contains('.') {
                mantissa.trim_end_matches('0').trim_end_matches('.')
            } else {
                mantissa
            };
            // an integral value can reappear after rounding
            match exponent.parse::<i32>() {
                Ok(e) if (0..15).contains(&e) && !mantissa.contains('.') => {
                    let sign = if f < 0.0 { "-" } else { "" };
                    let digit = mantissa.trim_start_matches('-');
                    format!("{sign}{digit}{}", "0".repeat(e as usize))
                }
                _ => format!("{mantissa}e{exponent}"),
            }
        }
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Sample, TestData, TestType};
    use serde_json::json;

    fn request(values: Vec<f64>) -> TestRequest {
        TestRequest::new(
            TestType::OneSampleT,
            TestData::Samples {
                groups: vec![Sample::new("x", values)],
            },
        )
    }

    #[test]
    fn test_key_is_stable_and_hex() {
        let a = CacheKey::derive(&request(vec![1.0, 2.0, 3.0]), 15, 15).unwrap();
        let b = CacheKey::derive(&request(vec![1.0, 2.0, 3.0]), 15, 15).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_floating_noise_does_not_split_keys() {
        let a = CacheKey::derive(&request(vec![0.1 + 0.2]), 15, 15).unwrap();
        let b = CacheKey::derive(&request(vec![0.3]), 15, 15).unwrap();
        assert_eq!(a, b);
        let c = CacheKey::derive(&request(vec![0.31]), 15, 15).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_option_order_and_nulls_are_irrelevant() {
        let a = request(vec![1.0]).with_option("mu", json!(1.5)).with_option("exact", json!(true));
        let b = request(vec![1.0])
            .with_option("exact", json!(true))
            .with_option("mu", json!(1.5))
            .with_option("unused", Value::Null);
        assert_eq!(
            CacheKey::derive(&a, 15, 15).unwrap(),
            CacheKey::derive(&b, 15, 15).unwrap()
        );
    }

    #[test]
    fn test_explicit_default_precision_matches_absent() {
        let a = request(vec![1.0, 2.0]);
        let b = request(vec![1.0, 2.0]).with_precision(15);
        assert_eq!(
            CacheKey::derive(&a, 15, 15).unwrap(),
            CacheKey::derive(&b, 15, 15).unwrap()
        );
        let c = request(vec![1.0, 2.0]).with_precision(20);
        assert_ne!(
            CacheKey::derive(&a, 15, 15).unwrap(),
            CacheKey::derive(&c, 15, 15).unwrap()
        );
    }

    #[test]
    fn test_canonical_text_sorts_keys() {
        let mut out = String::new();
        write_canonical(&json!({"b": 1, "a": [2.5, 3.0]}), 15, &mut out);
        assert_eq!(out, r#"{"a":[2.5e0,3],"b":1}"#);
    }
}
