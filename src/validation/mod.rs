//! Snapshot Validation Module
//!
//! Pre-flight checks for raw order book snapshots before they reach the
//! engines:
//! - Required fields (`bids`, `asks`)
//! - Level shape: `[price, volume]` with finite numbers
//! - Ranges: price > 0, volume >= 0
//! - Cross-field: best bid strictly below best ask, wide-spread warning
//!
//! Validation never raises; problems are reported in [`ValidationResult`].
//! `sanitize_snapshot` is a lenient repair pass for callers that prefer
//! defaults over rejection. The engines themselves never sanitize.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::types::as_finite;

/// Outcome of validating one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Stateless snapshot validator
pub struct DataValidator;

impl DataValidator {
    pub const REQUIRED_FIELDS: [&'static str; 2] = ["bids", "asks"];

    /// Levels inspected per side
    pub const MAX_LEVELS_CHECKED: usize = 10;

    /// Spreads wider than this fraction of mid produce a warning
    pub const WIDE_SPREAD_FRACTION: f64 = 0.1;

    pub const DEFAULT_PRICE: f64 = 100.0;
    pub const DEFAULT_VOLUME: f64 = 0.0;

    pub fn validate_snapshot(snapshot: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for field in Self::REQUIRED_FIELDS {
            if snapshot.get(field).is_none() {
                errors.push(format!("Missing required field: {field}"));
            }
        }
        if !errors.is_empty() {
            return ValidationResult::from_parts(errors, warnings);
        }

        let bids = Self::check_side(snapshot, "bids", "Bid", &mut errors);
        let asks = Self::check_side(snapshot, "asks", "Ask", &mut errors);

        // Cross-checks only make sense on an otherwise clean book
        if errors.is_empty() {
            if let (Some(bids), Some(asks)) = (bids, asks) {
                let best_bid = bids.first().and_then(Self::level_price);
                let best_ask = asks.first().and_then(Self::level_price);
                if let (Some(best_bid), Some(best_ask)) = (best_bid, best_ask) {
                    Self::check_cross(best_bid, best_ask, &mut errors, &mut warnings);
                }
            }
        }

        if let Some(mid) = snapshot.get("mid_price") {
            match as_finite(mid) {
                Some(m) if m > 0.0 => {}
                _ => errors.push(format!("Invalid mid_price: {mid}")),
            }
        }

        ValidationResult::from_parts(errors, warnings)
    }

    /// Whether a JSON value is a finite number (numeric strings included)
    pub fn is_valid_number(value: &Value) -> bool {
        as_finite(value).is_some()
    }

    /// Copy of the snapshot with invalid numbers replaced by defaults.
    ///
    /// Prices fall back to 100.0, volumes to 0.0 and `mid_price` to 100.0.
    /// Entries that are not `[price, volume]` lists are dropped.
    pub fn sanitize_snapshot(snapshot: &Value) -> Value {
        let mut result = snapshot.clone();
        let Some(map) = result.as_object_mut() else {
            return result;
        };

        if let Some(mid) = map.get_mut("mid_price") {
            *mid = Self::sanitized_number(mid, Self::DEFAULT_PRICE);
        }

        for field in Self::REQUIRED_FIELDS {
            if let Some(Value::Array(levels)) = map.get_mut(field) {
                let cleaned = levels
                    .iter()
                    .filter_map(Value::as_array)
                    .filter(|pair| pair.len() >= 2)
                    .map(|pair| {
                        Value::Array(vec![
                            Self::sanitized_number(&pair[0], Self::DEFAULT_PRICE),
                            Self::sanitized_number(&pair[1], Self::DEFAULT_VOLUME),
                        ])
                    })
                    .collect();
                *levels = cleaned;
            }
        }

        result
    }

    fn check_side<'a>(
        snapshot: &'a Value,
        field: &str,
        label: &str,
        errors: &mut Vec<String>,
    ) -> Option<&'a Vec<Value>> {
        let Some(levels) = snapshot.get(field).and_then(Value::as_array) else {
            errors.push(format!("{label}s must be a list"));
            return None;
        };
        if levels.is_empty() {
            errors.push(format!("{label}s list cannot be empty"));
            return None;
        }

        for (i, level) in levels.iter().take(Self::MAX_LEVELS_CHECKED).enumerate() {
            let Some(pair) = level.as_array().filter(|p| p.len() >= 2) else {
                errors.push(format!("{label} level {i}: must be [price, volume]"));
                continue;
            };
            let (price, volume) = (&pair[0], &pair[1]);

            if !matches!(as_finite(price), Some(p) if p > 0.0) {
                errors.push(format!("{label} level {i}: invalid price {price}"));
            }
            if !matches!(as_finite(volume), Some(v) if v >= 0.0) {
                errors.push(format!("{label} level {i}: invalid volume {volume}"));
            }
        }

        Some(levels)
    }

    fn check_cross(best_bid: f64, best_ask: f64, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
        if best_bid >= best_ask {
            errors.push(format!(
                "Invalid book: crossed book, best_bid ({best_bid}) >= best_ask ({best_ask})"
            ));
        }

        let spread = best_ask - best_bid;
        let mid = (best_bid + best_ask) / 2.0;
        if spread >= 0.0 && mid > 0.0 && spread > mid * Self::WIDE_SPREAD_FRACTION {
            warnings.push(format!(
                "Wide spread: {spread:.4} ({:.1}%)",
                spread / mid * 100.0
            ));
        }
    }

    fn level_price(level: &Value) -> Option<f64> {
        level.as_array().and_then(|pair| pair.first()).and_then(as_finite)
    }

    fn sanitized_number(value: &Value, default: f64) -> Value {
        let number = as_finite(value).unwrap_or(default);
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Validate typed `[price, volume]` ladders.
///
/// Non-finite inputs are carried as their string form so they fail the
/// number check with a readable message.
pub fn validate_order_book(bids: &[[f64; 2]], asks: &[[f64; 2]]) -> ValidationResult {
    let encode = |x: f64| {
        Number::from_f64(x)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(x.to_string()))
    };
    let ladder = |pairs: &[[f64; 2]]| {
        Value::Array(
            pairs
                .iter()
                .map(|[p, v]| Value::Array(vec![encode(*p), encode(*v)]))
                .collect(),
        )
    };

    let snapshot = serde_json::json!({ "bids": ladder(bids), "asks": ladder(asks) });
    DataValidator::validate_snapshot(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_snapshot() {
        let snapshot = json!({
            "bids": [[100.0, 10.0], [99.9, 20.0]],
            "asks": [[100.1, 10.0], [100.2, 20.0]],
        });
        let result = DataValidator::validate_snapshot(&snapshot);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_crossed_book_rejected() {
        let snapshot = json!({ "bids": [[101.0, 10.0]], "asks": [[100.0, 10.0]] });
        let result = DataValidator::validate_snapshot(&snapshot);
        assert!(!result.is_valid);
        assert!(
            result.errors.iter().any(|e| e.contains("crossed")),
            "error should name the crossed book: {:?}",
            result.errors
        );
    }

    #[test]
    fn test_locked_book_rejected() {
        let result = validate_order_book(&[[100.0, 1.0]], &[[100.0, 1.0]]);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_missing_fields() {
        let result = DataValidator::validate_snapshot(&json!({ "bids": [] }));
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Missing required field: asks".to_string()]);
    }

    #[test]
    fn test_empty_and_non_list_sides() {
        let result = DataValidator::validate_snapshot(&json!({ "bids": [], "asks": "nope" }));
        assert!(!result.is_valid);
        assert!(result.errors.contains(&"Bids list cannot be empty".to_string()));
        assert!(result.errors.contains(&"Asks must be a list".to_string()));
    }

    #[test]
    fn test_bad_levels_reported_per_level() {
        let snapshot = json!({
            "bids": [[100.0, 10.0], [0.0, 5.0], [99.0, -1.0], [98.0]],
            "asks": [["abc", 1.0], [101.0, null]],
        });
        let result = DataValidator::validate_snapshot(&snapshot);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.starts_with("Bid level 1: invalid price")));
        assert!(result.errors.iter().any(|e| e.starts_with("Bid level 2: invalid volume")));
        assert!(result.errors.iter().any(|e| e == "Bid level 3: must be [price, volume]"));
        assert!(result.errors.iter().any(|e| e.starts_with("Ask level 0: invalid price")));
        assert!(result.errors.iter().any(|e| e.starts_with("Ask level 1: invalid volume")));
    }

    #[test]
    fn test_non_finite_typed_input_rejected() {
        let result = validate_order_book(&[[f64::NAN, 1.0]], &[[100.0, f64::INFINITY]]);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2, "errors: {:?}", result.errors);
        assert!(result.errors[0].contains("NaN"));
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let snapshot = json!({ "bids": [["100.0", "3"]], "asks": [["100.5", "2.5"]] });
        assert!(DataValidator::validate_snapshot(&snapshot).is_valid);
        assert!(!DataValidator::is_valid_number(&json!("NaN")));
        assert!(!DataValidator::is_valid_number(&json!("inf")));
        assert!(DataValidator::is_valid_number(&json!(42)));
    }

    #[test]
    fn test_wide_spread_warning() {
        let result = validate_order_book(&[[90.0, 1.0]], &[[110.0, 1.0]]);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("Wide spread: 20.0000"));
    }

    #[test]
    fn test_only_first_ten_levels_checked() {
        let mut bids: Vec<[f64; 2]> = (0..10).map(|i| [100.0 - i as f64, 1.0]).collect();
        bids.push([-5.0, 1.0]);
        let result = validate_order_book(&bids, &[[101.0, 1.0]]);
        assert!(result.is_valid);
    }

    #[test]
    fn test_mid_price_field_checked() {
        let snapshot = json!({ "bids": [[100.0, 1.0]], "asks": [[101.0, 1.0]], "mid_price": -3 });
        let result = DataValidator::validate_snapshot(&snapshot);
        assert!(!result.is_valid);
        assert!(result.errors[0].starts_with("Invalid mid_price"));
    }

    #[test]
    fn test_sanitize_replaces_invalid_numbers() {
        let snapshot = json!({
            "bids": [["bad", 10.0], [99.0, "NaN"], "junk"],
            "asks": [[101.0, 5.0]],
            "mid_price": null,
        });
        let cleaned = DataValidator::sanitize_snapshot(&snapshot);
        assert_eq!(cleaned["bids"], json!([[100.0, 10.0], [99.0, 0.0]]));
        assert_eq!(cleaned["asks"], json!([[101.0, 5.0]]));
        assert_eq!(cleaned["mid_price"], json!(100.0));
    }
}
