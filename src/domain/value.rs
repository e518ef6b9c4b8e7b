//! Scalar cell values.
//!
//! Rows arrive from warehouse query results as JSON objects, so a cell
//! is one of null, integer, float or text. Values order naturally:
//! null first, then numbers (compared numerically across int/float),
//! then text (lexicographic).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A record keyed by physical column name
pub type Row = BTreeMap<String, Value>;

/// A single scalar cell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Fill value for pivot cells with no source row
    pub const ZERO: Value = Value::Int(0);

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            // -0.0 and 0.0 both equal Int(0), so they must equal each other
            (Value::Float(a), Value::Float(b)) if a == b => Ordering::Equal,
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Compare an integer with a float without rounding either
///
/// NaN sorts like `f64::total_cmp`: negative NaN below every number,
/// positive NaN above.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63; every float in [-2^63, 2^63) truncates to a valid i64
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_BOUND {
        return Ordering::Less;
    }
    if float < -I64_BOUND {
        return Ordering::Greater;
    }

    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => {
            let fraction = float - whole;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_ordering() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(2.5),
            Value::Null,
            Value::from("a"),
            Value::Int(3),
            Value::Int(-1),
        ];
        values.sort();

        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Int(-1),
                Value::Float(2.5),
                Value::Int(3),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_int_float_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::from("1"));
    }

    #[test]
    fn test_large_int_float_ordering_is_exact() {
        let two_53 = 9_007_199_254_740_992_i64;
        let float = Value::Float(two_53 as f64);

        assert_eq!(Value::Int(two_53), float);
        assert!(Value::Int(two_53 + 1) > float);
        assert!(Value::Int(i64::MAX) < Value::Float(9_223_372_036_854_775_808.0));
        assert!(Value::Int(i64::MIN) == Value::Float(-9_223_372_036_854_775_808.0));
        assert!(Value::Int(2) < Value::Float(2.5));
        assert!(Value::Int(-2) > Value::Float(-2.5));
        assert!(Value::Int(0) < Value::Float(f64::NAN));
        assert!(Value::Int(0) < Value::Float(f64::INFINITY));
    }

    #[test]
    fn test_signed_zeros_are_equal() {
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
        assert_eq!(Value::Int(0), Value::Float(-0.0));
    }

    #[test]
    fn test_json_row_parsing() {
        let row: Row =
            serde_json::from_str(r#"{"city": "Osaka", "count": 3, "ratio": 0.5, "note": null}"#)
                .unwrap();

        assert_eq!(row["city"], Value::from("Osaka"));
        assert!(matches!(row["count"], Value::Int(3)));
        assert!(matches!(row["ratio"], Value::Float(_)));
        assert!(row["note"].is_null());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Int(5).to_string(), "5");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::from("2020-01-01").to_string(), "2020-01-01");
    }
}
