//! Flow predicates for XOR/OR split routing
//!
//! Predicates are evaluated against a case's data document (a JSON value)
//! when a split task produces output tokens. Paths use JSON Pointer syntax
//! (RFC 6901), e.g. `/order/total`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A routing predicate on a flow leaving an XOR or OR split task
///
/// Evaluation is pure and infallible: a pointer that does not resolve in the
/// case data makes the predicate false (`Exists` being the obvious
/// exception, which is false too).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Always true (the default route)
    Always,

    /// Always false
    Never,

    /// Value at `pointer` equals `value`
    Equals { pointer: String, value: Value },

    /// Value at `pointer` differs from `value` (missing counts as different)
    NotEquals { pointer: String, value: Value },

    /// A value exists at `pointer`
    Exists { pointer: String },

    /// Numeric value at `pointer` is strictly greater than `value`
    GreaterThan { pointer: String, value: f64 },

    /// Numeric value at `pointer` is strictly less than `value`
    LessThan { pointer: String, value: f64 },
}

impl Predicate {
    /// Equality predicate
    pub fn equals(pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    /// Inequality predicate
    pub fn not_equals(pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEquals {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    /// Presence predicate
    pub fn exists(pointer: impl Into<String>) -> Self {
        Self::Exists {
            pointer: pointer.into(),
        }
    }

    /// Numeric greater-than predicate
    pub fn greater_than(pointer: impl Into<String>, value: f64) -> Self {
        Self::GreaterThan {
            pointer: pointer.into(),
            value,
        }
    }

    /// Numeric less-than predicate
    pub fn less_than(pointer: impl Into<String>, value: f64) -> Self {
        Self::LessThan {
            pointer: pointer.into(),
            value,
        }
    }

    /// Evaluate this predicate against a case data document
    pub fn eval(&self, data: &Value) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Equals { pointer, value } => data.pointer(pointer) == Some(value),
            Self::NotEquals { pointer, value } => data.pointer(pointer) != Some(value),
            Self::Exists { pointer } => data.pointer(pointer).is_some(),
            Self::GreaterThan { pointer, value } => {
                matches!(data.pointer(pointer).and_then(Value::as_f64), Some(n) if n > *value)
            }
            Self::LessThan { pointer, value } => {
                matches!(data.pointer(pointer).and_then(Value::as_f64), Some(n) if n < *value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equals() {
        let data = json!({ "order": { "status": "paid" } });

        assert!(Predicate::equals("/order/status", "paid").eval(&data));
        assert!(!Predicate::equals("/order/status", "open").eval(&data));
        assert!(!Predicate::equals("/missing", "x").eval(&data));
    }

    #[test]
    fn test_not_equals_missing_pointer() {
        let data = json!({});
        // A missing value is "not equal" to anything
        assert!(Predicate::not_equals("/missing", 1).eval(&data));
    }

    #[test]
    fn test_numeric_comparisons() {
        let data = json!({ "score": 650 });

        assert!(Predicate::greater_than("/score", 600.0).eval(&data));
        assert!(!Predicate::greater_than("/score", 650.0).eval(&data));
        assert!(Predicate::less_than("/score", 700.0).eval(&data));
        assert!(!Predicate::less_than("/missing", 700.0).eval(&data));
    }

    #[test]
    fn test_exists() {
        let data = json!({ "a": { "b": null } });

        assert!(Predicate::exists("/a/b").eval(&data));
        assert!(!Predicate::exists("/a/c").eval(&data));
    }

    #[test]
    fn test_serialization() {
        let pred = Predicate::greater_than("/score", 600.0);
        let json = serde_json::to_string(&pred).unwrap();
        assert!(json.contains("\"op\":\"greater_than\""));

        let parsed: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pred);
    }
}
