//! Runtime values produced by literals, expressions and integrations

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A resolved variable value.
///
/// Numbers are always `f64`; integral numbers render without a fractional
/// part so `10` stays `10` in labels and in the canonical text form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric coercion: booleans count as 0/1, null as 0, strings are
    /// parsed after trimming (empty is 0), anything else is NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Null => 0.0,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(_) => f64::NAN,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) => true,
        }
    }

    /// Loose equality: numbers, numeric strings and booleans compare
    /// numerically, everything else structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Array(_), _) | (_, Value::Array(_)) => false,
            _ => self.to_number() == other.to_number(),
        }
    }

    /// Text used when a value is spliced into a label or concatenated with
    /// a string. Strings are inserted raw, arrays use the canonical form.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Array(_) => self.to_canonical_text(),
        }
    }

    /// Canonical text form (JSON).
    pub fn to_canonical_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// Expression source that evaluates back to this value. Same as the
    /// canonical form except that non-finite numbers are written as the
    /// `Infinity` and `NaN` constants instead of JSON's `null`.
    pub fn to_source_text(&self) -> String {
        match self {
            Value::Number(n) if n.is_nan() => "NaN".to_string(),
            Value::Number(n) if n.is_infinite() => {
                if *n > 0.0 { "Infinity" } else { "(-Infinity)" }.to_string()
            }
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(Value::to_source_text).collect();
                format!("[{}]", items.join(","))
            }
            _ => self.to_canonical_text(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if is_integral(*n) {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => items.serialize(serializer),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15
}

/// Formats a number the way a script author expects to see it.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if is_integral(n) {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(Value::Number(10.0).to_display_string(), "10");
        assert_eq!(Value::Number(-0.0).to_display_string(), "0");
        assert_eq!(Value::Number(2.5).to_display_string(), "2.5");
        assert_eq!(Value::Number(f64::INFINITY).to_display_string(), "Infinity");
    }

    #[test]
    fn test_canonical_text() {
        let value = Value::Array(vec![Value::Number(1.0), Value::from("a"), Value::Null]);
        assert_eq!(value.to_canonical_text(), r#"[1,"a",null]"#);
        assert_eq!(value.to_display_string(), r#"[1,"a",null]"#);
        assert_eq!(Value::from("hi").to_canonical_text(), r#""hi""#);
    }

    #[test]
    fn test_source_text() {
        assert_eq!(Value::Number(f64::INFINITY).to_source_text(), "Infinity");
        assert_eq!(Value::Number(f64::NEG_INFINITY).to_source_text(), "(-Infinity)");
        let value = Value::Array(vec![Value::Number(f64::NAN), Value::from("a"), Value::Number(2.5)]);
        assert_eq!(value.to_source_text(), r#"[NaN,"a",2.5]"#);
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::Null.to_number(), 0.0);
        assert!(Value::from("abc").to_number().is_nan());
        assert!(!Value::from("").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::from("3").loose_eq(&Value::Number(3.0)));
        assert!(!Value::Null.loose_eq(&Value::Number(0.0)));
    }

    #[test]
    fn test_deserialize_untagged() {
        let parsed: Vec<Value> = serde_json::from_str(r#"[1, "x", true, null, [2]]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                Value::Number(1.0),
                Value::from("x"),
                Value::Bool(true),
                Value::Null,
                Value::Array(vec![Value::Number(2.0)]),
            ]
        );
    }
}
