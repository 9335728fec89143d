// src/value.rs - Value system for monitored points
use serde::{Deserialize, Serialize};
use std::fmt;

/// Core value type enumeration for VIGIL
///
/// This enum represents all data types a monitored point can carry. Equality
/// is exact on the stored representation; change detection relies on it.
///
/// # Examples
///
/// ```rust
/// use vigil::Value;
///
/// let int_val = Value::Int(42);
/// let float_val = Value::Float(3.14);
///
/// // Type conversion
/// assert_eq!(int_val.as_float(), Some(42.0));
/// assert_eq!(float_val.as_int(), None); // lossy conversions are refused
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
    /// String value
    Text(String),
}

/// Value type enumeration for type checking and point declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Boolean point
    Bool,
    /// Integer point
    Int,
    /// Floating-point point
    Float,
    /// String point
    Text,
}

impl Value {
    /// Human readable name of the contained type
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// The [`ValueType`] of the contained value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
        }
    }

    /// Interpret the value as a boolean, if the conversion is exact
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Interpret the value as an integer, if the conversion is lossless
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Interpret the value as a float, if the conversion is lossless
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) => None,
        }
    }

    /// Coerce the value into a numeric for condition evaluation
    ///
    /// Unlike [`Value::as_float`] this also parses numeric text, since string
    /// points may still carry rule conditions. Returns `None` for text that
    /// does not parse as a number; callers treat that as a configuration
    /// error, not a crash.
    pub fn to_numeric(&self) -> Option<f64> {
        match self {
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            other => other.as_float(),
        }
    }

    /// Convert the value to the declared type of a point
    ///
    /// Used once at intake so that change detection compares like with like.
    /// Returns `None` when the conversion would be lossy or nonsensical.
    pub fn coerce(&self, target: ValueType) -> Option<Value> {
        match target {
            ValueType::Bool => self.as_bool().map(Value::Bool),
            ValueType::Int => self.as_int().map(Value::Int),
            ValueType::Float => self.to_numeric().map(Value::Float),
            ValueType::Text => Some(match self {
                Value::Text(s) => Value::Text(s.clone()),
                other => Value::Text(other.to_string()),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_equality() {
        assert_eq!(Value::Int(5), Value::Int(5));
        assert_ne!(Value::Int(5), Value::Float(5.0));
        assert_ne!(Value::Text("5".into()), Value::Int(5));
        assert_eq!(Value::Float(0.1 + 0.2), Value::Float(0.1 + 0.2));
    }

    #[test]
    fn numeric_coercion_parses_text() {
        assert_eq!(Value::Text(" 12.5 ".into()).to_numeric(), Some(12.5));
        assert_eq!(Value::Text("on".into()).to_numeric(), None);
        assert_eq!(Value::Bool(true).to_numeric(), Some(1.0));
    }

    #[test]
    fn coerce_to_declared_type() {
        assert_eq!(
            Value::Text("7".into()).coerce(ValueType::Float),
            Some(Value::Float(7.0))
        );
        assert_eq!(Value::Float(7.5).coerce(ValueType::Int), None);
        assert_eq!(Value::Float(7.0).coerce(ValueType::Int), Some(Value::Int(7)));
        assert_eq!(
            Value::Int(3).coerce(ValueType::Text),
            Some(Value::Text("3".into()))
        );
    }

    #[test]
    fn display_renders_raw_representation() {
        assert_eq!(Value::Float(12.25).to_string(), "12.25");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Text("dry-run".into()).to_string(), "dry-run");
    }
}
