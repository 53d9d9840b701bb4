//! Attribute values carried by events and expectations.
//!
//! Event attributes arrive from the event stream as JSON scalars. This module
//! gives them a closed, comparable representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single event attribute value.
///
/// # Examples
///
/// ```
/// use eventwatch::AttributeValue;
///
/// let id = AttributeValue::from(42);
/// let kind = AttributeValue::from("vm_create");
///
/// assert_eq!(id.as_int(), Some(42));
/// assert_eq!(kind.as_str(), Some("vm_create"));
/// assert!(AttributeValue::Null.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum AttributeValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    String(String),
}

/// Discriminant of an [`AttributeValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    Timestamp,
    String,
}

impl ValueType {
    /// Returns a human-readable type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Timestamp => "timestamp",
            Self::String => "string",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AttributeValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for values the matcher treats as "absent": null and the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the discriminant of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Timestamp(_) => ValueType::Timestamp,
            Self::String(_) => ValueType::String,
        }
    }

    /// Equality used by attribute matching.
    ///
    /// Same as `==`, except that ints and floats compare numerically and a
    /// string compares with a timestamp as RFC 3339 text.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(_), Self::Float(_)) | (Self::Float(_), Self::Int(_)) => {
                self.as_float() == other.as_float()
            }
            (Self::String(s), Self::Timestamp(t)) | (Self::Timestamp(t), Self::String(s)) => {
                DateTime::parse_from_rfc3339(s).is_ok_and(|parsed| parsed == *t)
            }
            _ => self == other,
        }
    }

    /// Text used when the value is sent as a query filter operand.
    #[must_use]
    pub fn to_filter_operand(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Timestamp(v) => v.to_rfc3339(),
            Self::String(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;

        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::String(s),
            other @ (Value::Array(_) | Value::Object(_)) => Self::String(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values() {
        assert!(AttributeValue::Null.is_empty());
        assert!(AttributeValue::from("").is_empty());
        assert!(!AttributeValue::from("x").is_empty());
        assert!(!AttributeValue::Int(0).is_empty());
        assert!(!AttributeValue::Bool(false).is_empty());
    }

    #[test]
    fn test_string_equals_timestamp_as_rfc3339() {
        let ts: DateTime<Utc> = "2026-10-19T10:00:00Z".parse().unwrap();
        let value = AttributeValue::Timestamp(ts);
        assert!(AttributeValue::from("2026-10-19T10:00:00Z").loosely_equals(&value));
        assert!(value.loosely_equals(&AttributeValue::from("2026-10-19T12:00:00+02:00")));
        assert!(!AttributeValue::from("2026-10-19T10:00:01Z").loosely_equals(&value));
        assert!(!AttributeValue::from("yesterday").loosely_equals(&value));
    }

    #[test]
    fn test_loose_numeric_equality() {
        assert!(AttributeValue::Int(42).loosely_equals(&AttributeValue::Float(42.0)));
        assert!(!AttributeValue::Int(42).loosely_equals(&AttributeValue::Float(42.5)));
        assert!(!AttributeValue::Int(42).loosely_equals(&AttributeValue::from("42")));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(AttributeValue::from(serde_json::json!(7)), AttributeValue::Int(7));
        assert_eq!(AttributeValue::from(serde_json::json!(1.5)), AttributeValue::Float(1.5));
        assert_eq!(
            AttributeValue::from(serde_json::json!("vm_create")),
            AttributeValue::from("vm_create")
        );
        assert_eq!(AttributeValue::from(serde_json::Value::Null), AttributeValue::Null);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(AttributeValue::from(None::<i64>), AttributeValue::Null);
        assert_eq!(AttributeValue::from(Some(3_i64)), AttributeValue::Int(3));
    }

    #[test]
    fn test_value_type() {
        assert_eq!(AttributeValue::Int(1).value_type(), ValueType::Int);
        assert_eq!(AttributeValue::from("a").value_type(), ValueType::String);
        assert_eq!(AttributeValue::Null.value_type().as_str(), "null");
    }

    #[test]
    fn test_display() {
        assert_eq!(AttributeValue::Int(42).to_string(), "42");
        assert_eq!(AttributeValue::from("vm1").to_string(), "vm1");
        assert_eq!(AttributeValue::Null.to_string(), "None");
    }
}
