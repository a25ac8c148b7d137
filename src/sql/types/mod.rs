use std::{cmp::Ordering, fmt::Display, num::IntErrorKind};

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{Error, Result};

/// Supported column (and registry entry) data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl DataType {
    /// Resolves a type name or one of its SQL aliases (case-insensitive)
    pub fn from_name(name: &str) -> Option<DataType> {
        Some(match name.to_uppercase().as_ref() {
            "STRING" | "TEXT" | "VARCHAR" | "CHAR" => DataType::String,
            "NUMBER" | "FLOAT" | "DOUBLE" | "REAL" | "DECIMAL" => DataType::Number,
            "INTEGER" | "INT" | "BIGINT" => DataType::Integer,
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            "OBJECT" | "JSON" => DataType::Object,
            "ARRAY" => DataType::Array,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
            DataType::Object => "object",
            DataType::Array => "array",
        }
    }

    /// Whether a non-null value already has this type's shape
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::String, Value::String(_)) => true,
            (DataType::Number, Value::Number(_)) => true,
            (DataType::Integer, Value::Number(n)) => as_integer(n).is_some(),
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Object, Value::Object(_)) => true,
            (DataType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }

    /// Whether values of this type are stored as JSON text inside string literals
    pub fn is_document(&self) -> bool {
        matches!(self, DataType::Object | DataType::Array)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row is a positional array of cell values, one per column in definition order
pub type Row = Vec<Value>;

/// Partial ordering between two cell values (used by ORDER BY and range comparisons).
///
/// NULL sorts before everything else. Strings compared against numbers or booleans
/// fall back to their textual forms.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        (Value::String(a), Value::Number(_) | Value::Bool(_)) => {
            a.as_str().partial_cmp(to_text(b).as_str())
        }
        (Value::Number(_) | Value::Bool(_), Value::String(b)) => {
            to_text(a).as_str().partial_cmp(b.as_str())
        }
        (_, _) => None,
    }
}

/// Equality as the WHERE evaluator sees it: numbers by value, NULL only equals NULL
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => compare(a, b) == Some(Ordering::Equal),
    }
}

/// Truthiness of a bare value used as a condition
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Converts a numeric literal into a JSON number, integral when it has no fraction
pub fn number(text: &str, negative: bool) -> Result<Value> {
    if text.contains('.') {
        let value: f64 = text.parse()?;
        Ok(Value::from(if negative { -value } else { value }))
    } else {
        integer(text, negative).map(Value::from)
    }
}

/// Parses the digits of an integer literal, the sign given separately. The full i64 range
/// is accepted, `i64::MIN` included.
pub fn integer(text: &str, negative: bool) -> Result<i64> {
    let magnitude: u64 = text.parse().map_err(|e: std::num::ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow => out_of_range(text),
        _ => Error::Parse(format!("Invalid integer {}", text)),
    })?;
    let value = if negative { 0i64.checked_sub_unsigned(magnitude) } else { i64::try_from(magnitude).ok() };
    value.ok_or_else(|| out_of_range(text))
}

fn out_of_range(text: &str) -> Error {
    Error::Parse(format!("Integer out of range: {}", text))
}

/// A JSON number as an i64, when it is whole and fits
pub fn as_integer(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.is_u64() {
        return None;
    }
    // 2^63 is exactly representable; anything at or above it does not fit
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
        .map(|f| f as i64)
}

/// Textual form of a value, strings unquoted
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use serde_json::json;

    use super::{DataType, compare, integer, loose_eq, truthy};
    use crate::error::Error;

    #[test]
    fn test_datatype_aliases() {
        assert_eq!(DataType::from_name("int"), Some(DataType::Integer));
        assert_eq!(DataType::from_name("VarChar"), Some(DataType::String));
        assert_eq!(DataType::from_name("json"), Some(DataType::Object));
        assert_eq!(DataType::from_name("blob"), None);
        assert_eq!(serde_json::to_string(&DataType::Boolean).unwrap(), "\"boolean\"");
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        assert!(DataType::Integer.matches(&json!(3)));
        assert!(DataType::Integer.matches(&json!(3.0)));
        assert!(!DataType::Integer.matches(&json!(3.5)));
        assert!(!DataType::Integer.matches(&json!("3")));
        assert!(!DataType::Integer.matches(&json!(1e300)));
        assert!(!DataType::Integer.matches(&json!(u64::MAX)));
        assert!(DataType::Integer.matches(&json!(i64::MIN)));
    }

    #[test]
    fn test_integer_literals() {
        assert_eq!(integer("42", true).ok(), Some(-42));
        assert_eq!(integer("9223372036854775807", false).ok(), Some(i64::MAX));
        assert_eq!(integer("9223372036854775808", true).ok(), Some(i64::MIN));
        assert!(matches!(integer("9223372036854775808", false), Err(Error::Parse(_))));
        assert!(matches!(integer("18446744073709551616", false), Err(Error::Parse(_))));
        assert!(matches!(integer("1e5", false), Err(Error::Parse(_))));
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!(null), &json!(0)), Some(Ordering::Less));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!([1]), &json!(1)), None);
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(loose_eq(&json!("5"), &json!(5)));
        assert!(!loose_eq(&json!(null), &json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!(2)));
    }
}
