//! The closed value system exchanged between the engine and every backend.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub type DescriptorId = Uuid;
pub type RetrievableId = Uuid;

/// Upper bound (in characters) of a [`Value::String`]. Unbounded text is [`Value::Text`].
pub const STRING_MAX_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Type {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Text,
    DateTime,
    Uuid,
    BooleanVector(usize),
    IntVector(usize),
    LongVector(usize),
    FloatVector(usize),
    DoubleVector(usize),
}

impl Type {
    pub fn is_vector(&self) -> bool {
        self.dimensions().is_some()
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Type::String | Type::Text)
    }

    pub fn dimensions(&self) -> Option<usize> {
        match self {
            Type::BooleanVector(n)
            | Type::IntVector(n)
            | Type::LongVector(n)
            | Type::FloatVector(n)
            | Type::DoubleVector(n) => Some(*n),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::Boolean => "BOOLEAN",
            Type::Byte => "BYTE",
            Type::Short => "SHORT",
            Type::Int => "INT",
            Type::Long => "LONG",
            Type::Float => "FLOAT",
            Type::Double => "DOUBLE",
            Type::String => "STRING",
            Type::Text => "TEXT",
            Type::DateTime => "DATETIME",
            Type::Uuid => "UUID",
            Type::BooleanVector(_) => "BOOLEAN_VECTOR",
            Type::IntVector(_) => "INT_VECTOR",
            Type::LongVector(_) => "LONG_VECTOR",
            Type::FloatVector(_) => "FLOAT_VECTOR",
            Type::DoubleVector(_) => "DOUBLE_VECTOR",
        }
    }

    /// Resolves a type from its name and, for vector kinds, the element count.
    pub fn from_name(name: &str, dimensions: Option<usize>) -> Option<Type> {
        let scalar = match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" => Some(Type::Boolean),
            "BYTE" => Some(Type::Byte),
            "SHORT" => Some(Type::Short),
            "INT" => Some(Type::Int),
            "LONG" => Some(Type::Long),
            "FLOAT" => Some(Type::Float),
            "DOUBLE" => Some(Type::Double),
            "STRING" => Some(Type::String),
            "TEXT" => Some(Type::Text),
            "DATETIME" => Some(Type::DateTime),
            "UUID" => Some(Type::Uuid),
            _ => None,
        };
        match (scalar, dimensions) {
            (Some(t), None) => Some(t),
            (Some(_), Some(_)) => None,
            (None, Some(n)) => match name.to_ascii_uppercase().as_str() {
                "BOOLEAN_VECTOR" => Some(Type::BooleanVector(n)),
                "INT_VECTOR" => Some(Type::IntVector(n)),
                "LONG_VECTOR" => Some(Type::LongVector(n)),
                "FLOAT_VECTOR" => Some(Type::FloatVector(n)),
                "DOUBLE_VECTOR" => Some(Type::DoubleVector(n)),
                _ => None,
            },
            (None, None) => None,
        }
    }

    /// Zero value of this type, used to populate prototypes.
    pub fn default_value(&self) -> Value {
        match *self {
            Type::Boolean => Value::Boolean(false),
            Type::Byte => Value::Byte(0),
            Type::Short => Value::Short(0),
            Type::Int => Value::Int(0),
            Type::Long => Value::Long(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            Type::String => Value::String(String::new()),
            Type::Text => Value::Text(String::new()),
            Type::DateTime => Value::DateTime(DateTime::<Utc>::default()),
            Type::Uuid => Value::Uuid(Uuid::nil()),
            Type::BooleanVector(n) => Value::BooleanVector(vec![false; n]),
            Type::IntVector(n) => Value::IntVector(vec![0; n]),
            Type::LongVector(n) => Value::LongVector(vec![0; n]),
            Type::FloatVector(n) => Value::FloatVector(vec![0.0; n]),
            Type::DoubleVector(n) => Value::DoubleVector(vec![0.0; n]),
        }
    }

    /// Checks that `value` is a legal instance of this type that every backend
    /// stores losslessly: finite floats and date-times at microsecond precision.
    pub fn check(&self, attribute: &str, value: &Value) -> Result<()> {
        let found = value.value_type();
        let kind_matches = std::mem::discriminant(self) == std::mem::discriminant(&found);
        if !kind_matches || self.dimensions() != found.dimensions() {
            return Err(Error::TypeMismatch {
                attribute: attribute.to_string(),
                expected: self.to_string(),
                found: found.to_string(),
            });
        }
        let unrepresentable = |expected: String, found: String| Error::TypeMismatch {
            attribute: attribute.to_string(),
            expected,
            found,
        };
        match value {
            Value::String(s) => {
                let chars = s.chars().count();
                if chars > STRING_MAX_LENGTH {
                    return Err(unrepresentable(
                        format!("STRING of at most {STRING_MAX_LENGTH} characters"),
                        format!("STRING of {chars} characters"),
                    ));
                }
            }
            Value::DateTime(at) if at.timestamp_subsec_nanos() % 1_000 != 0 => {
                return Err(unrepresentable(
                    "DATETIME at microsecond precision".into(),
                    format!("DATETIME {}", at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
                ));
            }
            _ => {}
        }
        if let Some(position) = first_non_finite(value) {
            return Err(unrepresentable(
                format!("finite {self}"),
                format!("non-finite element at position {position}"),
            ));
        }
        Ok(())
    }
}

/// Position of the first NaN or infinite component; scalars report position 0.
fn first_non_finite(value: &Value) -> Option<usize> {
    match value {
        Value::Float(v) => (!v.is_finite()).then_some(0),
        Value::Double(v) => (!v.is_finite()).then_some(0),
        Value::FloatVector(v) => v.iter().position(|x| !x.is_finite()),
        Value::DoubleVector(v) => v.iter().position(|x| !x.is_finite()),
        _ => None,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dimensions() {
            Some(n) => write!(f, "{}({})", self.name(), n),
            None => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Text(String),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    BooleanVector(Vec<bool>),
    IntVector(Vec<i32>),
    LongVector(Vec<i64>),
    FloatVector(Vec<f32>),
    DoubleVector(Vec<f64>),
}

impl Value {
    /// Date-time values are kept at microsecond precision, the finest every backend stores.
    pub fn date_time(at: DateTime<Utc>) -> Value {
        let truncated = at.duration_trunc(Duration::microseconds(1)).unwrap_or(at);
        Value::DateTime(truncated)
    }

    pub fn value_type(&self) -> Type {
        match self {
            Value::Boolean(_) => Type::Boolean,
            Value::Byte(_) => Type::Byte,
            Value::Short(_) => Type::Short,
            Value::Int(_) => Type::Int,
            Value::Long(_) => Type::Long,
            Value::Float(_) => Type::Float,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::Text(_) => Type::Text,
            Value::DateTime(_) => Type::DateTime,
            Value::Uuid(_) => Type::Uuid,
            Value::BooleanVector(v) => Type::BooleanVector(v.len()),
            Value::IntVector(v) => Type::IntVector(v.len()),
            Value::LongVector(v) => Type::LongVector(v.len()),
            Value::FloatVector(v) => Type::FloatVector(v.len()),
            Value::DoubleVector(v) => Type::DoubleVector(v.len()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric vectors widened to `f64`; `None` for scalars and boolean vectors.
    pub fn numeric_vector(&self) -> Option<Vec<f64>> {
        match self {
            Value::IntVector(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Value::LongVector(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Value::FloatVector(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Value::DoubleVector(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Orders two values of the same scalar kind. Values of different kinds,
    /// vectors and NaN comparisons are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Byte(a), Value::Byte(b)) => a.partial_cmp(b),
            (Value::Short(a), Value::Short(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Long(a), Value::Long(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) | (Value::Text(a), Value::Text(b)) => {
                a.partial_cmp(b)
            }
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::FloatVector(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BooleanVector(v)
    }
}

/// Matches `text` against a SQL `LIKE` pattern (`%` any run, `_` any single character).
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_vector_type_carries_dimensions() {
        let v = Value::FloatVector(vec![1.0, 0.0, 0.0]);
        assert_eq!(v.value_type(), Type::FloatVector(3));
        assert_eq!(v.value_type().to_string(), "FLOAT_VECTOR(3)");
        assert!(Type::FloatVector(3).check("vector", &v).is_ok());
        assert!(Type::FloatVector(4).check("vector", &v).is_err());
        assert!(Type::DoubleVector(3).check("vector", &v).is_err());
    }

    #[test]
    fn test_string_bound_is_enforced() {
        let short = Value::String("a".repeat(STRING_MAX_LENGTH));
        let long = Value::String("a".repeat(STRING_MAX_LENGTH + 1));
        assert!(Type::String.check("label", &short).is_ok());
        assert!(Type::String.check("label", &long).is_err());
        assert!(Type::Text.check("label", &Value::Text("a".repeat(10_000))).is_ok());
    }

    #[test]
    fn test_unstorable_values_are_rejected() {
        let nanos = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let micros = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert!(Type::DateTime.check("at", &Value::DateTime(nanos)).is_err());
        assert!(Type::DateTime.check("at", &Value::DateTime(micros)).is_ok());
        assert!(Type::DateTime.check("at", &Value::date_time(nanos)).is_ok());

        assert!(Type::Float.check("score", &Value::Float(f32::NAN)).is_err());
        assert!(Type::Double.check("score", &Value::Double(f64::NEG_INFINITY)).is_err());
        assert!(Type::Double.check("score", &Value::Double(f64::MAX)).is_ok());
        let vector = Value::FloatVector(vec![0.0, f32::INFINITY]);
        match Type::FloatVector(2).check("vector", &vector) {
            Err(Error::TypeMismatch { found, .. }) => assert!(found.contains("position 1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Type::from_name("float_vector", Some(4)), Some(Type::FloatVector(4)));
        assert_eq!(Type::from_name("STRING", None), Some(Type::String));
        assert_eq!(Type::from_name("STRING", Some(2)), None);
        assert_eq!(Type::from_name("FLOAT_VECTOR", None), None);
        assert_eq!(Type::from_name("BLOB", None), None);
    }

    #[test]
    fn test_date_time_truncates_to_micros() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        match Value::date_time(at) {
            Value::DateTime(t) => assert_eq!(t.timestamp_subsec_nanos(), 123_456_000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compare_rejects_mixed_kinds() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare(&Value::Long(2)), None);
        assert_eq!(Value::String("a".into()).compare(&Value::Text("a".into())), None);
    }

    #[test]
    fn test_like() {
        assert!(like("sunset.jpg", "%.jpg"));
        assert!(like("sunset.jpg", "sun%"));
        assert!(like("cat", "c_t"));
        assert!(!like("cart", "c_t"));
        assert!(like("", "%"));
        assert!(!like("abc", "%d%"));
    }

    #[test]
    fn test_serde_form_is_tagged() {
        let json = serde_json::to_string(&Value::FloatVector(vec![1.0, 2.5])).unwrap();
        assert_eq!(json, r#"{"FLOAT_VECTOR":[1.0,2.5]}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::FloatVector(vec![1.0, 2.5]));
    }
}
