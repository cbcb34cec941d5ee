//! Driver-neutral value model.
//!
//! Every parameter bound to a command and every cell read from a cursor is a
//! [`Value`]. Destination members receive values through [`FromValue`], which
//! performs *direct* assignment only; anything requiring conversion goes
//! through [`crate::populate::Converters`].

use crate::error::DataResult;
use crate::models::Record;
use crate::populate::Converters;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single database value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL
    #[default]
    Null,
    Bool(bool),
    /// Integers of any width (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Json(JsonValue),
    /// Nested record (navigation member or dictionary sub-result)
    Record(Record),
    /// Collection of values (one-to-many sub-results)
    Array(Vec<Value>),
}

/// Discriminant of [`Value`], used as converter lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Date,
    Time,
    DateTime,
    Timestamp,
    Uuid,
    Json,
    Record,
    Array,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Record => "record",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Check if this value is NULL.
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Date(_) => ValueKind::Date,
            Self::Time(_) => ValueKind::Time,
            Self::DateTime(_) => ValueKind::DateTime,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Uuid(_) => ValueKind::Uuid,
            Self::Json(_) => ValueKind::Json,
            Self::Record(_) => ValueKind::Record,
            Self::Array(_) => ValueKind::Array,
        }
    }

    /// Try to read as bool. Numbers are truthy when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            Self::Float(n) => Some(*n != 0.0),
            Self::Text(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to read as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to read as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow as string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as nested record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Render a scalar value as text (used for correlation keys and text coercion).
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(n) => Some(n.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Date(d) => Some(d.to_string()),
            Self::Time(t) => Some(t.to_string()),
            Self::DateTime(dt) => Some(dt.to_string()),
            Self::Timestamp(ts) => Some(ts.to_rfc3339()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Json(j) => Some(j.to_string()),
            Self::Bytes(_) | Self::Record(_) | Self::Array(_) => None,
        }
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Int(n) => JsonValue::Number(n.into()),
            Value::Float(n) => serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(n.to_string())),
            Value::Text(s) => JsonValue::String(s),
            Value::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
            Value::Json(j) => j,
            Value::Record(r) => JsonValue::Object(
                r.into_iter()
                    .map(|(name, value)| (name, JsonValue::from(value)))
                    .collect(),
            ),
            Value::Array(items) => JsonValue::Array(items.into_iter().map(Into::into).collect()),
            other => other
                .to_text()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_for_value! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => Timestamp,
    Uuid => Uuid,
    JsonValue => Json,
    Record => Record,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

/// Direct (non-converting) assignment from a [`Value`].
///
/// Returns the value back when it is not assignable as-is so the caller can
/// try a converter.
pub trait FromValue: Sized + 'static {
    /// Kind this type is assigned from, if fixed.
    fn kind() -> Option<ValueKind>;

    fn from_value(value: Value) -> Result<Self, Value>;

    /// Fallback when [`FromValue::from_value`] rejects the value.
    fn convert(value: Value, converters: &Converters) -> DataResult<Self> {
        converters.convert(value)
    }
}

macro_rules! impl_from_value_exact {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl FromValue for $ty {
                fn kind() -> Option<ValueKind> {
                    Some(ValueKind::$variant)
                }

                fn from_value(value: Value) -> Result<Self, Value> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

impl_from_value_exact! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => Timestamp,
    Uuid => Uuid,
    JsonValue => Json,
    Record => Record,
}

macro_rules! impl_from_value_narrow_int {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromValue for $ty {
                fn kind() -> Option<ValueKind> {
                    Some(ValueKind::Int)
                }

                fn from_value(value: Value) -> Result<Self, Value> {
                    match value {
                        Value::Int(n) => <$ty>::try_from(n).map_err(|_| Value::Int(n)),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

impl_from_value_narrow_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for f32 {
    fn kind() -> Option<ValueKind> {
        Some(ValueKind::Float)
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Float(n) => Ok(n as f32),
            other => Err(other),
        }
    }
}

impl FromValue for Value {
    fn kind() -> Option<ValueKind> {
        None
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn kind() -> Option<ValueKind> {
        T::kind()
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn convert(value: Value, converters: &Converters) -> DataResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::convert(other, converters).map(Some),
        }
    }
}
