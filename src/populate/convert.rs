//! Value converters used when a column value is not directly assignable.
//!
//! Converters are keyed by `(source kind, destination type)`. A registry
//! starts with the built-in conversions; callers may add or replace entries
//! before handing it to the engine.

use crate::error::{DataError, DataResult};
use crate::models::{FromValue, Value, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

type ConvertFn = Arc<dyn Fn(Value) -> DataResult<Box<dyn Any + Send>> + Send + Sync>;

/// Registry of `(ValueKind, destination type)` conversions.
#[derive(Clone)]
pub struct Converters {
    entries: HashMap<(ValueKind, TypeId), ConvertFn>,
}

impl std::fmt::Debug for Converters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converters")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Default for Converters {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Converters {
    /// A registry with no conversions at all.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A registry with the built-in conversions.
    pub fn builtin() -> Self {
        let mut converters = Self::empty();
        register_numeric(&mut converters);
        register_text(&mut converters);
        register_temporal(&mut converters);
        converters
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register (or replace) the conversion from `from` to `T`.
    pub fn register<T, F>(&mut self, from: ValueKind, convert: F) -> &mut Self
    where
        T: Send + 'static,
        F: Fn(Value) -> DataResult<T> + Send + Sync + 'static,
    {
        let convert: ConvertFn =
            Arc::new(move |value| convert(value).map(|v| Box::new(v) as Box<dyn Any + Send>));
        self.entries.insert((from, TypeId::of::<T>()), convert);
        self
    }

    pub fn contains<T: 'static>(&self, from: ValueKind) -> bool {
        self.entries.contains_key(&(from, TypeId::of::<T>()))
    }

    /// Convert `value` to `T` using the registered conversion for its kind.
    pub fn convert<T: 'static>(&self, value: Value) -> DataResult<T> {
        let kind = value.kind();
        let convert = self
            .entries
            .get(&(kind, TypeId::of::<T>()))
            .ok_or_else(|| DataError::conversion(kind.to_string(), type_name::<T>()))?;
        convert(value)?
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| DataError::internal(format!("Converter for {} returned the wrong type", type_name::<T>())))
    }
}

/// Assign a column value to a member of type `V`.
///
/// Null yields the member's default; otherwise direct assignment is tried
/// before the converter registry.
pub fn assign<V>(value: Value, converters: &Converters) -> DataResult<V>
where
    V: FromValue + Default,
{
    if value.is_null() {
        return Ok(V::default());
    }
    match V::from_value(value) {
        Ok(v) => Ok(v),
        Err(value) => V::convert(value, converters),
    }
}

fn mismatch<T>(value: &Value) -> DataError {
    DataError::conversion(format!("{} value", value.kind()), type_name::<T>())
}

fn to_i64(value: Value) -> DataResult<i64> {
    value.as_i64().ok_or_else(|| mismatch::<i64>(&value))
}

fn to_f64(value: Value) -> DataResult<f64> {
    value.as_f64().ok_or_else(|| mismatch::<f64>(&value))
}

macro_rules! register_integers {
    ($converters:expr, [$($ty:ty),+ $(,)?]) => {
        $(
            for kind in [ValueKind::Bool, ValueKind::Float, ValueKind::Text] {
                $converters.register::<$ty, _>(kind, |value| {
                    let n = to_i64(value)?;
                    <$ty>::try_from(n).map_err(|_| DataError::conversion(n.to_string(), stringify!($ty)))
                });
            }
            // Out-of-range ints are rejected by direct assignment and land here
            $converters.register::<$ty, _>(ValueKind::Int, |value| {
                let n = to_i64(value)?;
                <$ty>::try_from(n).map_err(|_| DataError::conversion(n.to_string(), stringify!($ty)))
            });
        )+
    };
}

fn register_numeric(converters: &mut Converters) {
    register_integers!(converters, [i8, i16, i32, u8, u16, u32, u64, usize]);
    for kind in [ValueKind::Bool, ValueKind::Float, ValueKind::Text] {
        converters.register::<i64, _>(kind, to_i64);
    }
    for kind in [ValueKind::Int, ValueKind::Text] {
        converters.register::<f64, _>(kind, to_f64);
        converters.register::<f32, _>(kind, |value| to_f64(value).map(|n| n as f32));
    }
    for kind in [ValueKind::Int, ValueKind::Float, ValueKind::Text] {
        converters.register::<bool, _>(kind, |value| {
            value.as_bool().ok_or_else(|| mismatch::<bool>(&value))
        });
    }
}

fn register_text(converters: &mut Converters) {
    for kind in [
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Date,
        ValueKind::Time,
        ValueKind::DateTime,
        ValueKind::Timestamp,
        ValueKind::Uuid,
        ValueKind::Json,
    ] {
        converters.register::<String, _>(kind, |value| {
            value.to_text().ok_or_else(|| mismatch::<String>(&value))
        });
    }
    converters.register::<String, _>(ValueKind::Bytes, |value| match value {
        Value::Bytes(bytes) => {
            String::from_utf8(bytes).map_err(|_| DataError::conversion("non-UTF-8 bytes", "String"))
        }
        other => Err(mismatch::<String>(&other)),
    });
    converters.register::<Uuid, _>(ValueKind::Text, |value| match &value {
        Value::Text(s) => Uuid::parse_str(s.trim()).map_err(|_| mismatch::<Uuid>(&value)),
        _ => Err(mismatch::<Uuid>(&value)),
    });
    converters.register::<Uuid, _>(ValueKind::Bytes, |value| match &value {
        Value::Bytes(bytes) => Uuid::from_slice(bytes).map_err(|_| mismatch::<Uuid>(&value)),
        _ => Err(mismatch::<Uuid>(&value)),
    });
    converters.register::<serde_json::Value, _>(ValueKind::Text, |value| match &value {
        Value::Text(s) => serde_json::from_str(s).map_err(|_| mismatch::<serde_json::Value>(&value)),
        _ => Err(mismatch::<serde_json::Value>(&value)),
    });
}

fn parse_text<T: std::str::FromStr>(value: &Value) -> DataResult<T> {
    value
        .as_str()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| mismatch::<T>(value))
}

fn register_temporal(converters: &mut Converters) {
    converters.register::<NaiveDate, _>(ValueKind::Text, |value| parse_text(&value));
    converters.register::<NaiveTime, _>(ValueKind::Text, |value| parse_text(&value));
    converters.register::<NaiveDateTime, _>(ValueKind::Text, |value| {
        let text = value.as_str().map(str::trim).unwrap_or_default();
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| text.parse::<NaiveDateTime>())
            .map_err(|_| mismatch::<NaiveDateTime>(&value))
    });
    converters.register::<DateTime<Utc>, _>(ValueKind::Text, |value| {
        let text = value.as_str().map(str::trim).unwrap_or_default();
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| mismatch::<DateTime<Utc>>(&value))
    });
    converters.register::<DateTime<Utc>, _>(ValueKind::DateTime, |value| match value {
        Value::DateTime(dt) => Ok(dt.and_utc()),
        other => Err(mismatch::<DateTime<Utc>>(&other)),
    });
    converters.register::<NaiveDateTime, _>(ValueKind::Timestamp, |value| match value {
        Value::Timestamp(ts) => Ok(ts.naive_utc()),
        other => Err(mismatch::<NaiveDateTime>(&other)),
    });
    converters.register::<NaiveDate, _>(ValueKind::DateTime, |value| match value {
        Value::DateTime(dt) => Ok(dt.date()),
        other => Err(mismatch::<NaiveDate>(&other)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_assigns_default() {
        let converters = Converters::builtin();
        assert_eq!(assign::<i32>(Value::Null, &converters).unwrap(), 0);
        assert_eq!(assign::<String>(Value::Null, &converters).unwrap(), "");
        assert_eq!(assign::<Option<i64>>(Value::Null, &converters).unwrap(), None);
    }

    #[test]
    fn test_direct_assignment_skips_converters() {
        let converters = Converters::empty();
        assert_eq!(assign::<i64>(Value::Int(7), &converters).unwrap(), 7);
        assert_eq!(assign::<i32>(Value::Int(7), &converters).unwrap(), 7);
    }

    #[test]
    fn test_builtin_conversions() {
        let converters = Converters::builtin();
        assert_eq!(assign::<i32>(Value::from("42"), &converters).unwrap(), 42);
        assert_eq!(assign::<f64>(Value::Int(3), &converters).unwrap(), 3.0);
        assert!(assign::<bool>(Value::Int(1), &converters).unwrap());
        assert_eq!(assign::<String>(Value::Int(5), &converters).unwrap(), "5");
        assert_eq!(
            assign::<Option<i64>>(Value::from("12"), &converters).unwrap(),
            Some(12)
        );
        assert_eq!(
            assign::<NaiveDate>(Value::from("2024-03-01"), &converters).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_missing_converter_is_conversion_error() {
        let converters = Converters::empty();
        let err = assign::<i64>(Value::from("1"), &converters).unwrap_err();
        assert!(matches!(err, DataError::Conversion { .. }));

        let err = assign::<i8>(Value::Int(1000), &Converters::builtin()).unwrap_err();
        assert!(matches!(err, DataError::Conversion { .. }));
    }

    #[test]
    fn test_register_replaces_entry() {
        let mut converters = Converters::builtin();
        let before = converters.len();
        converters.register::<i64, _>(ValueKind::Text, |_| Ok(-1));
        assert_eq!(converters.len(), before);
        assert_eq!(assign::<i64>(Value::from("9"), &converters).unwrap(), -1);
    }
}
