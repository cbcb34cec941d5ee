//! Row decoding for the sqlx adapter.
//!
//! Each column's declared type name is first mapped to a [`TypeCategory`];
//! the backend decoder then reads the cell as the matching [`Value`]. A cell
//! whose typed read fails falls back to text, then null.

use super::macros::DatabaseType;
use crate::models::{ColumnSet, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    DateTime,
    Timestamp,
    Unknown,
}

impl TypeCategory {
    /// Classify a declared type name. Rules are ordered: several names
    /// contain a shorter one (`interval` and `point` contain `int`,
    /// `tinyblob` contains `tiny`).
    pub fn of(type_name: &str, db: DatabaseType) -> Self {
        let name = type_name.to_ascii_lowercase();
        let name = name.as_str();
        match name {
            "json" | "jsonb" => return Self::Json,
            "uuid" => return Self::Uuid,
            "date" => return Self::Date,
            "time" => return Self::Time,
            "datetime" => return Self::DateTime,
            "timestamptz" => return Self::Timestamp,
            "interval" | "point" => return Self::Unknown,
            "bool" | "boolean" => return Self::Boolean,
            "bytea" => return Self::Binary,
            // SQLite NUMERIC affinity stores floats
            "numeric" if db == DatabaseType::SQLite => return Self::Float,
            _ => {}
        }

        if name.contains("with time zone") {
            Self::Timestamp
        } else if name.starts_with("timestamp") {
            // MySQL TIMESTAMP is stored in UTC
            if db == DatabaseType::MySql {
                Self::Timestamp
            } else {
                Self::DateTime
            }
        } else if name.contains("decimal") || name.contains("numeric") {
            Self::Decimal
        } else if name.contains("blob") || name.contains("binary") {
            Self::Binary
        } else if name.contains("int") || name.contains("serial") {
            Self::Integer
        } else if name.contains("float") || name.contains("double") || name == "real" {
            Self::Float
        } else if name.contains("char") || name.contains("text") || name == "name" || name == "enum" {
            Self::Text
        } else {
            Self::Unknown
        }
    }
}

/// DECIMAL/NUMERIC read as its exact textual form.
#[derive(Debug)]
pub struct DecimalText(pub String);

macro_rules! decimal_text {
    ($db:ty, $info:ty, $value:ident) => {
        impl Type<$db> for DecimalText {
            fn type_info() -> $info {
                <String as Type<$db>>::type_info()
            }

            fn compatible(ty: &$info) -> bool {
                matches!(
                    TypeCategory::of(ty.name(), DatabaseType::Postgres),
                    TypeCategory::Decimal
                )
            }
        }

        impl<'r> Decode<'r, $db> for DecimalText {
            fn decode(value: $value<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                <&str as Decode<$db>>::decode(value).map(|s| DecimalText(s.to_string()))
            }
        }
    };
}

decimal_text!(sqlx::MySql, MySqlTypeInfo, MySqlValueRef);
decimal_text!(sqlx::Postgres, PgTypeInfo, PgValueRef);

// =============================================================================
// Row Decoding
// =============================================================================

/// Typed decode of one cell; `None` when null or not decodable as `T`.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    T: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn is_null<R>(row: &R, idx: usize) -> bool
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

/// Text fallback shared by every backend.
fn text<'r, R>(row: &'r R, idx: usize) -> Value
where
    R: Row,
    String: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    get::<R, String>(row, idx)
        .map(Value::Text)
        .unwrap_or(Value::Null)
}

fn float(v: f64) -> Value {
    Value::Float(v)
}

/// Conversion of driver rows into engine values.
pub trait RowToValues {
    fn column_set(&self) -> ColumnSet;
    fn to_values(&self) -> Vec<Value>;
}

macro_rules! impl_row_to_values {
    ($row:ty, $db:expr, $module:ident) => {
        impl RowToValues for $row {
            fn column_set(&self) -> ColumnSet {
                ColumnSet::new(self.columns().iter().map(|c| c.name().to_string()))
            }

            fn to_values(&self) -> Vec<Value> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        if is_null(self, idx) {
                            return Value::Null;
                        }
                        let category = TypeCategory::of(col.type_info().name(), $db);
                        $module::decode_column(self, idx, category)
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_values!(MySqlRow, DatabaseType::MySql, mysql);
impl_row_to_values!(PgRow, DatabaseType::Postgres, postgres);
impl_row_to_values!(SqliteRow, DatabaseType::SQLite, sqlite);

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        let value = match category {
            TypeCategory::Decimal => get::<_, DecimalText>(row, idx).map(|d| Value::Text(d.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(Value::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(Value::Bytes),
            // MySQL JSON type should be decoded as serde_json::Value directly
            TypeCategory::Json => get::<_, serde_json::Value>(row, idx).map(Value::Json),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(Value::Date),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(Value::Time),
            TypeCategory::DateTime => get::<_, NaiveDateTime>(row, idx).map(Value::DateTime),
            TypeCategory::Timestamp => get::<_, DateTime<Utc>>(row, idx).map(Value::Timestamp),
            _ => None,
        };
        value.unwrap_or_else(|| text(row, idx))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        // Try signed types
        if let Some(v) = get::<_, i64>(row, idx) {
            return Some(Value::Int(v));
        }
        if let Some(v) = get::<_, i32>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        if let Some(v) = get::<_, i16>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        if let Some(v) = get::<_, i8>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        // Try unsigned types
        if let Some(v) = get::<_, u64>(row, idx) {
            return Some(match i64::try_from(v) {
                Ok(n) => Value::Int(n),
                Err(_) => Value::Text(v.to_string()),
            });
        }
        if let Some(v) = get::<_, u32>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        if let Some(v) = get::<_, u16>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        get::<_, u8>(row, idx).map(|v| Value::Int(v.into()))
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        let value = match category {
            TypeCategory::Decimal => get::<_, DecimalText>(row, idx).map(|d| Value::Text(d.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(Value::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(Value::Bytes),
            TypeCategory::Json => get::<_, serde_json::Value>(row, idx).map(Value::Json),
            TypeCategory::Uuid => get::<_, uuid::Uuid>(row, idx).map(Value::Uuid),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(Value::Date),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(Value::Time),
            TypeCategory::DateTime => get::<_, NaiveDateTime>(row, idx).map(Value::DateTime),
            TypeCategory::Timestamp => get::<_, DateTime<Utc>>(row, idx).map(Value::Timestamp),
            _ => None,
        };
        value.unwrap_or_else(|| text(row, idx))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<Value> {
        if let Some(v) = get::<_, i16>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        if let Some(v) = get::<_, i32>(row, idx) {
            return Some(Value::Int(v.into()));
        }
        get::<_, i64>(row, idx).map(Value::Int)
    }
}

mod sqlite {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let value = match category {
            TypeCategory::Integer => get::<_, i64>(row, idx).map(Value::Int),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(Value::Bool),
            TypeCategory::Float | TypeCategory::Decimal => get::<_, f64>(row, idx).map(float),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(Value::Bytes),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(Value::Date),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(Value::Time),
            TypeCategory::DateTime | TypeCategory::Timestamp => {
                get::<_, NaiveDateTime>(row, idx).map(Value::DateTime)
            }
            TypeCategory::Json => get::<_, String>(row, idx).map(|s| {
                serde_json::from_str(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::Text(s))
            }),
            _ => None,
        };
        value.unwrap_or_else(|| decode_dynamic(row, idx))
    }

    /// Expression columns (`COUNT(*)`, `last_insert_rowid()`) carry no declared
    /// type, so decode by the storage class of the value itself.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Value {
        if let Some(v) = get::<_, i64>(row, idx) {
            return Value::Int(v);
        }
        if let Some(v) = get::<_, f64>(row, idx) {
            return float(v);
        }
        if let Some(v) = get::<_, String>(row, idx) {
            return Value::Text(v);
        }
        get::<_, Vec<u8>>(row, idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(names: &[&str], db: DatabaseType) -> Vec<TypeCategory> {
        names.iter().map(|n| TypeCategory::of(n, db)).collect()
    }

    #[test]
    fn test_integer_names() {
        use TypeCategory::Integer;
        assert_eq!(
            all(&["INT", "BIGINT", "TINYINT", "smallint"], DatabaseType::MySql),
            vec![Integer; 4]
        );
        assert_eq!(TypeCategory::of("SERIAL", DatabaseType::Postgres), Integer);
        assert_eq!(TypeCategory::of("INTEGER", DatabaseType::SQLite), Integer);
    }

    #[test]
    fn test_numeric_depends_on_backend() {
        assert_eq!(
            TypeCategory::of("NUMERIC", DatabaseType::Postgres),
            TypeCategory::Decimal
        );
        assert_eq!(
            TypeCategory::of("decimal(10,2)", DatabaseType::MySql),
            TypeCategory::Decimal
        );
        assert_eq!(
            TypeCategory::of("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_temporal_names() {
        use TypeCategory::*;
        assert_eq!(
            all(
                &["TIMESTAMPTZ", "TIMESTAMP", "timestamp with time zone", "DATE", "INTERVAL"],
                DatabaseType::Postgres
            ),
            vec![Timestamp, DateTime, Timestamp, Date, Unknown]
        );
        assert_eq!(TypeCategory::of("TIMESTAMP", DatabaseType::MySql), Timestamp);
        assert_eq!(TypeCategory::of("DATETIME", DatabaseType::SQLite), DateTime);
    }

    #[test]
    fn test_overlapping_names_resolve_in_order() {
        use TypeCategory::*;
        assert_eq!(TypeCategory::of("TINYBLOB", DatabaseType::MySql), Binary);
        assert_eq!(TypeCategory::of("POINT", DatabaseType::Postgres), Unknown);
        assert_eq!(TypeCategory::of("jsonb", DatabaseType::Postgres), Json);
        assert_eq!(TypeCategory::of("BYTEA", DatabaseType::Postgres), Binary);
    }

    #[test]
    fn test_text_and_untyped_columns() {
        use TypeCategory::*;
        assert_eq!(
            all(&["VARCHAR", "TEXT", "NULL", ""], DatabaseType::SQLite),
            vec![Text, Text, Unknown, Unknown]
        );
    }
}
