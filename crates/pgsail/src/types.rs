//! Values crossing the driver boundary.
//!
//! `SqlValue` is the single representation used for bind parameters, raw
//! driver rows and cast records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Postgres, Row as SqlxRow, Type, TypeInfo};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{AdapterError, Result};

/// Binds a homogeneous (possibly NULL-containing) array natively.
/// Evaluates to `false` when an element of another variant is present.
macro_rules! bind_array_of {
    ($values:expr, $arguments:expr, $variant:ident, $label:literal) => {{
        let items: Option<Vec<Option<_>>> = $values
            .iter()
            .map(|v| match v {
                SqlValue::$variant(x) => Some(Some(x.clone())),
                SqlValue::Null => Some(None),
                _ => None,
            })
            .collect();
        match items {
            Some(items) => {
                bind($arguments, items, $label)?;
                true
            }
            None => false,
        }
    }};
}

/// A raw result row as returned by an executor: column/alias name to value.
pub type RawRow = HashMap<String, SqlValue>;

/// A value bound to, or read from, PostgreSQL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// INT2
    SmallInt(i16),
    /// INT4
    Int(i32),
    /// INT8, also used for LIMIT/OFFSET parameters
    BigInt(i64),
    /// FLOAT4
    Float(f32),
    /// FLOAT8
    Double(f64),
    /// TEXT and every other character type
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// TIMESTAMP, no zone
    Timestamp(NaiveDateTime),
    /// TIMESTAMPTZ, normalized to UTC
    TimestampTz(DateTime<Utc>),
    /// JSON or JSONB; also carries aggregated association arrays
    Json(JsonValue),
    /// A native PostgreSQL array
    Array(Vec<SqlValue>),
    /// NUMERIC
    Decimal(Decimal),
}

impl SqlValue {
    /// Returns the PostgreSQL type name for this value.
    pub fn pg_type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Bool(_) => "BOOLEAN",
            SqlValue::SmallInt(_) => "SMALLINT",
            SqlValue::Int(_) => "INTEGER",
            SqlValue::BigInt(_) => "BIGINT",
            SqlValue::Float(_) => "REAL",
            SqlValue::Double(_) => "DOUBLE PRECISION",
            SqlValue::String(_) => "TEXT",
            SqlValue::Bytes(_) => "BYTEA",
            SqlValue::Uuid(_) => "UUID",
            SqlValue::Date(_) => "DATE",
            SqlValue::Time(_) => "TIME",
            SqlValue::Timestamp(_) => "TIMESTAMP",
            SqlValue::TimestampTz(_) => "TIMESTAMPTZ",
            SqlValue::Json(_) => "JSONB",
            SqlValue::Array(_) => "ARRAY",
            SqlValue::Decimal(_) => "NUMERIC",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Builds a value from JSON. Integral numbers become `BigInt`, other
    /// numbers `Double`; objects stay JSON.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::BigInt(i),
                None => n.as_f64().map(SqlValue::Double).unwrap_or(SqlValue::Null),
            },
            JsonValue::String(s) => SqlValue::String(s.clone()),
            JsonValue::Array(items) => SqlValue::Array(items.iter().map(SqlValue::from_json).collect()),
            JsonValue::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    /// Converts to JSON. Bytes become a hex string, temporal values ISO text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(v) => JsonValue::Bool(*v),
            SqlValue::SmallInt(v) => JsonValue::Number((*v).into()),
            SqlValue::Int(v) => JsonValue::Number((*v).into()),
            SqlValue::BigInt(v) => JsonValue::Number((*v).into()),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v as f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::String(v) => JsonValue::String(v.clone()),
            SqlValue::Bytes(v) => {
                JsonValue::String(v.iter().map(|b| format!("{:02x}", b)).collect())
            }
            SqlValue::Uuid(v) => JsonValue::String(v.to_string()),
            SqlValue::Date(v) => JsonValue::String(v.to_string()),
            SqlValue::Time(v) => JsonValue::String(v.to_string()),
            SqlValue::Timestamp(v) => JsonValue::String(v.to_string()),
            SqlValue::TimestampTz(v) => JsonValue::String(v.to_rfc3339()),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Array(values) => JsonValue::Array(values.iter().map(SqlValue::to_json).collect()),
            SqlValue::Decimal(v) => JsonValue::String(v.to_string()),
        }
    }

    /// Key used to compare primary-key values across representations
    /// (`Int(1)` and `BigInt(1)` collide). `None` for NULL.
    pub fn identity_key(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            other => Some(other.to_json().to_string()),
        }
    }

    /// Bind this value to a sqlx argument list.
    ///
    /// Homogeneous arrays bind as native PostgreSQL arrays (INT4[], TEXT[], ...);
    /// anything else falls back to a JSON array.
    pub fn bind_to_arguments(&self, arguments: &mut PgArguments) -> Result<()> {
        match self {
            // Bound as a nullable INT4
            SqlValue::Null => bind(arguments, Option::<i32>::None, "NULL"),
            SqlValue::Bool(v) => bind(arguments, *v, "BOOL"),
            SqlValue::SmallInt(v) => bind(arguments, *v, "SMALLINT"),
            SqlValue::Int(v) => bind(arguments, *v, "INT"),
            SqlValue::BigInt(v) => bind(arguments, *v, "BIGINT"),
            SqlValue::Float(v) => bind(arguments, *v, "FLOAT"),
            SqlValue::Double(v) => bind(arguments, *v, "DOUBLE"),
            SqlValue::String(v) => bind(arguments, v.clone(), "STRING"),
            SqlValue::Bytes(v) => bind(arguments, v.clone(), "BYTES"),
            SqlValue::Uuid(v) => bind(arguments, *v, "UUID"),
            SqlValue::Date(v) => bind(arguments, *v, "DATE"),
            SqlValue::Time(v) => bind(arguments, *v, "TIME"),
            SqlValue::Timestamp(v) => bind(arguments, *v, "TIMESTAMP"),
            SqlValue::TimestampTz(v) => bind(arguments, *v, "TIMESTAMPTZ"),
            SqlValue::Json(v) => bind(arguments, v.clone(), "JSON"),
            SqlValue::Decimal(v) => bind(arguments, *v, "DECIMAL"),
            SqlValue::Array(values) => {
                let bound = match values.iter().find(|v| !v.is_null()) {
                    None => {
                        bind(arguments, Option::<Vec<i32>>::None, "empty ARRAY")?;
                        true
                    }
                    Some(SqlValue::Int(_)) => bind_array_of!(values, arguments, Int, "INT4[]"),
                    Some(SqlValue::BigInt(_)) => bind_array_of!(values, arguments, BigInt, "INT8[]"),
                    Some(SqlValue::String(_)) => bind_array_of!(values, arguments, String, "TEXT[]"),
                    Some(SqlValue::Bool(_)) => bind_array_of!(values, arguments, Bool, "BOOL[]"),
                    Some(SqlValue::Double(_)) => bind_array_of!(values, arguments, Double, "FLOAT8[]"),
                    Some(SqlValue::Uuid(_)) => bind_array_of!(values, arguments, Uuid, "UUID[]"),
                    Some(_) => false,
                };
                if !bound {
                    bind(arguments, self.to_json(), "ARRAY as JSON")?;
                }
                Ok(())
            }
        }
    }
}

fn bind<T>(arguments: &mut PgArguments, value: T, label: &str) -> Result<()>
where
    T: for<'q> sqlx::Encode<'q, Postgres> + Type<Postgres> + Send + 'static,
{
    arguments
        .add(value)
        .map_err(|e| AdapterError::Serialization(format!("Failed to bind {}: {}", label, e)))
}

/// Convert a `PgRow` into a [`RawRow`].
///
/// # Errors
///
/// Returns error if a column cannot be decoded as its reported type.
pub fn row_to_values(row: &PgRow) -> Result<RawRow> {
    let mut columns = HashMap::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = match column.type_info().name() {
            "BOOL" => extract(row, idx, name, "BOOL", SqlValue::Bool)?,
            "INT2" => extract(row, idx, name, "SMALLINT", SqlValue::SmallInt)?,
            "INT4" => extract(row, idx, name, "INT", SqlValue::Int)?,
            "INT8" => extract(row, idx, name, "BIGINT", SqlValue::BigInt)?,
            "FLOAT4" => extract(row, idx, name, "REAL", SqlValue::Float)?,
            "FLOAT8" => extract(row, idx, name, "DOUBLE", SqlValue::Double)?,
            "VARCHAR" | "TEXT" | "CHAR" | "BPCHAR" | "NAME" => {
                extract(row, idx, name, "STRING", SqlValue::String)?
            }
            "BYTEA" => extract(row, idx, name, "BYTEA", SqlValue::Bytes)?,
            "UUID" => extract(row, idx, name, "UUID", SqlValue::Uuid)?,
            "DATE" => extract(row, idx, name, "DATE", SqlValue::Date)?,
            "TIME" => extract(row, idx, name, "TIME", SqlValue::Time)?,
            "TIMESTAMP" => extract(row, idx, name, "TIMESTAMP", SqlValue::Timestamp)?,
            "TIMESTAMPTZ" => extract(row, idx, name, "TIMESTAMPTZ", SqlValue::TimestampTz)?,
            "JSON" | "JSONB" => extract(row, idx, name, "JSON", SqlValue::Json)?,
            "NUMERIC" => extract(row, idx, name, "NUMERIC", SqlValue::Decimal)?,
            "_BOOL" => extract_array(row, idx, name, SqlValue::Bool)?,
            "_INT2" => extract_array(row, idx, name, SqlValue::SmallInt)?,
            "_INT4" => extract_array(row, idx, name, SqlValue::Int)?,
            "_INT8" => extract_array(row, idx, name, SqlValue::BigInt)?,
            "_FLOAT4" => extract_array(row, idx, name, SqlValue::Float)?,
            "_FLOAT8" => extract_array(row, idx, name, SqlValue::Double)?,
            "_TEXT" | "_VARCHAR" => extract_array(row, idx, name, SqlValue::String)?,
            "_UUID" => extract_array(row, idx, name, SqlValue::Uuid)?,
            unknown => {
                tracing::warn!(
                    pg_type = unknown,
                    column = name,
                    "Unknown PostgreSQL type, attempting string extraction"
                );
                extract(row, idx, name, unknown, SqlValue::String)?
            }
        };
        columns.insert(name.to_string(), value);
    }

    Ok(columns)
}

fn extract<T>(
    row: &PgRow,
    idx: usize,
    column: &str,
    label: &str,
    convert: impl Fn(T) -> SqlValue,
) -> Result<SqlValue>
where
    T: for<'a> sqlx::Decode<'a, Postgres> + Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Ok(convert(v)),
        Ok(None) => Ok(SqlValue::Null),
        Err(e) => Err(AdapterError::Deserialization(format!(
            "Failed to extract {} from column '{}': {}",
            label, column, e
        ))),
    }
}

fn extract_array<T>(
    row: &PgRow,
    idx: usize,
    column: &str,
    convert: impl Fn(T) -> SqlValue,
) -> Result<SqlValue>
where
    T: for<'a> sqlx::Decode<'a, Postgres> + Type<Postgres> + sqlx::postgres::PgHasArrayType,
{
    match row.try_get::<Option<Vec<T>>, _>(idx) {
        Ok(Some(vec)) => Ok(SqlValue::Array(vec.into_iter().map(convert).collect())),
        Ok(None) => Ok(SqlValue::Null),
        Err(e) => Err(AdapterError::Deserialization(format!(
            "Failed to extract array from column '{}': {}",
            column, e
        ))),
    }
}
