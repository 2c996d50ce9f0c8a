//! Raw rows back to schema-typed records.
//!
//! The driver reports what PostgreSQL sent: bracketed text for untyped
//! arrays, JSON for aggregated associations, numbers and timestamps as
//! strings inside JSON. The caster restores the types the schema declares
//! and collapses the duplicates that lateral fan-out produces.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::query::helpers::truncate_identifier;
use crate::query::JoinSpec;
use crate::schema::{AttributeType, Schema, TableSchema, DEFAULT_PRIMARY_KEY};
use crate::types::RawRow;
use crate::{AdapterError, Result, SqlValue};

/// A typed result row with its associations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: HashMap<String, SqlValue>,
    /// Association alias to its de-duplicated records
    pub associations: HashMap<String, Vec<Record>>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&SqlValue> {
        self.fields.get(field)
    }

    /// Records of an association; empty when the alias was not fetched.
    pub fn association(&self, alias: &str) -> &[Record] {
        self.associations.get(alias).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Flattens the record (associations included) into a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let mut obj = serde_json::Map::new();
        for (key, value) in &self.fields {
            obj.insert(key.clone(), value.to_json());
        }
        for (alias, records) in &self.associations {
            obj.insert(
                alias.clone(),
                JsonValue::Array(records.iter().map(Record::to_json).collect()),
            );
        }
        JsonValue::Object(obj)
    }
}

/// Casts raw rows against a schema.
#[derive(Debug, Clone, Copy)]
pub struct ResultCaster<'a> {
    schema: &'a Schema,
}

impl<'a> ResultCaster<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Casts `rows` of `table`, folding the association columns of the
    /// selected `joins` into records and keeping the first row seen per
    /// primary key.
    pub fn cast_rows(&self, table: &str, rows: Vec<RawRow>, joins: &[JoinSpec]) -> Result<Vec<Record>> {
        let table_schema = self.schema.get(&truncate_identifier(table));
        let primary_key = primary_key_of(table_schema);
        let selected: Vec<&JoinSpec> = joins.iter().filter(|j| j.select).collect();

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());

        for mut row in rows {
            let mut associations = HashMap::with_capacity(selected.len());
            for join in &selected {
                // Column names arrive as PostgreSQL truncated them
                let raw = row
                    .remove(&truncate_identifier(&join.alias))
                    .unwrap_or(SqlValue::Null);
                let child_schema = self.schema.get(&truncate_identifier(&join.child));
                associations.insert(join.alias.clone(), self.cast_association(child_schema, raw)?);
            }

            let record = Record {
                fields: cast_fields(table_schema, row),
                associations,
            };
            if let Some(key) = record.get(primary_key).and_then(SqlValue::identity_key) {
                if !seen.insert(key) {
                    continue;
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    fn cast_association(&self, child: Option<&TableSchema>, raw: SqlValue) -> Result<Vec<Record>> {
        let items = match raw {
            SqlValue::Null => return Ok(Vec::new()),
            SqlValue::Json(JsonValue::Array(items)) => items,
            SqlValue::Json(JsonValue::Null) => return Ok(Vec::new()),
            SqlValue::String(text) => match serde_json::from_str::<JsonValue>(&text)? {
                JsonValue::Array(items) => items,
                JsonValue::Null => return Ok(Vec::new()),
                other => {
                    return Err(AdapterError::Deserialization(format!(
                        "association column is not an array: {}",
                        other
                    )))
                }
            },
            other => {
                return Err(AdapterError::Deserialization(format!(
                    "association column has unexpected type {}",
                    other.pg_type_name()
                )))
            }
        };

        let primary_key = primary_key_of(child);
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let obj = match item {
                JsonValue::Object(obj) => obj,
                JsonValue::Null => continue,
                other => {
                    return Err(AdapterError::Deserialization(format!(
                        "association element is not an object: {}",
                        other
                    )))
                }
            };
            let row: RawRow = obj
                .iter()
                .map(|(k, v)| (k.clone(), SqlValue::from_json(v)))
                .collect();
            let record = Record {
                fields: cast_fields(child, row),
                associations: HashMap::new(),
            };
            if let Some(key) = record.get(primary_key).and_then(SqlValue::identity_key) {
                if !seen.insert(key) {
                    continue;
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn primary_key_of(table: Option<&TableSchema>) -> &str {
    table.map(TableSchema::primary_key).unwrap_or(DEFAULT_PRIMARY_KEY)
}

fn cast_fields(table: Option<&TableSchema>, row: RawRow) -> HashMap<String, SqlValue> {
    row.into_iter()
        .map(|(name, value)| {
            let cast = match table.and_then(|t| t.attribute(&name)) {
                Some(attr) => cast_value(&attr.attr_type, value),
                None => value,
            };
            (name, cast)
        })
        .collect()
}

/// Casts one raw value to the representation `attr_type` implies.
///
/// Values that do not parse are returned unchanged.
pub fn cast_value(attr_type: &AttributeType, value: SqlValue) -> SqlValue {
    if value.is_null() {
        return value;
    }
    match attr_type {
        AttributeType::Array(element) => cast_array(element.as_deref(), value),
        AttributeType::Boolean => match value {
            SqlValue::SmallInt(n) => SqlValue::Bool(n != 0),
            SqlValue::Int(n) => SqlValue::Bool(n != 0),
            SqlValue::BigInt(n) => SqlValue::Bool(n != 0),
            SqlValue::String(ref s) => match s.to_lowercase().as_str() {
                "t" | "true" | "1" => SqlValue::Bool(true),
                "f" | "false" | "0" => SqlValue::Bool(false),
                _ => value,
            },
            other => other,
        },
        AttributeType::Integer | AttributeType::BigInteger | AttributeType::SmallInteger => {
            match value {
                SqlValue::String(ref s) => s.trim().parse::<i64>().map(SqlValue::BigInt).unwrap_or(value),
                other => other,
            }
        }
        AttributeType::Float | AttributeType::Double => match value {
            SqlValue::String(ref s) => s.trim().parse::<f64>().map(SqlValue::Double).unwrap_or(value),
            other => other,
        },
        AttributeType::Decimal => match value {
            SqlValue::String(ref s) => Decimal::from_str(s.trim()).map(SqlValue::Decimal).unwrap_or(value),
            SqlValue::BigInt(n) => SqlValue::Decimal(Decimal::from(n)),
            SqlValue::Int(n) => SqlValue::Decimal(Decimal::from(n)),
            SqlValue::Double(f) => Decimal::try_from(f).map(SqlValue::Decimal).unwrap_or(value),
            other => other,
        },
        AttributeType::Date => parse_text(value, |s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(SqlValue::Date)
        }),
        AttributeType::Time => parse_text(value, |s| {
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok().map(SqlValue::Time)
        }),
        AttributeType::DateTime => parse_text(value, |s| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| SqlValue::TimestampTz(dt.with_timezone(&Utc)))
        }),
        AttributeType::Timestamp => parse_text(value, |s| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
                .map(SqlValue::Timestamp)
        }),
        AttributeType::Json | AttributeType::Jsonb => match value {
            SqlValue::Json(_) => value,
            SqlValue::String(ref s) => serde_json::from_str(s).map(SqlValue::Json).unwrap_or(value),
            other => SqlValue::Json(other.to_json()),
        },
        AttributeType::Uuid => parse_text(value, |s| uuid::Uuid::parse_str(s).ok().map(SqlValue::Uuid)),
        AttributeType::Binary => parse_text(value, decode_bytea),
        AttributeType::String
        | AttributeType::Text
        | AttributeType::Enum(_)
        | AttributeType::SqlType(_)
        | AttributeType::Unknown(_) => value,
    }
}

fn cast_array(element: Option<&AttributeType>, value: SqlValue) -> SqlValue {
    let items = match value {
        SqlValue::String(ref s) if s.starts_with('[') => match serde_json::from_str::<JsonValue>(s) {
            Ok(json @ JsonValue::Array(_)) => SqlValue::from_json(&json),
            _ => return value,
        },
        SqlValue::Json(ref json @ JsonValue::Array(_)) => SqlValue::from_json(json),
        other => other,
    };
    match (element, items) {
        (Some(element), SqlValue::Array(values)) => SqlValue::Array(
            values.into_iter().map(|v| cast_value(element, v)).collect(),
        ),
        (_, items) => items,
    }
}

fn parse_text(value: SqlValue, parse: impl Fn(&str) -> Option<SqlValue>) -> SqlValue {
    match value {
        SqlValue::String(ref s) => parse(s.trim()).unwrap_or(value),
        other => other,
    }
}

fn decode_bytea(text: &str) -> Option<SqlValue> {
    let hex = text.strip_prefix("\\x")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()
        .map(SqlValue::Bytes)
}
