//! Attribute type to PostgreSQL column mapping.

use serde::{Deserialize, Serialize};

use super::attribute::{quote_literal, Attribute, AttributeProperty, AttributeType};
use crate::query::helpers::{quote_identifier, validate_identifier};
use crate::{AdapterError, Result};

/// How unknown attribute types are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeMappingMode {
    /// Unknown tags are a schema error
    #[default]
    Strict,
    /// Unknown tags map to TEXT and produce a diagnostic
    BestEffort,
}

/// PostgreSQL column data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// SMALLINT
    SmallInt,
    /// INTEGER
    Integer,
    /// BIGINT
    BigInt,
    /// SERIAL
    Serial,
    /// BIGSERIAL
    BigSerial,
    /// REAL
    Real,
    /// DOUBLE PRECISION
    DoublePrecision,
    /// NUMERIC(precision, scale)
    Numeric(u32, u32),
    /// VARCHAR(length)
    Varchar(u32),
    /// TEXT
    Text,
    /// BOOLEAN
    Boolean,
    /// BYTEA
    Bytea,
    /// UUID
    Uuid,
    /// DATE
    Date,
    /// TIME
    Time,
    /// TIMESTAMP
    Timestamp,
    /// TIMESTAMPTZ
    TimestampTz,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// ARRAY of type
    Array(Box<ColumnType>),
    /// Raw type text
    Custom(String),
}

impl ColumnType {
    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Serial => "SERIAL".to_string(),
            ColumnType::BigSerial => "BIGSERIAL".to_string(),
            ColumnType::Real => "REAL".to_string(),
            ColumnType::DoublePrecision => "DOUBLE PRECISION".to_string(),
            ColumnType::Numeric(p, s) => format!("NUMERIC({}, {})", p, s),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Bytea => "BYTEA".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Jsonb => "JSONB".to_string(),
            ColumnType::Array(inner) => format!("{}[]", inner.to_sql()),
            ColumnType::Custom(raw) => raw.clone(),
        }
    }
}

/// Non-fatal schema problem reported alongside a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDiagnostic {
    pub attribute: String,
    pub message: String,
}

/// Column definition produced by the mapper and refined by constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub unique: bool,
    /// Rendered DEFAULT expression
    pub default: Option<String>,
    /// Rendered CHECK expression
    pub check: Option<String>,
    /// Request a secondary index
    pub index: bool,
    pub diagnostic: Option<SchemaDiagnostic>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
            unique: false,
            default: None,
            check: None,
            index: false,
            diagnostic: None,
        }
    }

    /// Column definition as used inside CREATE TABLE / ADD COLUMN.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_identifier(&self.name), self.column_type.to_sql());
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({})", check));
        }
        sql
    }
}

/// Maps attributes to column types.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeMapper {
    mode: TypeMappingMode,
}

impl TypeMapper {
    pub fn new(mode: TypeMappingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TypeMappingMode {
        self.mode
    }

    /// Maps an attribute to its column specification, without constraints.
    pub fn map_type(&self, attr: &Attribute) -> Result<ColumnSpec> {
        validate_identifier(&attr.name)?;

        if attr.auto_increment {
            let serial = match attr.attr_type {
                AttributeType::BigInteger => ColumnType::BigSerial,
                _ => ColumnType::Serial,
            };
            return Ok(ColumnSpec::new(&attr.name, serial));
        }

        let mut spec = ColumnSpec::new(&attr.name, ColumnType::Text);
        spec.column_type = match &attr.attr_type {
            AttributeType::Enum(values) => {
                let allowed: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
                spec.check = Some(format!(
                    "{} IN ({})",
                    quote_identifier(&attr.name),
                    allowed.join(", ")
                ));
                ColumnType::Text
            }
            AttributeType::Uuid => {
                spec.default = Some("gen_random_uuid()".to_string());
                ColumnType::Uuid
            }
            AttributeType::Unknown(tag) => match self.mode {
                TypeMappingMode::Strict => {
                    return Err(AdapterError::Schema(format!(
                        "Unknown type '{}' for attribute '{}'",
                        tag, attr.name
                    )))
                }
                TypeMappingMode::BestEffort => {
                    tracing::warn!(
                        attribute = %attr.name,
                        tag = %tag,
                        "Unknown attribute type, mapping to TEXT"
                    );
                    spec.diagnostic = Some(SchemaDiagnostic {
                        attribute: attr.name.clone(),
                        message: format!("unknown type '{}' mapped to TEXT", tag),
                    });
                    ColumnType::Text
                }
            },
            other => self.scalar_type(other, attr)?,
        };
        Ok(spec)
    }

    fn scalar_type(&self, attr_type: &AttributeType, attr: &Attribute) -> Result<ColumnType> {
        let column_type = match attr_type {
            AttributeType::String => ColumnType::Varchar(attr.length.unwrap_or(255)),
            AttributeType::Text => ColumnType::Text,
            AttributeType::Integer => ColumnType::Integer,
            AttributeType::BigInteger => ColumnType::BigInt,
            AttributeType::SmallInteger => ColumnType::SmallInt,
            AttributeType::Float => ColumnType::Real,
            AttributeType::Double => ColumnType::DoublePrecision,
            AttributeType::Decimal => {
                ColumnType::Numeric(attr.precision.unwrap_or(8), attr.scale.unwrap_or(2))
            }
            AttributeType::Boolean => ColumnType::Boolean,
            AttributeType::Date => ColumnType::Date,
            AttributeType::Time => ColumnType::Time,
            AttributeType::DateTime => ColumnType::TimestampTz,
            AttributeType::Timestamp => ColumnType::Timestamp,
            AttributeType::Binary => ColumnType::Bytea,
            AttributeType::Json => ColumnType::Json,
            AttributeType::Jsonb => ColumnType::Jsonb,
            AttributeType::Uuid => ColumnType::Uuid,
            AttributeType::Array(None) => ColumnType::Text,
            AttributeType::Array(Some(element)) => {
                ColumnType::Array(Box::new(self.scalar_type(element, attr)?))
            }
            AttributeType::SqlType(raw) => {
                let allowed = |c: char| c.is_ascii_alphanumeric() || " _(),[]".contains(c);
                if raw.is_empty() || !raw.chars().all(allowed) {
                    return Err(AdapterError::Schema(format!(
                        "Invalid raw column type '{}' for attribute '{}'",
                        raw, attr.name
                    )));
                }
                ColumnType::Custom(raw.clone())
            }
            AttributeType::Enum(_) => ColumnType::Text,
            AttributeType::Unknown(tag) => {
                return Err(AdapterError::Schema(format!(
                    "Unknown array element type '{}' for attribute '{}'",
                    tag, attr.name
                )))
            }
        };
        Ok(column_type)
    }
}

/// Applies column-level constraints of `attr` to `spec`.
///
/// Primary keys are collected table-wide by the schema compiler.
pub fn apply_constraints(spec: &mut ColumnSpec, attr: &Attribute) {
    for property in attr.properties() {
        match property {
            AttributeProperty::Index => spec.index = true,
            AttributeProperty::Unique => spec.unique = true,
            AttributeProperty::NotNull => spec.not_null = true,
            AttributeProperty::Default(value) => {
                // Serial columns carry their own sequence default
                if !attr.auto_increment {
                    spec.default = Some(value.to_sql());
                }
            }
            AttributeProperty::Type(_)
            | AttributeProperty::Length(_)
            | AttributeProperty::Precision(_)
            | AttributeProperty::Scale(_)
            | AttributeProperty::PrimaryKey
            | AttributeProperty::AutoIncrement
            | AttributeProperty::ForeignKey(_)
            | AttributeProperty::Association(_)
            | AttributeProperty::Description(_) => {}
        }
    }
}
