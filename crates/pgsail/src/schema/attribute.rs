//! Attribute definitions.
//!
//! An [`Attribute`] is the database-agnostic description of one field of a
//! table. Attributes are built with a small builder API or read from JSON
//! definitions such as:
//!
//! ```json
//! { "type": "string", "size": 100, "unique": true }
//! ```

use serde_json::Value as JsonValue;

use super::mapper::TypeMappingMode;
use crate::{AdapterError, Result};

/// Abstract attribute type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Text,
    Integer,
    BigInteger,
    SmallInteger,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
    Binary,
    Json,
    Jsonb,
    Uuid,
    /// Closed set of allowed string values
    Enum(Vec<String>),
    /// Sequence; without an element type it is stored as bracketed JSON text
    Array(Option<Box<AttributeType>>),
    /// Raw column type passed through to the DDL
    SqlType(String),
    /// Tag the mapper does not recognize (best-effort mode only)
    Unknown(String),
}

impl AttributeType {
    /// Parses a type tag, case-insensitively.
    ///
    /// Unrecognized tags are a schema error in strict mode and
    /// `AttributeType::Unknown` in best-effort mode.
    pub fn from_tag(tag: &str, mode: TypeMappingMode) -> Result<Self> {
        let normalized = tag.trim().to_lowercase();
        let parsed = match normalized.as_str() {
            "string" | "varchar" => AttributeType::String,
            "text" | "mediumtext" | "longtext" => AttributeType::Text,
            "integer" | "int" => AttributeType::Integer,
            "biginteger" | "bigint" => AttributeType::BigInteger,
            "smallinteger" | "smallint" => AttributeType::SmallInteger,
            "float" | "real" => AttributeType::Float,
            "double" => AttributeType::Double,
            "decimal" | "numeric" => AttributeType::Decimal,
            "boolean" | "bool" => AttributeType::Boolean,
            "date" => AttributeType::Date,
            "time" => AttributeType::Time,
            "datetime" => AttributeType::DateTime,
            "timestamp" => AttributeType::Timestamp,
            "binary" | "bytea" => AttributeType::Binary,
            "json" => AttributeType::Json,
            "jsonb" => AttributeType::Jsonb,
            "uuid" => AttributeType::Uuid,
            "array" => AttributeType::Array(None),
            other => {
                if let Some(inner) = other.strip_suffix("[]") {
                    let element = AttributeType::from_tag(inner, mode)?;
                    return Ok(AttributeType::Array(Some(Box::new(element))));
                }
                match mode {
                    TypeMappingMode::Strict => {
                        return Err(AdapterError::Schema(format!(
                            "Unknown attribute type '{}'",
                            tag
                        )))
                    }
                    TypeMappingMode::BestEffort => AttributeType::Unknown(tag.to_string()),
                }
            }
        };
        Ok(parsed)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, AttributeType::Array(_))
    }
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
    /// Trusted SQL expression such as `now()`, emitted verbatim
    Expression(String),
}

impl DefaultValue {
    /// Renders the default as a SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DefaultValue::Int(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::Json(v) => quote_literal(&v.to_string()),
            DefaultValue::Expression(expr) => expr.clone(),
        }
    }

    fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => DefaultValue::Null,
            JsonValue::Bool(b) => DefaultValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => DefaultValue::Int(i),
                None => DefaultValue::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => DefaultValue::Text(s.clone()),
            other => DefaultValue::Json(other.clone()),
        }
    }
}

/// Single-quotes a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Foreign key reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table
    pub table: String,
    /// Referenced column
    pub column: String,
    /// ON DELETE action
    pub on_delete: String,
}

/// Association wiring of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// To-one: the attribute is a column holding the target's key
    Model { target: String },
    /// To-many: virtual attribute, no column of its own
    Collection { target: String, via: Option<String> },
}

impl Association {
    pub fn target(&self) -> &str {
        match self {
            Association::Model { target } | Association::Collection { target, .. } => target,
        }
    }
}

/// One property carried by an attribute, used for exhaustive constraint dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeProperty<'a> {
    Type(&'a AttributeType),
    Length(u32),
    Precision(u32),
    Scale(u32),
    NotNull,
    Unique,
    Index,
    Default(&'a DefaultValue),
    PrimaryKey,
    AutoIncrement,
    ForeignKey(&'a ForeignKeyRef),
    Association(&'a Association),
    Description(&'a str),
}

/// A table attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttributeType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub unique: bool,
    pub index: bool,
    pub default: Option<DefaultValue>,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    pub association: Option<Association>,
    pub description: Option<String>,
}

impl Attribute {
    /// Create a new nullable attribute.
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            unique: false,
            index: false,
            default: None,
            primary_key: false,
            auto_increment: false,
            foreign_key: None,
            association: None,
            description: None,
        }
    }

    /// Mark as primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Mark as not nullable.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Request a secondary index on this column.
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    /// Set default value.
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Set foreign key reference.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
            on_delete: "NO ACTION".to_string(),
        });
        self
    }

    /// To-one association stored in this column.
    pub fn model(mut self, target: impl Into<String>) -> Self {
        self.association = Some(Association::Model { target: target.into() });
        self
    }

    /// Create a virtual to-many association attribute.
    pub fn collection(
        name: impl Into<String>,
        target: impl Into<String>,
        via: Option<&str>,
    ) -> Self {
        let mut attr = Attribute::new(name, AttributeType::Array(None));
        attr.association = Some(Association::Collection {
            target: target.into(),
            via: via.map(str::to_string),
        });
        attr
    }

    /// Virtual attributes (collections) have no backing column.
    pub fn is_virtual(&self) -> bool {
        matches!(self.association, Some(Association::Collection { .. }))
    }

    /// Every property this attribute carries.
    pub fn properties(&self) -> Vec<AttributeProperty<'_>> {
        let mut props = vec![AttributeProperty::Type(&self.attr_type)];
        if let Some(length) = self.length {
            props.push(AttributeProperty::Length(length));
        }
        if let Some(precision) = self.precision {
            props.push(AttributeProperty::Precision(precision));
        }
        if let Some(scale) = self.scale {
            props.push(AttributeProperty::Scale(scale));
        }
        if !self.nullable {
            props.push(AttributeProperty::NotNull);
        }
        if self.unique {
            props.push(AttributeProperty::Unique);
        }
        if self.index {
            props.push(AttributeProperty::Index);
        }
        if let Some(default) = &self.default {
            props.push(AttributeProperty::Default(default));
        }
        if self.primary_key {
            props.push(AttributeProperty::PrimaryKey);
        }
        if self.auto_increment {
            props.push(AttributeProperty::AutoIncrement);
        }
        if let Some(fk) = &self.foreign_key {
            props.push(AttributeProperty::ForeignKey(fk));
        }
        if let Some(assoc) = &self.association {
            props.push(AttributeProperty::Association(assoc));
        }
        if let Some(text) = &self.description {
            props.push(AttributeProperty::Description(text));
        }
        props
    }

    /// Reads an attribute from a JSON definition.
    ///
    /// Recognized keys: `type`, `size`/`length`, `precision`, `scale`,
    /// `primaryKey`, `autoIncrement`, `required`/`notNull`, `unique`, `index`,
    /// `defaultsTo`, `enum`, `model`, `collection`, `via`, `description`.
    pub fn from_json(name: &str, definition: &JsonValue, mode: TypeMappingMode) -> Result<Self> {
        let obj = match definition {
            JsonValue::String(tag) => {
                return Ok(Attribute::new(name, AttributeType::from_tag(tag, mode)?))
            }
            JsonValue::Object(obj) => obj,
            other => {
                return Err(AdapterError::Schema(format!(
                    "Attribute '{}' definition must be a string or object, got {}",
                    name, other
                )))
            }
        };

        if let Some(target) = obj.get("collection").and_then(JsonValue::as_str) {
            let via = obj.get("via").and_then(JsonValue::as_str);
            let mut attr = Attribute::collection(name, target, via);
            if flag(obj, "primaryKey") {
                attr.primary_key = true;
            }
            return Ok(attr);
        }

        let attr_type = if let Some(values) = obj.get("enum").and_then(JsonValue::as_array) {
            AttributeType::Enum(
                values
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect(),
            )
        } else if let Some(raw) = obj.get("sqlType").and_then(JsonValue::as_str) {
            AttributeType::SqlType(raw.to_string())
        } else {
            match obj.get("type").and_then(JsonValue::as_str) {
                Some(tag) => AttributeType::from_tag(tag, mode)?,
                // Model associations default to an integer key column
                None if obj.contains_key("model") => AttributeType::Integer,
                None => AttributeType::String,
            }
        };

        let mut attr = Attribute::new(name, attr_type);
        attr.length = number(obj, "size").or_else(|| number(obj, "length"));
        attr.precision = number(obj, "precision");
        attr.scale = number(obj, "scale");
        if flag(obj, "required") || flag(obj, "notNull") {
            attr.nullable = false;
        }
        attr.unique = flag(obj, "unique");
        attr.index = flag(obj, "index");
        attr.auto_increment = flag(obj, "autoIncrement");
        if flag(obj, "primaryKey") {
            attr = attr.primary_key();
        }
        attr.default = obj.get("defaultsTo").map(DefaultValue::from_json);
        if let Some(target) = obj.get("model").and_then(JsonValue::as_str) {
            attr = attr.model(target);
        }
        attr.description = obj
            .get("description")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        Ok(attr)
    }
}

fn flag(obj: &serde_json::Map<String, JsonValue>, key: &str) -> bool {
    obj.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
}

fn number(obj: &serde_json::Map<String, JsonValue>, key: &str) -> Option<u32> {
    obj.get(key)
        .and_then(JsonValue::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}
