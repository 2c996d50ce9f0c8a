//! Table and schema collections.

use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use super::attribute::{Association, Attribute};
use super::mapper::TypeMappingMode;
use crate::query::helpers::truncate_identifier;
use crate::{AdapterError, Result};

/// Primary key used when no attribute is flagged.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Ordered attribute list of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    attributes: Vec<Attribute>,
    primary_key: OnceCell<String>,
}

impl TableSchema {
    /// Create a table; the name is truncated to 63 bytes.
    pub fn new(name: impl AsRef<str>, attributes: Vec<Attribute>) -> Self {
        Self {
            name: truncate_identifier(name.as_ref()),
            attributes,
            primary_key: OnceCell::new(),
        }
    }

    /// Reads a table from a JSON object of attribute definitions.
    pub fn from_json(name: &str, definition: &JsonValue, mode: TypeMappingMode) -> Result<Self> {
        let obj = definition.as_object().ok_or_else(|| {
            AdapterError::Schema(format!("Table '{}' definition must be an object", name))
        })?;
        let attributes = obj
            .iter()
            .map(|(attr_name, attr_def)| Attribute::from_json(attr_name, attr_def, mode))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, attributes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Attributes backed by a real column.
    pub fn column_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| !a.is_virtual())
    }

    /// Name of the primary key: the first flagged attribute, or `id`.
    ///
    /// Resolved once and memoized.
    pub fn primary_key(&self) -> &str {
        self.primary_key.get_or_init(|| {
            self.attributes
                .iter()
                .find(|a| a.primary_key)
                .map(|a| a.name.clone())
                .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string())
        })
    }

    /// Every attribute flagged primary key, in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.primary_key)
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Copy of this table with `attr` appended.
    pub fn with_attribute(&self, attr: Attribute) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.push(attr);
        Self::new(&self.name, attributes)
    }

    /// Copy of this table without the named attribute.
    pub fn without_attribute(&self, name: &str) -> Self {
        let attributes = self
            .attributes
            .iter()
            .filter(|a| a.name != name)
            .cloned()
            .collect();
        Self::new(&self.name, attributes)
    }
}

/// All tables known to a datastore.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: HashMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table (builder style).
    pub fn table(mut self, table: TableSchema) -> Self {
        self.insert(table);
        self
    }

    /// Add or replace a table.
    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.name().to_string(), table);
    }

    pub fn remove(&mut self, name: &str) -> Option<TableSchema> {
        self.tables.remove(&truncate_identifier(name))
    }

    /// Looks a table up by name (truncated the same way it was stored).
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&truncate_identifier(name))
    }

    pub fn require(&self, name: &str) -> Result<&TableSchema> {
        self.get(name)
            .ok_or_else(|| AdapterError::Schema(format!("Unknown table '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Checks that every association targets a known table and that no
    /// virtual attribute is flagged primary key.
    pub fn validate(&self) -> Result<()> {
        for table in self.tables.values() {
            for attr in table.attributes() {
                if attr.primary_key && attr.is_virtual() {
                    return Err(AdapterError::Schema(format!(
                        "Primary key '{}' on table '{}' is a collection association",
                        attr.name,
                        table.name()
                    )));
                }
                if let Some(assoc) = &attr.association {
                    if !self.contains(assoc.target()) {
                        return Err(AdapterError::Schema(format!(
                            "Association '{}.{}' targets unknown table '{}'",
                            table.name(),
                            attr.name,
                            assoc.target()
                        )));
                    }
                    if let Association::Collection { via: Some(via), target } = assoc {
                        let target_table = self.require(target)?;
                        if !target_table.has_attribute(via) {
                            return Err(AdapterError::Schema(format!(
                                "Association '{}.{}' goes via unknown attribute '{}.{}'",
                                table.name(),
                                attr.name,
                                target,
                                via
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
