//! INSERT, UPDATE, DELETE and COUNT compilation for CriteriaCompiler.

use super::compiler::CriteriaCompiler;
use super::criteria::Criteria;
use super::helpers::{quote_identifier, truncate_identifier, validate_identifier};
use super::types::CompiledQuery;
use crate::schema::{AttributeType, TableSchema};
use crate::{AdapterError, Result, SqlValue};

impl<'a> CriteriaCompiler<'a> {
    /// `INSERT INTO t (...) VALUES (...) RETURNING *`.
    ///
    /// An empty record inserts `DEFAULT VALUES`.
    pub fn compile_insert(&self, table: &str, values: &[(String, SqlValue)]) -> Result<CompiledQuery> {
        validate_identifier(table)?;
        let table = truncate_identifier(table);
        let table_schema = self.schema().get(&table);

        if values.is_empty() {
            return CompiledQuery::new(
                format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quote_identifier(&table)),
                Vec::new(),
            );
        }

        let mut columns = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for (col, val) in values {
            params.push(encode_value(table_schema, &table, col, val)?);
            columns.push(quote_identifier(col));
        }
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${}", i)).collect();

        CompiledQuery::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                quote_identifier(&table),
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        )
    }

    /// `UPDATE t SET ... WHERE ... RETURNING *`.
    pub fn compile_update(
        &self,
        table: &str,
        criteria: &Criteria,
        values: &[(String, SqlValue)],
    ) -> Result<CompiledQuery> {
        if values.is_empty() {
            return Err(AdapterError::Compilation("Cannot update with no values".to_string()));
        }
        validate_identifier(table)?;
        let table = truncate_identifier(table);
        let table_schema = self.schema().get(&table);

        let mut params: Vec<SqlValue> = Vec::new();
        let mut set_parts = Vec::with_capacity(values.len());
        for (col, val) in values {
            params.push(encode_value(table_schema, &table, col, val)?);
            set_parts.push(format!("{} = ${}", quote_identifier(col), params.len()));
        }

        let mut sql = format!("UPDATE {} SET {}", quote_identifier(&table), set_parts.join(", "));
        if let Some(where_sql) = self.where_clause(&table, criteria.predicate.as_ref(), &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push_str(" RETURNING *");

        CompiledQuery::new(sql, params)
    }

    /// `DELETE FROM t WHERE ... RETURNING *`.
    pub fn compile_destroy(&self, table: &str, criteria: &Criteria) -> Result<CompiledQuery> {
        validate_identifier(table)?;
        let table = truncate_identifier(table);
        let mut params = Vec::new();

        let mut sql = format!("DELETE FROM {}", quote_identifier(&table));
        if let Some(where_sql) = self.where_clause(&table, criteria.predicate.as_ref(), &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push_str(" RETURNING *");

        CompiledQuery::new(sql, params)
    }

    /// `SELECT COUNT(*) AS "count" FROM t WHERE ...`.
    pub fn compile_count(&self, table: &str, criteria: &Criteria) -> Result<CompiledQuery> {
        validate_identifier(table)?;
        let table = truncate_identifier(table);
        let mut params = Vec::new();

        let mut sql = format!("SELECT COUNT(*) AS \"count\" FROM {}", quote_identifier(&table));
        if let Some(where_sql) = self.where_clause(&table, criteria.predicate.as_ref(), &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        CompiledQuery::new(sql, params)
    }
}

/// Encodes a written value for its column.
///
/// Untyped array attributes are stored as bracketed JSON text; JSON
/// attributes take any value as JSON.
fn encode_value(
    table_schema: Option<&TableSchema>,
    table: &str,
    column: &str,
    value: &SqlValue,
) -> Result<SqlValue> {
    validate_identifier(column)?;
    let attr = match table_schema {
        Some(ts) => ts.attribute(column).ok_or_else(|| {
            AdapterError::Compilation(format!("Unknown attribute '{}' on table '{}'", column, table))
        })?,
        None => return Ok(value.clone()),
    };
    if attr.is_virtual() {
        return Err(AdapterError::Compilation(format!(
            "Attribute '{}.{}' is a collection association and cannot be written",
            table, column
        )));
    }

    let encoded = match (&attr.attr_type, value) {
        (AttributeType::Array(None), SqlValue::Array(_)) => SqlValue::String(value.to_json().to_string()),
        (AttributeType::Json | AttributeType::Jsonb, SqlValue::Null) => SqlValue::Null,
        (AttributeType::Json | AttributeType::Jsonb, SqlValue::Json(_)) => value.clone(),
        (AttributeType::Json | AttributeType::Jsonb, other) => SqlValue::Json(other.to_json()),
        _ => value.clone(),
    };
    Ok(encoded)
}
