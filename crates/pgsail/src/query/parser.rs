//! Predicate to WHERE-fragment translation.

use super::criteria::Predicate;
use super::helpers::{qualify, validate_identifier};
use super::types::Operator;
use crate::schema::Schema;
use crate::{AdapterError, Result, SqlValue};

/// WHERE fragment with `?` placeholders and the values for them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCriteria {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Translates a predicate into a dialect-neutral WHERE fragment.
///
/// Implementations emit `?` placeholders; numbering is left to the compiler.
pub trait CriteriaParser: Send + Sync {
    fn parse(&self, table: &str, schema: &Schema, predicate: &Predicate) -> Result<ParsedCriteria>;
}

/// Default parser: table-qualified comparisons joined with AND/OR/NOT.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhereParser;

impl CriteriaParser for WhereParser {
    fn parse(&self, table: &str, schema: &Schema, predicate: &Predicate) -> Result<ParsedCriteria> {
        let mut values = Vec::new();
        let sql = render(table, schema, predicate, true, &mut values)?;
        Ok(ParsedCriteria { sql, values })
    }
}

fn render(
    table: &str,
    schema: &Schema,
    predicate: &Predicate,
    top_level: bool,
    values: &mut Vec<SqlValue>,
) -> Result<String> {
    match predicate {
        Predicate::Compare { field, op, value } => {
            render_comparison(table, schema, field, *op, value, values)
        }
        Predicate::And(items) | Predicate::Or(items) => {
            let is_and = matches!(predicate, Predicate::And(_));
            if items.is_empty() {
                return Ok(if is_and { "TRUE" } else { "FALSE" }.to_string());
            }
            let parts = items
                .iter()
                .map(|item| render(table, schema, item, false, values))
                .collect::<Result<Vec<_>>>()?;
            let joined = parts.join(if is_and { " AND " } else { " OR " });
            if top_level || parts.len() == 1 {
                Ok(joined)
            } else {
                Ok(format!("({})", joined))
            }
        }
        Predicate::Not(inner) => Ok(format!(
            "NOT ({})",
            render(table, schema, inner, true, values)?
        )),
    }
}

fn render_comparison(
    table: &str,
    schema: &Schema,
    field: &str,
    op: Operator,
    value: &SqlValue,
    values: &mut Vec<SqlValue>,
) -> Result<String> {
    validate_identifier(field)?;
    if let Some(table_schema) = schema.get(table) {
        if !table_schema.has_attribute(field) {
            return Err(AdapterError::Compilation(format!(
                "Unknown attribute '{}' on table '{}'",
                field, table
            )));
        }
    }
    let column = qualify(table, field);

    let sql = match (op, value) {
        (Operator::IsNull, _) | (Operator::Eq, SqlValue::Null) => format!("{} IS NULL", column),
        (Operator::IsNotNull, _) | (Operator::Ne, SqlValue::Null) => {
            format!("{} IS NOT NULL", column)
        }
        (Operator::In | Operator::NotIn, _) => {
            let items = match value {
                SqlValue::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            if items.is_empty() {
                // Nothing is IN an empty list; everything is NOT IN it
                return Ok(if op == Operator::In { "FALSE" } else { "TRUE" }.to_string());
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            values.extend(items);
            format!("{} {} ({})", column, op.to_sql(), placeholders)
        }
        _ => {
            values.push(value.clone());
            format!("{} {} ?", column, op.to_sql())
        }
    };
    Ok(sql)
}
