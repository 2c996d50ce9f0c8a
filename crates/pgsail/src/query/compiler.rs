//! Criteria to SELECT compilation.

use super::criteria::{Criteria, Predicate, SortSpec};
use super::helpers::{qualify, quote_identifier, rewrite_placeholders, truncate_identifier, validate_identifier};
use super::join::JoinPlanner;
use super::parser::CriteriaParser;
use super::types::{preprocess_value, CompiledQuery};
use crate::schema::Schema;
use crate::{AdapterError, Result, SqlValue};

/// Compiles criteria against a schema into parameterized SQL.
///
/// WHERE fragments come from the [`CriteriaParser`]; everything else
/// (ordering, pagination, placeholder numbering) is handled here.
#[derive(Clone, Copy)]
pub struct CriteriaCompiler<'a> {
    schema: &'a Schema,
    parser: &'a dyn CriteriaParser,
}

impl<'a> CriteriaCompiler<'a> {
    pub fn new(schema: &'a Schema, parser: &'a dyn CriteriaParser) -> Self {
        Self { schema, parser }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// `SELECT * FROM t WHERE ... ORDER BY ... LIMIT $n OFFSET $m`.
    ///
    /// Criteria carrying joins are planned by [`JoinPlanner`].
    pub fn compile(&self, table: &str, criteria: &Criteria) -> Result<CompiledQuery> {
        if criteria.has_joins() {
            return JoinPlanner::new(*self).build_joined_query(table, criteria);
        }

        validate_identifier(table)?;
        let table = truncate_identifier(table);
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {}", quote_identifier(&table));

        if let Some(where_sql) = self.where_clause(&table, criteria.predicate.as_ref(), &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push(' ');
        sql.push_str(&self.order_by(&table, &table, &criteria.sort)?);
        sql.push(' ');
        sql.push_str(&Self::pagination(criteria.limit, criteria.skip, &mut params)?);

        CompiledQuery::new(sql, params)
    }

    /// Parses `predicate` for `table` and numbers its placeholders after the
    /// values already in `params`.
    pub(crate) fn where_clause(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
        params: &mut Vec<SqlValue>,
    ) -> Result<Option<String>> {
        let predicate = match predicate {
            Some(p) => p,
            None => return Ok(None),
        };
        let parsed = self.parser.parse(table, self.schema, predicate)?;
        let (sql, count) = rewrite_placeholders(&parsed.sql, params.len() + 1);
        if count != parsed.values.len() {
            return Err(AdapterError::Compilation(format!(
                "WHERE fragment has {} placeholders but {} values",
                count,
                parsed.values.len()
            )));
        }
        params.extend(parsed.values.into_iter().map(preprocess_value));
        Ok(Some(sql))
    }

    /// `ORDER BY` over `table`'s sort fields, qualified by `qualifier`.
    ///
    /// An empty sort yields `ORDER BY 1`.
    pub(crate) fn order_by(&self, table: &str, qualifier: &str, sort: &[SortSpec]) -> Result<String> {
        let columns = self.sort_columns(table, qualifier, sort)?;
        if columns.is_empty() {
            Ok("ORDER BY 1".to_string())
        } else {
            Ok(format!("ORDER BY {}", columns.join(", ")))
        }
    }

    pub(crate) fn sort_columns(
        &self,
        table: &str,
        qualifier: &str,
        sort: &[SortSpec],
    ) -> Result<Vec<String>> {
        let table_schema = self.schema.get(table);
        sort.iter()
            .map(|spec| {
                validate_identifier(&spec.field)?;
                if let Some(ts) = table_schema {
                    if !ts.has_attribute(&spec.field) {
                        return Err(AdapterError::Compilation(format!(
                            "Cannot sort '{}' by unknown attribute '{}'",
                            table, spec.field
                        )));
                    }
                }
                Ok(format!("{}{}", qualify(qualifier, &spec.field), spec.direction.modifier()))
            })
            .collect()
    }

    /// `LIMIT $n OFFSET $m`; both are always bound.
    pub(crate) fn pagination(
        limit: Option<i64>,
        skip: Option<i64>,
        params: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let limit = limit.unwrap_or(i64::MAX);
        let skip = skip.unwrap_or(0);
        if limit < 0 || skip < 0 {
            return Err(AdapterError::Compilation(format!(
                "limit and skip must be non-negative (limit {}, skip {})",
                limit, skip
            )));
        }
        params.push(SqlValue::BigInt(limit));
        let limit_idx = params.len();
        params.push(SqlValue::BigInt(skip));
        Ok(format!("LIMIT ${} OFFSET ${}", limit_idx, params.len()))
    }
}
