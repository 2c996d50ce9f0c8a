//! Compiled statements and query enums.

use sqlx::postgres::PgArguments;

use super::helpers::{placeholder_indices, rewrite_placeholders};
use crate::{AdapterError, Result, SqlValue};

/// A statement ready for the executor: SQL with `$n` placeholders and the
/// values bound to them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    /// Wraps already-numbered SQL, checking the placeholders against `params`.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Result<Self> {
        let query = Self { sql: sql.into(), params };
        query.check_placeholders()?;
        Ok(query)
    }

    /// Prepares caller-supplied SQL.
    ///
    /// `?` placeholders are rewritten to `$n`; SQL already using `$n` is kept
    /// as is. Values go through the same preprocessing as criteria values.
    pub fn raw(sql: &str, values: Vec<SqlValue>) -> Result<Self> {
        let (sql, count) = rewrite_placeholders(sql, 1);
        if count > 0 && count != values.len() {
            return Err(AdapterError::Compilation(format!(
                "{} placeholders, {} values",
                count,
                values.len()
            )));
        }
        Self::new(sql, values.into_iter().map(preprocess_value).collect())
    }

    /// Every index `1..=params.len()` must be referenced and nothing higher.
    pub fn check_placeholders(&self) -> Result<()> {
        let indices = placeholder_indices(&self.sql);
        let max = indices.iter().copied().max().unwrap_or(0);
        if max != self.params.len() {
            return Err(AdapterError::Compilation(format!(
                "highest placeholder ${} but {} parameters",
                max,
                self.params.len()
            )));
        }
        if let Some(missing) = (1..=max).find(|i| !indices.contains(i)) {
            return Err(AdapterError::Compilation(format!(
                "placeholder ${} is never referenced",
                missing
            )));
        }
        Ok(())
    }

    /// Binds the parameters for sqlx.
    pub fn to_arguments(&self) -> Result<PgArguments> {
        let mut arguments = PgArguments::default();
        for param in &self.params {
            param.bind_to_arguments(&mut arguments)?;
        }
        Ok(arguments)
    }
}

/// Turns bracketed strings that parse as a JSON array into native arrays.
pub fn preprocess_value(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::String(s) if s.starts_with('[') => {
            match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json @ serde_json::Value::Array(_)) => SqlValue::from_json(&json),
                _ => SqlValue::String(s),
            }
        }
        other => other,
    }
}

/// Comparison operators understood by the default criteria parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// LIKE pattern matching
    Like,
    /// ILIKE case-insensitive pattern matching
    ILike,
    /// NOT LIKE
    NotLike,
    /// IN list
    In,
    /// NOT IN list
    NotIn,
    /// IS NULL
    IsNull,
    /// IS NOT NULL
    IsNotNull,
}

impl Operator {
    /// Returns the SQL operator string.
    pub fn to_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Operators that take no value.
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// Sort order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Suffix appended after the sort column; ascending has none.
    pub fn modifier(&self) -> &'static str {
        match self {
            SortDirection::Asc => "",
            SortDirection::Desc => " DESC",
        }
    }
}
