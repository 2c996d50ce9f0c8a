//! Criteria: filter tree, sort, pagination and association joins.
//!
//! Criteria are built in code or read from JSON objects of the form
//!
//! ```json
//! { "name": "Alice", "age": { ">=": 18 }, "sort": { "name": 1 }, "limit": 10, "skip": 5 }
//! ```

use serde_json::{Map, Value as JsonValue};

use super::types::{Operator, SortDirection};
use crate::{AdapterError, Result, SqlValue};

/// Keys that configure the query rather than filter it.
const RESERVED_KEYS: &[&str] = &["sort", "limit", "skip", "groupBy", "select", "joins", "where"];

/// Filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: Operator,
        value: SqlValue,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: Operator, value: SqlValue) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: SqlValue) -> Self {
        Self::compare(field, Operator::Eq, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, Operator::IsNull, SqlValue::Null)
    }

    /// Combines two predicates with AND, flattening nested ANDs.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut items) => {
                items.push(other);
                Predicate::And(items)
            }
            first => Predicate::And(vec![first, other]),
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Association join between a parent and a child table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub parent: String,
    pub parent_key: String,
    pub child: String,
    pub child_key: String,
    /// The parent side is itself a junction lateral joined under the same alias
    pub junction: bool,
    /// Name of the association column in the result
    pub alias: String,
    /// Filter, sort and pagination applied per parent row
    pub criteria: Option<Box<Criteria>>,
    /// Whether the association appears in the select list
    pub select: bool,
    /// Drop the parent key from the root select so the alias can take its name
    pub remove_parent_key: bool,
}

impl JoinSpec {
    pub fn new(
        parent: impl Into<String>,
        parent_key: impl Into<String>,
        child: impl Into<String>,
        child_key: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            parent_key: parent_key.into(),
            child: child.into(),
            child_key: child_key.into(),
            junction: false,
            alias: alias.into(),
            criteria: None,
            select: true,
            remove_parent_key: false,
        }
    }

    pub fn junction(mut self) -> Self {
        self.junction = true;
        self
    }

    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(Box::new(criteria));
        self
    }

    /// Keep the join for chaining but leave it out of the select list.
    pub fn hidden(mut self) -> Self {
        self.select = false;
        self
    }

    pub fn remove_parent_key(mut self) -> Self {
        self.remove_parent_key = true;
        self
    }

    fn from_json(value: &JsonValue) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| AdapterError::Compilation(format!("join must be an object, got {}", value)))?;
        let text = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| AdapterError::Compilation(format!("join is missing '{}'", key)))
        };
        let child = text("child")?;
        let mut join = JoinSpec::new(
            text("parent")?,
            text("parentKey")?,
            child.clone(),
            text("childKey")?,
            obj.get("alias")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or(child),
        );
        join.junction = obj.get("junctionTable").and_then(JsonValue::as_bool).unwrap_or(false);
        join.select = !matches!(obj.get("select"), Some(JsonValue::Bool(false)));
        join.remove_parent_key = obj
            .get("removeParentKey")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if let Some(nested) = obj.get("criteria") {
            join.criteria = Some(Box::new(Criteria::from_json(nested)?));
        }
        Ok(join)
    }
}

/// Filter, sort, pagination and joins for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub predicate: Option<Predicate>,
    pub sort: Vec<SortSpec>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub joins: Vec<JoinSpec>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate, AND-ed with any existing one.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: SqlValue) -> Self {
        self.filter(Predicate::eq(field, value))
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortSpec {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Reads criteria from a JSON object.
    ///
    /// Filters come from `where` when present, otherwise from every key that
    /// is not one of `sort`, `limit`, `skip`, `groupBy`, `select`, `joins`.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let obj = match value {
            JsonValue::Null => return Ok(Criteria::new()),
            JsonValue::Object(obj) => obj,
            other => {
                return Err(AdapterError::Compilation(format!(
                    "criteria must be an object, got {}",
                    other
                )))
            }
        };

        let mut criteria = Criteria::new();

        let filters = match obj.get("where") {
            Some(JsonValue::Object(filters)) => Some(filters.clone()),
            Some(JsonValue::Null) => None,
            Some(other) => {
                return Err(AdapterError::Compilation(format!(
                    "'where' must be an object, got {}",
                    other
                )))
            }
            None => {
                let rest: Map<String, JsonValue> = obj
                    .iter()
                    .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(rest)
            }
        };
        if let Some(filters) = filters {
            criteria.predicate = parse_where(&filters)?;
        }

        if let Some(sort) = obj.get("sort") {
            criteria.sort = parse_sort(sort)?;
        }
        criteria.limit = parse_count(obj, "limit")?;
        criteria.skip = parse_count(obj, "skip")?;

        if let Some(joins) = obj.get("joins") {
            let joins = joins.as_array().ok_or_else(|| {
                AdapterError::Compilation("'joins' must be an array".to_string())
            })?;
            criteria.joins = joins.iter().map(JoinSpec::from_json).collect::<Result<_>>()?;
        }

        Ok(criteria)
    }
}

fn parse_count(obj: &Map<String, JsonValue>, key: &str) -> Result<Option<i64>> {
    match obj.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| {
                AdapterError::Compilation(format!(
                    "'{}' must be a non-negative integer, got {}",
                    key, value
                ))
            }),
    }
}

fn parse_where(filters: &Map<String, JsonValue>) -> Result<Option<Predicate>> {
    let mut predicates = Vec::new();
    for (key, value) in filters {
        match key.as_str() {
            "or" | "and" => {
                let branches = value.as_array().ok_or_else(|| {
                    AdapterError::Compilation(format!("'{}' must be an array", key))
                })?;
                let mut parsed = Vec::new();
                for branch in branches {
                    let branch = branch.as_object().ok_or_else(|| {
                        AdapterError::Compilation(format!("'{}' branches must be objects", key))
                    })?;
                    // An empty branch matches every row
                    parsed.push(parse_where(branch)?.unwrap_or(Predicate::And(Vec::new())));
                }
                predicates.push(if key == "or" {
                    Predicate::Or(parsed)
                } else {
                    Predicate::And(parsed)
                });
            }
            field => predicates.push(parse_field(field, value)?),
        }
    }

    Ok(match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => Some(Predicate::And(predicates)),
    })
}

fn parse_field(field: &str, value: &JsonValue) -> Result<Predicate> {
    match value {
        JsonValue::Array(_) => Ok(Predicate::compare(field, Operator::In, SqlValue::from_json(value))),
        JsonValue::Object(modifiers) => {
            let mut parts = Vec::with_capacity(modifiers.len());
            for (modifier, operand) in modifiers {
                parts.push(parse_modifier(field, modifier, operand)?);
            }
            Ok(match parts.len() {
                1 => parts.remove(0),
                _ => Predicate::And(parts),
            })
        }
        scalar => Ok(Predicate::eq(field, SqlValue::from_json(scalar))),
    }
}

fn parse_modifier(field: &str, modifier: &str, operand: &JsonValue) -> Result<Predicate> {
    let value = SqlValue::from_json(operand);
    let pattern = |prefix: &str, suffix: &str| -> Result<SqlValue> {
        operand
            .as_str()
            .map(|s| SqlValue::String(format!("{}{}{}", prefix, s, suffix)))
            .ok_or_else(|| {
                AdapterError::Compilation(format!("'{}' on '{}' needs a string", modifier, field))
            })
    };

    let predicate = match modifier {
        "<" | "lessThan" => Predicate::compare(field, Operator::Lt, value),
        "<=" | "lessThanOrEqual" => Predicate::compare(field, Operator::Lte, value),
        ">" | "greaterThan" => Predicate::compare(field, Operator::Gt, value),
        ">=" | "greaterThanOrEqual" => Predicate::compare(field, Operator::Gte, value),
        "!" | "not" | "!=" => match operand {
            JsonValue::Null => Predicate::compare(field, Operator::IsNotNull, SqlValue::Null),
            JsonValue::Array(_) => Predicate::compare(field, Operator::NotIn, value),
            _ => Predicate::compare(field, Operator::Ne, value),
        },
        "like" => Predicate::compare(field, Operator::Like, value),
        "contains" => Predicate::compare(field, Operator::ILike, pattern("%", "%")?),
        "startsWith" => Predicate::compare(field, Operator::ILike, pattern("", "%")?),
        "endsWith" => Predicate::compare(field, Operator::ILike, pattern("%", "")?),
        "in" => Predicate::compare(field, Operator::In, value),
        "nin" => Predicate::compare(field, Operator::NotIn, value),
        other => {
            return Err(AdapterError::Compilation(format!(
                "Unknown modifier '{}' on '{}'",
                other, field
            )))
        }
    };
    Ok(predicate)
}

fn parse_sort(value: &JsonValue) -> Result<Vec<SortSpec>> {
    match value {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Object(fields) => fields
            .iter()
            .map(|(field, dir)| {
                Ok(SortSpec {
                    field: field.clone(),
                    direction: parse_direction(field, dir)?,
                })
            })
            .collect(),
        JsonValue::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut words = part.split_whitespace();
                let field = words.next().unwrap_or_default().to_string();
                let direction = match words.next().map(str::to_lowercase).as_deref() {
                    None | Some("asc") => SortDirection::Asc,
                    Some("desc") => SortDirection::Desc,
                    Some(other) => {
                        return Err(AdapterError::Compilation(format!(
                            "Unknown sort direction '{}' for '{}'",
                            other, field
                        )))
                    }
                };
                Ok(SortSpec { field, direction })
            })
            .collect(),
        JsonValue::Array(items) => {
            let mut specs = Vec::new();
            for item in items {
                specs.extend(parse_sort(item)?);
            }
            Ok(specs)
        }
        other => Err(AdapterError::Compilation(format!("Invalid sort {}", other))),
    }
}

fn parse_direction(field: &str, value: &JsonValue) -> Result<SortDirection> {
    match value {
        JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(SortDirection::Asc),
        JsonValue::Number(n) if n.as_i64() == Some(-1) => Ok(SortDirection::Desc),
        JsonValue::String(s) if s.eq_ignore_ascii_case("asc") => Ok(SortDirection::Asc),
        JsonValue::String(s) if s.eq_ignore_ascii_case("desc") => Ok(SortDirection::Desc),
        other => Err(AdapterError::Compilation(format!(
            "Unknown sort direction {} for '{}'",
            other, field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_strips_reserved_keys() {
        let criteria = Criteria::from_json(&json!({
            "name": "Alice",
            "sort": {"name": 1},
            "limit": 10,
            "skip": 5,
            "groupBy": ["name"],
            "select": ["name"]
        }))
        .unwrap();

        assert_eq!(
            criteria.predicate,
            Some(Predicate::eq("name", SqlValue::String("Alice".to_string())))
        );
        assert_eq!(
            criteria.sort,
            vec![SortSpec { field: "name".to_string(), direction: SortDirection::Asc }]
        );
        assert_eq!(criteria.limit, Some(10));
        assert_eq!(criteria.skip, Some(5));
    }

    #[test]
    fn test_from_json_where_and_or() {
        let criteria = Criteria::from_json(&json!({
            "where": {
                "or": [{"name": "a"}, {"age": {">": 30, "<=": 40}}]
            },
            "sort": "age desc, name"
        }))
        .unwrap();

        assert_eq!(
            criteria.predicate,
            Some(Predicate::Or(vec![
                Predicate::eq("name", SqlValue::String("a".to_string())),
                Predicate::And(vec![
                    Predicate::compare("age", Operator::Gt, SqlValue::BigInt(30)),
                    Predicate::compare("age", Operator::Lte, SqlValue::BigInt(40)),
                ]),
            ]))
        );
        assert_eq!(criteria.sort[0].direction, SortDirection::Desc);
        assert_eq!(criteria.sort[1].field, "name");
        assert_eq!(criteria.sort[1].direction, SortDirection::Asc);
    }

    #[test]
    fn test_from_json_empty_or_branch_matches_all() {
        let criteria = Criteria::from_json(&json!({
            "where": {"or": [{}, {"name": "a"}]}
        }))
        .unwrap();

        assert_eq!(
            criteria.predicate,
            Some(Predicate::Or(vec![
                Predicate::And(vec![]),
                Predicate::eq("name", SqlValue::String("a".to_string())),
            ]))
        );
    }

    #[test]
    fn test_from_json_modifiers() {
        let criteria = Criteria::from_json(&json!({
            "title": {"contains": "rust"},
            "id": [1, 2],
            "deleted": {"!": null}
        }))
        .unwrap();

        assert_eq!(
            criteria.predicate,
            Some(Predicate::And(vec![
                Predicate::compare("title", Operator::ILike, SqlValue::String("%rust%".to_string())),
                Predicate::compare(
                    "id",
                    Operator::In,
                    SqlValue::Array(vec![SqlValue::BigInt(1), SqlValue::BigInt(2)])
                ),
                Predicate::compare("deleted", Operator::IsNotNull, SqlValue::Null),
            ]))
        );
    }

    #[test]
    fn test_from_json_errors() {
        assert!(Criteria::from_json(&json!({"a": {"~": 1}})).is_err());
        assert!(Criteria::from_json(&json!({"limit": -1})).is_err());
        assert!(Criteria::from_json(&json!({"sort": {"a": 2}})).is_err());
        assert!(Criteria::from_json(&json!("name")).is_err());
    }

    #[test]
    fn test_from_json_joins() {
        let criteria = Criteria::from_json(&json!({
            "joins": [{
                "parent": "users",
                "parentKey": "id",
                "child": "posts",
                "childKey": "user_id",
                "alias": "posts",
                "removeParentKey": false,
                "criteria": {"sort": {"id": 1}, "limit": 2}
            }]
        }))
        .unwrap();

        assert_eq!(criteria.predicate, None);
        let join = &criteria.joins[0];
        assert_eq!(join.child, "posts");
        assert!(join.select);
        assert!(!join.junction);
        assert_eq!(join.criteria.as_ref().and_then(|c| c.limit), Some(2));
    }

    #[test]
    fn test_builder_and_flattening() {
        let criteria = Criteria::new()
            .where_eq("a", SqlValue::Int(1))
            .where_eq("b", SqlValue::Int(2))
            .where_eq("c", SqlValue::Int(3));
        match criteria.predicate {
            Some(Predicate::And(items)) => assert_eq!(items.len(), 3),
            other => panic!("expected flattened AND, got {:?}", other),
        }
    }
}
