//! Association fetches through lateral subqueries.
//!
//! Every join becomes a `LEFT JOIN LATERAL` subquery that applies the
//! association's own filter, sort and pagination per parent row. A junction
//! join and the hidden join into its junction table share one subquery. Selected
//! associations are folded back into one JSON array column per root row:
//!
//! ```text
//! SELECT "users".*, array_to_json(...) AS "posts"
//! FROM "users"
//! LEFT JOIN LATERAL (SELECT "posts".* FROM "posts"
//!     WHERE "posts"."user_id" = "users"."id" ORDER BY ... LIMIT $1 OFFSET $2) AS "postsposts" ON TRUE
//! GROUP BY "users"."id" ORDER BY 1 LIMIT $3 OFFSET $4
//! ```

use super::compiler::CriteriaCompiler;
use super::criteria::{Criteria, JoinSpec};
use super::helpers::{qualify, quote_identifier, truncate_identifier, validate_identifier};
use super::types::CompiledQuery;
use crate::schema::DEFAULT_PRIMARY_KEY;
use crate::{AdapterError, Result};

/// Slice applied to an aggregated association array (1-based, inclusive).
///
/// The lateral subquery has already skipped and limited the children of
/// each parent, so the aggregate holds positions re-based at 1 and the
/// window is `[1:limit]`. When more than one lateral join fans the rows out,
/// the aggregate holds repeated children and an index slice would cut
/// distinct ones; no window is emitted and de-duplication happens when the
/// result is cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateWindow {
    pub lower: i32,
    pub upper: i32,
}

impl AggregateWindow {
    /// Window for a join with `limit`, among `lateral_joins` laterals in total.
    pub fn for_join(limit: Option<i64>, lateral_joins: usize) -> Option<Self> {
        match (limit, lateral_joins) {
            (Some(limit), 1) => Some(Self {
                lower: 1,
                upper: i32::try_from(limit.max(0)).unwrap_or(i32::MAX),
            }),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> String {
        format!("[{}:{}]", self.lower, self.upper)
    }

    /// PostgreSQL array slice semantics over `items`.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        if self.upper < self.lower || self.upper < 1 {
            return Vec::new();
        }
        let start = (self.lower.max(1) - 1) as usize;
        let end = (self.upper as usize).min(items.len());
        if start >= end {
            return Vec::new();
        }
        items[start..end].to_vec()
    }
}

/// Plans multi-association fetches for a root table.
pub struct JoinPlanner<'a> {
    compiler: CriteriaCompiler<'a>,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(compiler: CriteriaCompiler<'a>) -> Self {
        Self { compiler }
    }

    /// Builds the root query with one lateral subquery per join.
    pub fn build_joined_query(&self, table: &str, criteria: &Criteria) -> Result<CompiledQuery> {
        validate_identifier(table)?;
        let root = truncate_identifier(table);
        let schema = self.compiler.schema();
        let primary_key = schema
            .get(&root)
            .map(|t| t.primary_key().to_string())
            .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string());

        let links = self.junction_links(&criteria.joins)?;
        let lateral_count = (0..criteria.joins.len())
            .filter(|i| !is_folded_link(&criteria.joins, &links, *i))
            .count();

        let mut params = Vec::new();
        let mut columns = vec![self.root_columns(&root, &criteria.joins)?];
        let mut laterals = Vec::with_capacity(lateral_count);

        for (index, join) in criteria.joins.iter().enumerate() {
            self.check_join(join)?;
            if is_folded_link(&criteria.joins, &links, index) {
                continue;
            }
            let lateral_alias = truncate_identifier(&format!("{}{}", join.alias, join.child));
            let nested = join.criteria.as_deref().cloned().unwrap_or_default();

            let subquery = match links[index] {
                Some(link) => {
                    self.junction_subquery(&criteria.joins[link], join, &nested, &mut params)?
                }
                None => self.child_subquery(join, &nested, &mut params)?,
            };
            laterals.push(format!(
                "LEFT JOIN LATERAL ({}) AS {} ON TRUE",
                subquery,
                quote_identifier(&lateral_alias)
            ));

            if join.select {
                let window = AggregateWindow::for_join(nested.limit, lateral_count);
                columns.push(self.association_column(join, &lateral_alias, &nested, window)?);
            }
        }

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), quote_identifier(&root));
        for lateral in &laterals {
            sql.push(' ');
            sql.push_str(lateral);
        }
        if let Some(where_sql) =
            self.compiler
                .where_clause(&root, criteria.predicate.as_ref(), &mut params)?
        {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push_str(&format!(" GROUP BY {}", qualify(&root, &primary_key)));
        sql.push(' ');
        sql.push_str(&self.compiler.order_by(&root, &root, &criteria.sort)?);
        sql.push(' ');
        sql.push_str(&CriteriaCompiler::pagination(criteria.limit, criteria.skip, &mut params)?);

        tracing::debug!(
            table = %root,
            joins = criteria.joins.len(),
            params = params.len(),
            "Planned joined query"
        );
        CompiledQuery::new(sql, params)
    }

    /// `"root".*`, or the spelled-out column list when a join replaces a
    /// parent key column with its association.
    fn root_columns(&self, root: &str, joins: &[JoinSpec]) -> Result<String> {
        let removed: Vec<&str> = joins
            .iter()
            .filter(|j| j.remove_parent_key && j.select && truncate_identifier(&j.parent) == root)
            .map(|j| j.parent_key.as_str())
            .collect();
        if removed.is_empty() {
            return Ok(format!("{}.*", quote_identifier(root)));
        }

        let table = self.compiler.schema().get(root).ok_or_else(|| {
            AdapterError::Compilation(format!(
                "Cannot remove parent key from '{}': table is not in the schema",
                root
            ))
        })?;
        let columns: Vec<String> = table
            .column_attributes()
            .filter(|a| !removed.contains(&a.name.as_str()))
            .map(|a| qualify(root, &a.name))
            .collect();
        if columns.is_empty() {
            return Err(AdapterError::Compilation(format!(
                "No columns left on '{}' after removing parent keys",
                root
            )));
        }
        Ok(columns.join(", "))
    }

    fn check_join(&self, join: &JoinSpec) -> Result<()> {
        for name in [&join.parent, &join.parent_key, &join.child, &join.child_key, &join.alias] {
            validate_identifier(name)?;
        }
        let schema = self.compiler.schema();
        for (table, key) in [(&join.parent, &join.parent_key), (&join.child, &join.child_key)] {
            if let Some(ts) = schema.get(table) {
                if !ts.has_attribute(key) {
                    return Err(AdapterError::Compilation(format!(
                        "Join '{}' uses unknown key '{}.{}'",
                        join.alias, table, key
                    )));
                }
            }
        }
        if join.criteria.as_ref().map_or(false, |c| c.has_joins()) {
            return Err(AdapterError::Compilation(format!(
                "Join '{}' has nested joins; chain them through parent aliases instead",
                join.alias
            )));
        }
        Ok(())
    }

    /// For each junction join, the index of the join that reaches its
    /// junction table under the same alias.
    fn junction_links(&self, joins: &[JoinSpec]) -> Result<Vec<Option<usize>>> {
        joins
            .iter()
            .map(|join| {
                if !join.junction {
                    return Ok(None);
                }
                let junction_table = truncate_identifier(&join.parent);
                joins
                    .iter()
                    .position(|link| {
                        !link.junction
                            && link.alias == join.alias
                            && truncate_identifier(&link.child) == junction_table
                    })
                    .map(Some)
                    .ok_or_else(|| {
                        AdapterError::Compilation(format!(
                            "Junction join '{}' has no join into '{}' under the same alias",
                            join.alias, junction_table
                        ))
                    })
            })
            .collect()
    }

    /// `SELECT "child".* FROM "child" WHERE <filter> AND <correlation> ORDER BY .. LIMIT .. OFFSET ..`
    fn child_subquery(
        &self,
        join: &JoinSpec,
        nested: &Criteria,
        params: &mut Vec<crate::SqlValue>,
    ) -> Result<String> {
        let child = truncate_identifier(&join.child);
        let parent = truncate_identifier(&join.parent);
        if child == parent {
            return Err(self_join(join));
        }

        let mut filters = Vec::new();
        if let Some(where_sql) = self
            .compiler
            .where_clause(&child, nested.predicate.as_ref(), params)?
        {
            filters.push(format!("({})", where_sql));
        }
        filters.push(format!(
            "{} = {}",
            qualify(&child, &join.child_key),
            qualify(&parent, &join.parent_key)
        ));

        let source = quote_identifier(&child);
        self.paged_select(&child, &source, &filters, nested, params)
    }

    /// Junction and child in one subquery, so the association is paged
    /// once per parent rather than once per junction row:
    ///
    /// ```text
    /// SELECT "groups".* FROM "user_groups" JOIN "groups" ON "groups"."id" = "user_groups"."group_id"
    ///     WHERE "user_groups"."user_id" = "users"."id" ORDER BY 1 LIMIT $1 OFFSET $2
    /// ```
    fn junction_subquery(
        &self,
        link: &JoinSpec,
        join: &JoinSpec,
        nested: &Criteria,
        params: &mut Vec<crate::SqlValue>,
    ) -> Result<String> {
        let child = truncate_identifier(&join.child);
        let junction = truncate_identifier(&join.parent);
        let parent = truncate_identifier(&link.parent);
        if child == parent || junction == parent || child == junction {
            return Err(self_join(join));
        }

        let mut filters = Vec::new();
        if let Some(where_sql) = self
            .compiler
            .where_clause(&child, nested.predicate.as_ref(), params)?
        {
            filters.push(format!("({})", where_sql));
        }
        let link_predicate = link.criteria.as_ref().and_then(|c| c.predicate.as_ref());
        if let Some(where_sql) = self.compiler.where_clause(&junction, link_predicate, params)? {
            filters.push(format!("({})", where_sql));
        }
        filters.push(format!(
            "{} = {}",
            qualify(&junction, &link.child_key),
            qualify(&parent, &link.parent_key)
        ));

        let source = format!(
            "{} JOIN {} ON {} = {}",
            quote_identifier(&junction),
            quote_identifier(&child),
            qualify(&child, &join.child_key),
            qualify(&junction, &join.parent_key)
        );
        self.paged_select(&child, &source, &filters, nested, params)
    }

    fn paged_select(
        &self,
        child: &str,
        source: &str,
        filters: &[String],
        nested: &Criteria,
        params: &mut Vec<crate::SqlValue>,
    ) -> Result<String> {
        Ok(format!(
            "SELECT {}.* FROM {} WHERE {} {} {}",
            quote_identifier(child),
            source,
            filters.join(" AND "),
            self.compiler.order_by(child, child, &nested.sort)?,
            CriteriaCompiler::pagination(nested.limit, nested.skip, params)?
        ))
    }

    fn association_column(
        &self,
        join: &JoinSpec,
        lateral_alias: &str,
        nested: &Criteria,
        window: Option<AggregateWindow>,
    ) -> Result<String> {
        let child = truncate_identifier(&join.child);
        let mut order = self
            .compiler
            .sort_columns(&child, lateral_alias, &nested.sort)?;
        if order.is_empty() {
            let child_pk = self
                .compiler
                .schema()
                .get(&child)
                .map(|t| t.primary_key().to_string())
                .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string());
            order.push(qualify(lateral_alias, &child_pk));
        }

        let aggregated = format!(
            "array_remove(array_agg({}.* ORDER BY {}), NULL)",
            quote_identifier(lateral_alias),
            order.join(", ")
        );
        let sliced = match window {
            Some(window) => format!("({}){}", aggregated, window.to_sql()),
            None => aggregated,
        };
        Ok(format!(
            "array_to_json({}) AS {}",
            sliced,
            quote_identifier(&truncate_identifier(&join.alias))
        ))
    }
}

/// A hidden join consumed by the junction join that follows it.
fn is_folded_link(joins: &[JoinSpec], links: &[Option<usize>], index: usize) -> bool {
    !joins[index].select && links.iter().any(|link| *link == Some(index))
}

fn self_join(join: &JoinSpec) -> AdapterError {
    AdapterError::Compilation(format!(
        "Join '{}' correlates '{}' with itself; self-associations are not supported",
        join.alias, join.child
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_page<T: Clone>(children: &[T], skip: usize, limit: usize) -> Vec<T> {
        children.iter().skip(skip).take(limit).cloned().collect()
    }

    fn first_seen<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
        let mut seen = Vec::new();
        for item in items {
            if !seen.contains(item) {
                seen.push(item.clone());
            }
        }
        seen
    }

    #[test]
    fn test_window_single_join_matches_reference() {
        for n in 0..8usize {
            let children: Vec<usize> = (0..n).collect();
            for skip in 0..6usize {
                for limit in 0..6usize {
                    // The lateral subquery paginates; the aggregate slices what is left
                    let lateral = reference_page(&children, skip, limit);
                    let window = AggregateWindow::for_join(Some(limit as i64), 1).unwrap();
                    assert_eq!(
                        window.apply(&lateral),
                        reference_page(&children, skip, limit),
                        "n={} skip={} limit={}",
                        n,
                        skip,
                        limit
                    );
                }
            }
        }
    }

    #[test]
    fn test_offset_applied_twice_would_lose_children() {
        let children: Vec<usize> = (0..10).collect();
        let lateral = reference_page(&children, 2, 3);
        // offset + 1 .. offset + limit over already-offset rows drops the first two
        let double_offset = AggregateWindow { lower: 3, upper: 5 };
        assert_ne!(double_offset.apply(&lateral), reference_page(&children, 2, 3));
    }

    #[test]
    fn test_fan_out_has_no_window_and_dedupes_exactly() {
        for a in 0..5usize {
            for b in 1..4usize {
                let posts: Vec<usize> = (0..a).collect();
                let tags: Vec<usize> = (100..100 + b).collect();
                // Cross product of two laterals, aggregated in post order
                let aggregated: Vec<usize> = posts
                    .iter()
                    .flat_map(|p| tags.iter().map(move |_| *p))
                    .collect();

                assert_eq!(AggregateWindow::for_join(Some(a as i64), 2), None);
                assert_eq!(first_seen(&aggregated), posts);

                // Slicing the fanned-out aggregate by limit would cut distinct posts
                if b > 1 && a > 1 {
                    let sliced = AggregateWindow { lower: 1, upper: a as i32 }.apply(&aggregated);
                    assert_ne!(first_seen(&sliced), posts);
                }
            }
        }
    }

    #[test]
    fn test_window_clamps_and_skips_unlimited() {
        assert_eq!(AggregateWindow::for_join(None, 1), None);
        assert_eq!(
            AggregateWindow::for_join(Some(i64::MAX), 1),
            Some(AggregateWindow { lower: 1, upper: i32::MAX })
        );
        assert_eq!(AggregateWindow { lower: 1, upper: 2 }.to_sql(), "[1:2]");
        assert!(AggregateWindow { lower: 1, upper: 0 }.apply(&[1, 2]).is_empty());
    }
}
