//! Datastores and the caller-owned registry that names them.
//!
//! A [`Datastore`] ties a schema to an executor and runs every operation as
//! compile, execute, cast. Each operation accepts an optional executor
//! override so it can run inside a [`Transaction`](crate::Transaction):
//!
//! ```ignore
//! let tx = conn.begin_transaction(TransactionOptions::default()).await?;
//! store.create("users", &values, Some(&tx)).await?;
//! store.update("posts", &criteria, &changes, Some(&tx)).await?;
//! tx.commit().await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

use crate::cast::{Record, ResultCaster};
use crate::config::AdapterConfig;
use crate::executor::QueryExecutor;
use crate::query::{CompiledQuery, Criteria, CriteriaCompiler, CriteriaParser, WhereParser};
use crate::schema::{Attribute, Schema, SchemaCompiler, TablePlan, TablePlanKind, TableSchema};
use crate::types::RawRow;
use crate::{AdapterError, Result, SqlValue};

/// A schema bound to an executor.
pub struct Datastore {
    name: String,
    schema: RwLock<Arc<Schema>>,
    executor: Arc<dyn QueryExecutor>,
    parser: Arc<dyn CriteriaParser>,
    config: AdapterConfig,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Datastore {
    /// Creates a datastore using the default [`WhereParser`].
    ///
    /// # Errors
    ///
    /// Returns `Schema` if the schema's associations do not resolve.
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        executor: Arc<dyn QueryExecutor>,
        config: AdapterConfig,
    ) -> Result<Self> {
        Self::with_parser(name, schema, executor, Arc::new(WhereParser), config)
    }

    pub fn with_parser(
        name: impl Into<String>,
        schema: Schema,
        executor: Arc<dyn QueryExecutor>,
        parser: Arc<dyn CriteriaParser>,
        config: AdapterConfig,
    ) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            name: name.into(),
            schema: RwLock::new(Arc::new(schema)),
            executor,
            parser,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Snapshot of the current schema.
    pub fn schema(&self) -> Result<Arc<Schema>> {
        self.schema
            .read()
            .map(|schema| Arc::clone(&schema))
            .map_err(|_| AdapterError::Internal("schema lock poisoned".to_string()))
    }

    /// Puts back a schema taken with [`schema`](Self::schema).
    ///
    /// Schema changes made inside a caller's transaction are visible here
    /// as soon as their DDL runs; after rolling that transaction back,
    /// restore the snapshot taken before it began.
    pub fn restore_schema(&self, snapshot: Arc<Schema>) -> Result<()> {
        let mut guard = self
            .schema
            .write()
            .map_err(|_| AdapterError::Internal("schema lock poisoned".to_string()))?;
        *guard = snapshot;
        Ok(())
    }

    /// Applies `update` to the schema as it is now, not to an earlier snapshot.
    fn replace_schema<T>(&self, update: impl FnOnce(&mut Schema) -> Result<T>) -> Result<T> {
        let mut guard = self
            .schema
            .write()
            .map_err(|_| AdapterError::Internal("schema lock poisoned".to_string()))?;
        update(Arc::make_mut(&mut guard))
    }

    fn executor<'a>(&'a self, tx: Option<&'a dyn QueryExecutor>) -> &'a dyn QueryExecutor {
        tx.unwrap_or(self.executor.as_ref())
    }

    fn schema_compiler(&self) -> SchemaCompiler {
        SchemaCompiler::new(self.config.type_mapping)
    }

    async fn run_plan(&self, plan: &TablePlan, tx: Option<&dyn QueryExecutor>) -> Result<()> {
        let executor = self.executor(tx);
        for statement in plan.to_sql() {
            executor.execute(&CompiledQuery::new(statement, Vec::new())?).await?;
        }
        Ok(())
    }

    /// Creates `table` and adds it to the schema.
    ///
    /// Returns the executed plan, including any best-effort type diagnostics.
    /// With a transaction in `tx`, see [`restore_schema`](Self::restore_schema)
    /// for undoing the schema change on rollback.
    #[instrument(skip(self, table, tx), fields(datastore = %self.name, table = %table.name()))]
    pub async fn define(&self, table: TableSchema, tx: Option<&dyn QueryExecutor>) -> Result<TablePlan> {
        let mut candidate = (*self.schema()?).clone();
        candidate.insert(table.clone());
        candidate.validate()?;

        let plan = self.schema_compiler().compile_table(&table)?;
        self.run_plan(&plan, tx).await?;
        self.replace_schema(|schema| {
            schema.insert(table);
            Ok(())
        })?;

        info!(diagnostics = plan.diagnostics.len(), "Defined table");
        Ok(plan)
    }

    /// Drops `table` and removes it from the schema.
    #[instrument(skip(self, tx), fields(datastore = %self.name))]
    pub async fn drop_table(&self, table: &str, tx: Option<&dyn QueryExecutor>) -> Result<()> {
        let plan = self.schema_compiler().compile_drop_table(table)?;
        self.run_plan(&plan, tx).await?;
        self.replace_schema(|schema| {
            schema.remove(table);
            Ok(())
        })?;
        info!("Dropped table");
        Ok(())
    }

    /// Adds a column for `attribute` to an existing table.
    ///
    /// Collection associations only extend the schema; their plan is empty.
    /// The schema change is kept even if a transaction passed as `tx` later
    /// rolls back.
    #[instrument(skip(self, attribute, tx), fields(datastore = %self.name, attribute = %attribute.name))]
    pub async fn add_attribute(
        &self,
        table: &str,
        attribute: Attribute,
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<TablePlan> {
        let updated = {
            let schema = self.schema()?;
            let current = schema.require(table)?;
            if current.has_attribute(&attribute.name) {
                return Err(AdapterError::Schema(format!(
                    "Attribute '{}' already exists on table '{}'",
                    attribute.name, table
                )));
            }
            let updated = current.with_attribute(attribute.clone());
            let mut candidate = (*schema).clone();
            candidate.insert(updated.clone());
            candidate.validate()?;
            updated
        };

        let plan = if attribute.is_virtual() {
            TablePlan::new(updated.name(), TablePlanKind::Alter)
        } else {
            self.schema_compiler().compile_add_attribute(updated.name(), &attribute)?
        };
        self.run_plan(&plan, tx).await?;
        self.replace_schema(|schema| {
            let current = schema.require(table)?;
            if !current.has_attribute(&attribute.name) {
                let extended = current.with_attribute(attribute);
                schema.insert(extended);
            }
            Ok(())
        })?;
        Ok(plan)
    }

    /// Drops the column of `attribute` from an existing table.
    #[instrument(skip(self, tx), fields(datastore = %self.name))]
    pub async fn remove_attribute(
        &self,
        table: &str,
        attribute: &str,
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<()> {
        let (table_name, is_virtual) = {
            let schema = self.schema()?;
            let current = schema.require(table)?;
            let attr = current.attribute(attribute).ok_or_else(|| {
                AdapterError::Schema(format!("Unknown attribute '{}' on table '{}'", attribute, table))
            })?;
            if attr.primary_key {
                return Err(AdapterError::Schema(format!(
                    "Cannot remove primary key '{}' from table '{}'",
                    attribute, table
                )));
            }
            (current.name().to_string(), attr.is_virtual())
        };

        // Collection associations have no column
        if !is_virtual {
            let plan = self.schema_compiler().compile_remove_attribute(&table_name, attribute)?;
            self.run_plan(&plan, tx).await?;
        }
        self.replace_schema(|schema| {
            let reduced = schema.require(table)?.without_attribute(attribute);
            schema.insert(reduced);
            Ok(())
        })
    }

    /// Fetches records of `table` matching `criteria`, associations included.
    #[instrument(skip(self, criteria, tx), fields(datastore = %self.name, joins = criteria.joins.len()))]
    pub async fn find(
        &self,
        table: &str,
        criteria: &Criteria,
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<Vec<Record>> {
        let schema = self.schema()?;
        let query = self.compiler(&schema).compile(table, criteria)?;
        let rows = self.executor(tx).execute(&query).await?;
        debug!(rows = rows.len(), "Fetched rows");
        ResultCaster::new(&schema).cast_rows(table, rows, &criteria.joins)
    }

    /// Inserts one record and returns it as stored.
    #[instrument(skip(self, values, tx), fields(datastore = %self.name))]
    pub async fn create(
        &self,
        table: &str,
        values: &[(String, SqlValue)],
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<Record> {
        let schema = self.schema()?;
        let query = self.compiler(&schema).compile_insert(table, values)?;
        let rows = self.executor(tx).execute(&query).await?;
        ResultCaster::new(&schema)
            .cast_rows(table, rows, &[])?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Database(format!("INSERT into '{}' returned no row", table)))
    }

    /// Updates matching records and returns them as stored.
    #[instrument(skip(self, criteria, values, tx), fields(datastore = %self.name))]
    pub async fn update(
        &self,
        table: &str,
        criteria: &Criteria,
        values: &[(String, SqlValue)],
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<Vec<Record>> {
        let schema = self.schema()?;
        let query = self.compiler(&schema).compile_update(table, criteria, values)?;
        let rows = self.executor(tx).execute(&query).await?;
        ResultCaster::new(&schema).cast_rows(table, rows, &[])
    }

    /// Deletes matching records and returns what was deleted.
    #[instrument(skip(self, criteria, tx), fields(datastore = %self.name))]
    pub async fn destroy(
        &self,
        table: &str,
        criteria: &Criteria,
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<Vec<Record>> {
        let schema = self.schema()?;
        let query = self.compiler(&schema).compile_destroy(table, criteria)?;
        let rows = self.executor(tx).execute(&query).await?;
        ResultCaster::new(&schema).cast_rows(table, rows, &[])
    }

    /// Counts matching records.
    #[instrument(skip(self, criteria, tx), fields(datastore = %self.name))]
    pub async fn count(
        &self,
        table: &str,
        criteria: &Criteria,
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<i64> {
        let schema = self.schema()?;
        let query = self.compiler(&schema).compile_count(table, criteria)?;
        let rows = self.executor(tx).execute(&query).await?;
        match rows.first().and_then(|row| row.get("count")) {
            Some(SqlValue::BigInt(n)) => Ok(*n),
            Some(SqlValue::Int(n)) => Ok(i64::from(*n)),
            other => Err(AdapterError::Deserialization(format!(
                "COUNT returned {:?}",
                other
            ))),
        }
    }

    /// Runs raw SQL with `?` or `$n` placeholders.
    #[instrument(skip(self, values, tx), fields(datastore = %self.name, params = values.len()))]
    pub async fn query(
        &self,
        sql: &str,
        values: Vec<SqlValue>,
        tx: Option<&dyn QueryExecutor>,
    ) -> Result<Vec<RawRow>> {
        let query = CompiledQuery::raw(sql, values)?;
        self.executor(tx).execute(&query).await
    }

    fn compiler<'a>(&'a self, schema: &'a Schema) -> CriteriaCompiler<'a> {
        CriteriaCompiler::new(schema, self.parser.as_ref())
    }
}

/// Named datastores owned by the caller.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    datastores: HashMap<String, Arc<Datastore>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `datastore` under its name.
    ///
    /// # Errors
    ///
    /// Returns `Registry` if the name is already taken.
    pub fn register(&mut self, datastore: Datastore) -> Result<Arc<Datastore>> {
        let name = datastore.name().to_string();
        if self.datastores.contains_key(&name) {
            return Err(AdapterError::Registry(format!(
                "Datastore '{}' is already registered",
                name
            )));
        }
        let datastore = Arc::new(datastore);
        self.datastores.insert(name.clone(), Arc::clone(&datastore));
        info!(datastore = %name, "Registered datastore");
        Ok(datastore)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Datastore>> {
        self.datastores
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::Registry(format!("Unknown datastore '{}'", name)))
    }

    /// Removes a datastore. Handles already given out stay usable.
    pub fn remove(&mut self, name: &str) -> Result<Arc<Datastore>> {
        let removed = self
            .datastores
            .remove(name)
            .ok_or_else(|| AdapterError::Registry(format!("Unknown datastore '{}'", name)))?;
        info!(datastore = %name, "Removed datastore");
        Ok(removed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datastores.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datastores.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datastores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datastores.is_empty()
    }
}
