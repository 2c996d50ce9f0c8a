//! Table plans: attribute lists to DDL.

use super::attribute::{Attribute, ForeignKeyRef};
use super::mapper::{apply_constraints, ColumnSpec, SchemaDiagnostic, TypeMapper, TypeMappingMode};
use super::model::TableSchema;
use crate::query::helpers::{quote_identifier, truncate_identifier, validate_identifier};
use crate::{AdapterError, Result};

/// Kind of DDL a plan performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePlanKind {
    Create,
    Alter,
    Drop,
}

/// Secondary index created with a table or column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub column: String,
}

/// One step of a table plan.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOperation {
    AddColumn(ColumnSpec),
    DropColumn(String),
    PrimaryKey(Vec<String>),
    ForeignKey { column: String, reference: ForeignKeyRef },
    CreateIndex(IndexSpec),
}

/// Ordered DDL operations for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    /// Table name, already truncated
    pub table: String,
    pub kind: TablePlanKind,
    pub operations: Vec<TableOperation>,
    pub diagnostics: Vec<SchemaDiagnostic>,
}

impl TablePlan {
    pub fn new(table: &str, kind: TablePlanKind) -> Self {
        Self {
            table: truncate_identifier(table),
            kind,
            operations: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Renders the plan as SQL statements, in execution order.
    pub fn to_sql(&self) -> Vec<String> {
        let table = quote_identifier(&self.table);
        let mut statements = Vec::new();

        match self.kind {
            TablePlanKind::Drop => {
                statements.push(format!("DROP TABLE IF EXISTS {} CASCADE", table));
            }
            TablePlanKind::Create => {
                let definitions: Vec<String> = self
                    .operations
                    .iter()
                    .filter_map(|op| match op {
                        TableOperation::AddColumn(column) => Some(column.to_sql()),
                        TableOperation::PrimaryKey(columns) => {
                            Some(format!("PRIMARY KEY ({})", quote_list(columns)))
                        }
                        TableOperation::ForeignKey { column, reference } => {
                            Some(foreign_key_sql(column, reference))
                        }
                        TableOperation::DropColumn(_) | TableOperation::CreateIndex(_) => None,
                    })
                    .collect();
                statements.push(format!("CREATE TABLE {} ({})", table, definitions.join(", ")));
            }
            TablePlanKind::Alter => {
                for op in &self.operations {
                    match op {
                        TableOperation::AddColumn(column) => statements
                            .push(format!("ALTER TABLE {} ADD COLUMN {}", table, column.to_sql())),
                        TableOperation::DropColumn(name) => statements.push(format!(
                            "ALTER TABLE {} DROP COLUMN {}",
                            table,
                            quote_identifier(name)
                        )),
                        TableOperation::PrimaryKey(columns) => statements.push(format!(
                            "ALTER TABLE {} ADD PRIMARY KEY ({})",
                            table,
                            quote_list(columns)
                        )),
                        TableOperation::ForeignKey { column, reference } => statements.push(
                            format!("ALTER TABLE {} ADD {}", table, foreign_key_sql(column, reference)),
                        ),
                        TableOperation::CreateIndex(_) => {}
                    }
                }
            }
        }

        for op in &self.operations {
            if let TableOperation::CreateIndex(index) = op {
                statements.push(format!(
                    "CREATE INDEX {} ON {} ({})",
                    quote_identifier(&index.name),
                    table,
                    quote_identifier(&index.column)
                ));
            }
        }

        statements
    }
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn foreign_key_sql(column: &str, reference: &ForeignKeyRef) -> String {
    format!(
        "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
        quote_identifier(column),
        quote_identifier(&truncate_identifier(&reference.table)),
        quote_identifier(&reference.column),
        reference.on_delete
    )
}

/// Compiles table schemas into [`TablePlan`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaCompiler {
    mapper: TypeMapper,
}

impl SchemaCompiler {
    pub fn new(mode: TypeMappingMode) -> Self {
        Self { mapper: TypeMapper::new(mode) }
    }

    /// Plans `CREATE TABLE` for `table`, followed by its indexes.
    pub fn compile_table(&self, table: &TableSchema) -> Result<TablePlan> {
        validate_identifier(table.name())?;
        let mut plan = TablePlan::new(table.name(), TablePlanKind::Create);
        let mut primary_key = Vec::new();

        for attr in table.attributes() {
            if attr.is_virtual() {
                if attr.primary_key {
                    return Err(AdapterError::Schema(format!(
                        "Primary key '{}' on table '{}' has no column",
                        attr.name,
                        table.name()
                    )));
                }
                continue;
            }
            if attr.primary_key {
                primary_key.push(attr.name.clone());
            }
            self.push_column(&mut plan, attr)?;
        }

        if !plan.operations.iter().any(|op| matches!(op, TableOperation::AddColumn(_))) {
            return Err(AdapterError::Schema(format!(
                "Table '{}' has no columns",
                table.name()
            )));
        }

        if !primary_key.is_empty() {
            plan.operations.push(TableOperation::PrimaryKey(primary_key));
        }
        for attr in table.column_attributes() {
            if let Some(reference) = &attr.foreign_key {
                plan.operations.push(TableOperation::ForeignKey {
                    column: attr.name.clone(),
                    reference: reference.clone(),
                });
            }
        }

        tracing::debug!(
            table = %plan.table,
            operations = plan.operations.len(),
            diagnostics = plan.diagnostics.len(),
            "Compiled table plan"
        );
        Ok(plan)
    }

    /// Plans `ALTER TABLE ... ADD COLUMN` for a new attribute.
    pub fn compile_add_attribute(&self, table: &str, attr: &Attribute) -> Result<TablePlan> {
        validate_identifier(table)?;
        if attr.is_virtual() {
            return Err(AdapterError::Schema(format!(
                "Attribute '{}' is a collection association and has no column",
                attr.name
            )));
        }
        let mut plan = TablePlan::new(table, TablePlanKind::Alter);
        self.push_column(&mut plan, attr)?;
        if let Some(reference) = &attr.foreign_key {
            plan.operations.push(TableOperation::ForeignKey {
                column: attr.name.clone(),
                reference: reference.clone(),
            });
        }
        Ok(plan)
    }

    /// Plans `ALTER TABLE ... DROP COLUMN`.
    pub fn compile_remove_attribute(&self, table: &str, attribute: &str) -> Result<TablePlan> {
        validate_identifier(table)?;
        validate_identifier(attribute)?;
        let mut plan = TablePlan::new(table, TablePlanKind::Alter);
        plan.operations.push(TableOperation::DropColumn(attribute.to_string()));
        Ok(plan)
    }

    /// Plans `DROP TABLE IF EXISTS ... CASCADE`.
    pub fn compile_drop_table(&self, table: &str) -> Result<TablePlan> {
        validate_identifier(table)?;
        Ok(TablePlan::new(table, TablePlanKind::Drop))
    }

    fn push_column(&self, plan: &mut TablePlan, attr: &Attribute) -> Result<()> {
        let mut column = self.mapper.map_type(attr)?;
        apply_constraints(&mut column, attr);

        if let Some(diagnostic) = column.diagnostic.take() {
            plan.diagnostics.push(diagnostic);
        }
        let index = column.index.then(|| IndexSpec {
            name: truncate_identifier(&format!("{}_{}_index", plan.table, column.name)),
            column: column.name.clone(),
        });
        plan.operations.push(TableOperation::AddColumn(column));
        if let Some(index) = index {
            plan.operations.push(TableOperation::CreateIndex(index));
        }
        Ok(())
    }
}
