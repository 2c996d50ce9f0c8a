//! Schema description and DDL compilation.
//!
//! Attributes describe fields independently of the database. The
//! [`TypeMapper`] turns each into a [`ColumnSpec`] and the
//! [`SchemaCompiler`] assembles a [`TablePlan`] of ordered DDL statements.

pub mod attribute;
pub mod compiler;
pub mod mapper;
pub mod model;

pub use attribute::{
    Association, Attribute, AttributeProperty, AttributeType, DefaultValue, ForeignKeyRef,
};
pub use compiler::{IndexSpec, SchemaCompiler, TableOperation, TablePlan, TablePlanKind};
pub use mapper::{
    apply_constraints, ColumnSpec, ColumnType, SchemaDiagnostic, TypeMapper, TypeMappingMode,
};
pub use model::{Schema, TableSchema, DEFAULT_PRIMARY_KEY};
