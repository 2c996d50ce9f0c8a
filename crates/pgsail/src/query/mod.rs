//! Criteria compilation.
//!
//! Turns [`Criteria`] into parameterized PostgreSQL.
//!
//! # Examples
//!
//! ## SELECT
//!
//! ```ignore
//! use pgsail::query::{Criteria, CriteriaCompiler, SortDirection, WhereParser};
//! use pgsail::{Schema, SqlValue};
//!
//! let schema = Schema::new();
//! let compiler = CriteriaCompiler::new(&schema, &WhereParser);
//! let criteria = Criteria::new()
//!     .where_eq("name", SqlValue::String("Alice".to_string()))
//!     .sort("name", SortDirection::Asc)
//!     .limit(10)
//!     .skip(5);
//!
//! let query = compiler.compile("users", &criteria)?;
//! // SELECT * FROM "users" WHERE "users"."name" = $1 ORDER BY "users"."name" LIMIT $2 OFFSET $3
//! ```
//!
//! ## Associations
//!
//! ```ignore
//! let criteria = Criteria::new().join(
//!     JoinSpec::new("users", "id", "posts", "user_id", "posts")
//!         .criteria(Criteria::new().sort("id", SortDirection::Asc).limit(2)),
//! );
//! let query = compiler.compile("users", &criteria)?;
//! // SELECT "users".*, array_to_json(...) AS "posts" FROM "users" LEFT JOIN LATERAL (...) ...
//! ```

pub mod helpers;
mod compiler;
mod criteria;
mod join;
mod modify;
mod parser;
mod types;


pub use compiler::CriteriaCompiler;
pub use criteria::{Criteria, JoinSpec, Predicate, SortSpec};
pub use join::{AggregateWindow, JoinPlanner};
pub use parser::{CriteriaParser, ParsedCriteria, WhereParser};
pub use types::{preprocess_value, CompiledQuery, Operator, SortDirection};
