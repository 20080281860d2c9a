//! Data-access core: change detection, statement building, execution and migrations.
//!
//! Layout:
//! - `dialect.rs`: backend facts and error classification
//! - `change.rs`: field-level diff producing a `Changeset`
//! - `statement.rs`: INSERT/UPDATE rendering and named-parameter expansion
//! - `executor.rs` / `database.rs`: the `Queryable` surface over a pool or a transaction
//! - `migrate.rs`: per-dialect migration files and the tracking table
//! - `validate.rs`: field rules and constraint-violation mapping
//! - `models.rs`: record definitions

pub mod change;
pub mod database;
pub mod dialect;
pub mod executor;
pub mod migrate;
pub mod models;
pub mod statement;
pub mod validate;

pub use change::{Change, Changeset, DiffMode, diff};
pub use database::{Database, Tx};
pub use dialect::{ConstraintRef, Dialect, ErrorClass};
pub use executor::{Context, InsertResult, Params, QueryResult, Queryable, params};
pub use migrate::{
    MIGRATION_TABLE, MigrationRecord, MigrationReport, MigrationState, Migrator, drop_db,
    install_db,
};
pub use statement::{build_insert, build_update, expand_named, split_statements};
pub use validate::{FieldErrors, Validator};
