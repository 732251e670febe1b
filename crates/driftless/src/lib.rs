//! Automatic schema reconciliation for SQLite-backed models.
//!
//! Models declare typed fields and indexes. On first use of the
//! [`Database`](coordinator::Database) handle, `driftless` compares every
//! model with its live table and brings the table in line: missing tables
//! are created, and field additions, removals, renames and type or
//! nullability changes become reversible migrations that are written to
//! disk and applied. Indexes are dropped and recreated directly.
//!
//! # Architecture
//!
//! - **Types** - logical field types and their storage counterparts
//! - **Differ** - classifies field differences and plans migrations
//! - **Writer** - persists timestamped JSON migration artifacts
//! - **Ledger** - records applied migration versions
//! - **Executor** - runs guarded migration steps through a dialect
//! - **Indexes** - drop-and-recreate index reconciliation
//! - **Coordinator** - the lazily reconciling database handle
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use driftless::prelude::*;
//!
//! # async fn run() -> driftless::error::Result<()> {
//! let registry = Arc::new(ModelRegistry::new());
//! registry.register(
//!     ModelSpec::new("users")
//!         .field("name", [LogicalType::String])
//!         .field("age", [LogicalType::Integer, LogicalType::Nil])
//!         .index(["name"]),
//! );
//!
//! let db = Database::new(DatabaseConfig::new("sqlite:app.db"), registry);
//! let pool = db.pool().await?; // reconciles on first access
//! # let _ = pool;
//! # Ok(())
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Show what reconciliation would change
//! driftless --models models.json plan
//!
//! # Reconcile the database with the models
//! driftless --models models.json reconcile
//!
//! # Roll back the last generated migration
//! driftless rollback --count 1
//! ```

pub mod config;
pub mod coordinator;
pub mod dialect;
pub mod differ;
pub mod error;
pub mod executor;
pub mod indexes;
pub mod introspect;
pub mod ledger;
pub mod model;
pub mod operations;
pub mod schema;
pub mod table;
pub mod types;
pub mod writer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::DatabaseConfig;
    pub use crate::coordinator::{Database, ReconcileReport};
    pub use crate::dialect::{MigrationDialect, SqliteDialect};
    pub use crate::differ::{plan_fields, FieldChange, FieldPlan};
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{Direction, MigrationExecutor};
    pub use crate::indexes::IndexReport;
    pub use crate::introspect::SqliteIntrospector;
    pub use crate::ledger::MigrationLedger;
    pub use crate::model::{ModelEvent, ModelRegistry, ModelSpec};
    pub use crate::operations::{ColumnChange, Guard, MigrationOperation, Step};
    pub use crate::schema::{ColumnDef, ColumnSpec, DefaultValue, FieldSpec, IndexSpec};
    pub use crate::table::{TableOutcome, TableReconciler};
    pub use crate::types::{FieldOptions, LogicalType, StorageOptions, StorageType};
    pub use crate::writer::{MigrationArtifact, MigrationWriter};
}
