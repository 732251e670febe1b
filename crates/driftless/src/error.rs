//! Error types for schema reconciliation.

use std::path::PathBuf;

use crate::executor::Direction;
use crate::types::LogicalType;

/// Errors that can occur while reconciling models with the database.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A column's storage type has no logical counterpart.
    #[error("Could not match database type '{db_type}' for column '{column}': {dump}")]
    TypeMapping {
        /// Column name.
        column: String,
        /// Declared type reported by the engine.
        db_type: String,
        /// Debug dump of the introspected column.
        dump: String,
    },

    /// A field declares more than one concrete logical type.
    #[error("Only a single type (plus an optional nil marker) is supported per field, got {types:?}")]
    MultiType {
        /// The declared type set.
        types: Vec<LogicalType>,
    },

    /// The table has orphaned columns and new fields that cannot be paired up.
    #[error(
        "Could not auto migrate table '{table}': orphaned columns {orphans:?}, new fields {new_fields:?}"
    )]
    UnreconcilableTable {
        /// Table name.
        table: String,
        /// Columns without a declared field.
        orphans: Vec<String>,
        /// Declared fields without a column.
        new_fields: Vec<String>,
    },

    /// A generated migration failed against the live engine.
    #[error("Migration {version}_{name} failed ({direction}): {source}")]
    MigrationExecution {
        /// Migration name.
        name: String,
        /// Migration version.
        version: i64,
        /// Direction being executed.
        direction: Direction,
        /// Underlying failure.
        #[source]
        source: Box<MigrateError>,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a migration or model file.
    #[error("Failed to parse '{path}': {message}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Migration file already exists.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// A recorded version has no artifact on disk.
    #[error("Migration not found for version {0}")]
    MigrationNotFound(i64),

    /// The table targeted by an operation does not exist.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The column targeted by an operation does not exist.
    #[error("Column not found: {table}.{column}")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
