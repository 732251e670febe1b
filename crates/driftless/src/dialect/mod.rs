//! Database dialect implementations.
//!
//! A dialect renders migration operations as SQL and parses the declared
//! column types the engine reports back during introspection.

mod sqlite;

pub use sqlite::SqliteDialect;

use crate::operations::MigrationOperation;
use crate::schema::{ColumnDef, DefaultValue, IndexSpec};
use crate::types::{StorageOptions, StorageType};

/// Trait for database-specific SQL generation.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Generates SQL for a migration operation.
    fn generate_sql(&self, operation: &MigrationOperation) -> Vec<String>;

    /// Returns the declared type name for a storage type.
    fn type_name(&self, storage_type: StorageType, options: &StorageOptions) -> String;

    /// Parses a declared type back into a storage type and bounded size.
    ///
    /// Unknown declarations yield `None` for the storage type.
    fn parse_type(&self, declared: &str) -> (Option<StorageType>, Option<u32>);

    /// Returns whether this dialect supports ALTER COLUMN.
    fn supports_alter_column(&self) -> bool;

    /// Returns whether adding this column requires rebuilding the table.
    fn add_column_needs_rebuild(&self, column: &ColumnDef) -> bool;

    /// Statements that rebuild `table` with a new set of column definitions.
    ///
    /// `shared` lists the columns whose data is copied over. The table's
    /// `indexes` are recreated afterwards.
    fn rebuild_table_sql(
        &self,
        table: &str,
        columns: &[ColumnDef],
        shared: &[String],
        indexes: &[IndexSpec],
    ) -> Vec<String>;

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnDef) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(column.storage_type, &column.options),
        ];

        if column.primary_key {
            parts.push("PRIMARY KEY".to_string());
        }

        if !column.options.allow_null {
            parts.push("NOT NULL".to_string());
        }

        if let Some(ref default) = column.options.default {
            parts.push(format!("DEFAULT {}", default_clause(default)));
        }

        parts.join(" ")
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Expression defaults must be parenthesized in a column definition.
pub(crate) fn default_clause(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Expression(expr)
            if !expr.starts_with('(') && !is_keyword_default(expr) =>
        {
            format!("({expr})")
        }
        other => other.to_sql(),
    }
}

fn is_keyword_default(expr: &str) -> bool {
    ["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"]
        .iter()
        .any(|k| expr.eq_ignore_ascii_case(k))
}
