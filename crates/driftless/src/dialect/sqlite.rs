//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support, so column changes use the
//! "table recreation" strategy: create a new table, copy data, drop the
//! old table, rename the new table.

use crate::operations::MigrationOperation;
use crate::schema::{ColumnDef, DefaultValue, IndexSpec};
use crate::types::{StorageOptions, StorageType};

use super::{default_clause, MigrationDialect};

/// SQLite migration dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn create_table_sql(&self, name: &str, columns: &[ColumnDef]) -> String {
        let col_defs: Vec<String> = columns.iter().map(|c| self.column_definition(c)).collect();
        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(name),
            col_defs.join(",\n  ")
        )
    }

    fn add_column_sql(&self, table: &str, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column)
        )
    }

    /// Requires SQLite 3.35.0+.
    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// Requires SQLite 3.25.0+.
    fn rename_column_sql(&self, table: &str, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    fn create_index_sql(&self, table: &str, index: &IndexSpec) -> String {
        let quoted: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(table),
            quoted.join(", ")
        )
    }

    fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name))
    }

    /// Value used for a NOT NULL column that has nothing to copy from.
    fn fill_value(column: &ColumnDef) -> String {
        if let Some(ref default) = column.options.default {
            return default_clause(default);
        }
        match column.storage_type {
            StorageType::String | StorageType::Json => "''".to_string(),
            StorageType::Integer
            | StorageType::Boolean
            | StorageType::Float
            | StorageType::Numeric => "0".to_string(),
            StorageType::DateTime => "'1970-01-01 00:00:00'".to_string(),
        }
    }

    fn shadow_name(table: &str) -> String {
        format!("_driftless_{table}_rebuild")
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn generate_sql(&self, operation: &MigrationOperation) -> Vec<String> {
        match operation {
            MigrationOperation::CreateTable { name, columns } => {
                vec![self.create_table_sql(name, columns)]
            }

            MigrationOperation::AddColumn { table, column } => {
                vec![self.add_column_sql(table, column)]
            }

            MigrationOperation::DropColumn { table, column } => {
                vec![self.drop_column_sql(table, column)]
            }

            MigrationOperation::RenameColumn {
                table,
                old_name,
                new_name,
            } => vec![self.rename_column_sql(table, old_name, new_name)],

            MigrationOperation::AlterColumn { table, column, .. } => {
                // Needs the live table definition; see `rebuild_table_sql`.
                vec![format!(
                    "-- ALTER COLUMN not directly supported in SQLite. \
                     Table recreation required for: {table}.{column}"
                )]
            }

            MigrationOperation::CreateIndex { table, index } => {
                vec![self.create_index_sql(table, index)]
            }

            MigrationOperation::DropIndex { name, .. } => vec![self.drop_index_sql(name)],
        }
    }

    fn type_name(&self, storage_type: StorageType, options: &StorageOptions) -> String {
        match storage_type {
            StorageType::String => match options.size {
                Some(size) if !options.text => format!("varchar({size})"),
                _ => "text".to_string(),
            },
            StorageType::Integer => "integer".to_string(),
            StorageType::Float => "double precision".to_string(),
            StorageType::Numeric => "numeric".to_string(),
            StorageType::Boolean => "boolean".to_string(),
            StorageType::DateTime => "timestamp".to_string(),
            StorageType::Json => "text".to_string(),
        }
    }

    fn parse_type(&self, declared: &str) -> (Option<StorageType>, Option<u32>) {
        let lower = declared.trim().to_ascii_lowercase();
        let (base, size) = match lower.split_once('(') {
            Some((base, rest)) => {
                let inner = rest.trim_end_matches(')');
                let first = inner.split(',').next().unwrap_or("").trim();
                (base.trim().to_string(), first.parse::<u32>().ok())
            }
            None => (lower, None),
        };

        let storage_type = match base.as_str() {
            "text" | "clob" => return (Some(StorageType::String), None),
            "varchar" | "character varying" | "char" | "character" | "nvarchar" | "nchar" => {
                return (Some(StorageType::String), size);
            }
            "integer" | "int" | "bigint" | "smallint" | "tinyint" | "int2" | "int4"
            | "int8" => StorageType::Integer,
            "double precision" | "double" | "real" | "float" | "float4" | "float8" => {
                StorageType::Float
            }
            "numeric" | "decimal" => StorageType::Numeric,
            "boolean" | "bool" => StorageType::Boolean,
            "timestamp" | "datetime" | "timestamp without time zone"
            | "timestamp with time zone" | "timestamptz" => StorageType::DateTime,
            "json" | "jsonb" => StorageType::Json,
            _ => return (None, None),
        };
        (Some(storage_type), None)
    }

    fn supports_alter_column(&self) -> bool {
        false
    }

    fn add_column_needs_rebuild(&self, column: &ColumnDef) -> bool {
        // ADD COLUMN rejects NOT NULL without a default and non-constant defaults.
        let non_constant = matches!(column.options.default, Some(DefaultValue::Expression(_)));
        non_constant || (!column.options.allow_null && column.options.default.is_none())
    }

    fn rebuild_table_sql(
        &self,
        table: &str,
        columns: &[ColumnDef],
        shared: &[String],
        indexes: &[IndexSpec],
    ) -> Vec<String> {
        let shadow = Self::shadow_name(table);
        let mut targets = Vec::new();
        let mut sources = Vec::new();

        for column in columns {
            let quoted = self.quote_identifier(&column.name);
            if shared.contains(&column.name) {
                if column.options.allow_null {
                    sources.push(quoted.clone());
                } else {
                    sources.push(format!("COALESCE({quoted}, {})", Self::fill_value(column)));
                }
                targets.push(quoted);
            } else if !column.options.allow_null && column.options.default.is_none() {
                sources.push(Self::fill_value(column));
                targets.push(quoted);
            }
        }

        let mut statements = vec![
            format!("DROP TABLE IF EXISTS {}", self.quote_identifier(&shadow)),
            self.create_table_sql(&shadow, columns),
        ];
        if !targets.is_empty() {
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(&shadow),
                targets.join(", "),
                sources.join(", "),
                self.quote_identifier(table)
            ));
        }
        statements.push(format!("DROP TABLE {}", self.quote_identifier(table)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(&shadow),
            self.quote_identifier(table)
        ));
        for index in indexes {
            statements.push(self.create_index_sql(table, index));
        }
        statements
    }
}
