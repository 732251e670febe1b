//! Live schema introspection for SQLite.
//!
//! Reads tables, columns and indexes through the table-valued pragma
//! functions so every table name is a bound parameter.

use sqlx::sqlite::SqlitePool;

use crate::dialect::{MigrationDialect, SqliteDialect};
use crate::error::Result;
use crate::schema::{ColumnSpec, DefaultValue, IndexSpec};

/// Reads the live schema of a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteIntrospector {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

impl SqliteIntrospector {
    /// Creates an introspector over a pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
        }
    }

    /// Names of all user tables, in name order.
    pub async fn tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Whether a table exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Columns of a table in declaration order. A missing table has none.
    pub async fn schema(&self, table: &str) -> Result<Vec<ColumnSpec>> {
        let rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, db_type, not_null, default, pk)| {
                let (storage_type, max_length) = self.dialect.parse_type(&db_type);
                ColumnSpec {
                    name,
                    db_type,
                    storage_type,
                    allow_null: not_null == 0,
                    max_length,
                    default: default.as_deref().and_then(DefaultValue::from_sql),
                    primary_key: pk > 0,
                }
            })
            .collect())
    }

    /// Whether a column exists on a table.
    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM pragma_table_info(?) WHERE name = ?")
                .bind(table)
                .bind(column)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Indexes created with `CREATE INDEX` on a table.
    ///
    /// Automatic indexes backing primary keys and UNIQUE constraints are
    /// not reported.
    pub async fn indexes(&self, table: &str) -> Result<Vec<IndexSpec>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT name, \"unique\" FROM pragma_index_list(?) WHERE origin = 'c' ORDER BY name",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for (name, unique) in rows {
            let columns: Vec<(Option<String>,)> =
                sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&name)
                    .fetch_all(&self.pool)
                    .await?;
            indexes.push(IndexSpec {
                name,
                columns: columns.into_iter().filter_map(|(c,)| c).collect(),
                unique: unique != 0,
            });
        }
        Ok(indexes)
    }
}
