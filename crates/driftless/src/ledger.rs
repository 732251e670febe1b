//! Applied-migration ledger.
//!
//! This module manages the `migration_versions` table that records which
//! migration versions have been applied to the database.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::error::Result;

/// Name of the version-tracking table.
pub const LEDGER_TABLE: &str = "migration_versions";

/// SQL to create the version-tracking table.
pub const CREATE_LEDGER_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS migration_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

/// A record of an applied migration version.
#[derive(Debug, Clone)]
pub struct AppliedVersion {
    /// Migration version.
    pub version: i64,
    /// Migration name.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Manages the applied versions in the database.
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    pool: SqlitePool,
}

impl MigrationLedger {
    /// Creates a new ledger.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensures the version-tracking table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(CREATE_LEDGER_TABLE_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a version as applied. Recording it twice is a no-op.
    pub async fn add_version(&self, version: i64, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO migration_versions (version, name) VALUES (?, ?)")
            .bind(version)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a version record. Returns whether a record existed.
    pub async fn remove_version(&self, version: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM migration_versions WHERE version = ?")
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Checks if a version has been applied.
    pub async fn has_version(&self, version: i64) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM migration_versions WHERE version = ?")
                .bind(version)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// All applied versions in ascending order.
    pub async fn all_versions(&self) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT version FROM migration_versions ORDER BY version")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// All applied versions with their names and timestamps.
    pub async fn applied(&self) -> Result<Vec<AppliedVersion>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT version, name, applied_at FROM migration_versions ORDER BY version",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(version, name, applied_at)| AppliedVersion {
                version,
                name,
                applied_at: parse_timestamp(&applied_at),
            })
            .collect())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // SQLite datetime format fallback
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
