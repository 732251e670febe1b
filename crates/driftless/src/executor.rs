//! Migration executor.
//!
//! This module handles applying and rolling back migration artifacts
//! against a database and recording them in the ledger.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

use crate::dialect::{MigrationDialect, SqliteDialect};
use crate::error::{MigrateError, Result};
use crate::introspect::SqliteIntrospector;
use crate::ledger::MigrationLedger;
use crate::operations::{MigrationOperation, Step};
use crate::schema::ColumnDef;
use crate::writer::{MigrationArtifact, MigrationWriter};

/// Direction a migration is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Apply.
    Up,
    /// Roll back.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Executes migrations against a database.
pub struct MigrationExecutor<D: MigrationDialect = SqliteDialect> {
    pool: SqlitePool,
    dialect: D,
    ledger: MigrationLedger,
    introspector: SqliteIntrospector,
    dry_run: bool,
}

impl<D: MigrationDialect> MigrationExecutor<D> {
    /// Creates a new migration executor.
    pub fn new(pool: SqlitePool, dialect: D) -> Self {
        let ledger = MigrationLedger::new(pool.clone());
        let introspector = SqliteIntrospector::new(pool.clone());
        Self {
            pool,
            dialect,
            ledger,
            introspector,
            dry_run: false,
        }
    }

    /// Enables dry-run mode (SQL is logged but not executed).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Ensures the ledger table exists.
    pub async fn init(&self) -> Result<()> {
        if !self.dry_run {
            self.ledger.ensure_table().await?;
        }
        Ok(())
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Returns the schema introspector.
    #[must_use]
    pub fn introspector(&self) -> &SqliteIntrospector {
        &self.introspector
    }

    /// Executes one direction of a migration and updates the ledger.
    ///
    /// Returns `false` when there was nothing to do: applying a recorded
    /// version, or rolling back one that is not recorded. Failures leave
    /// the ledger untouched.
    pub async fn apply(&self, migration: &MigrationArtifact, direction: Direction) -> Result<bool> {
        let recorded = self.ledger.has_version(migration.version).await?;
        match direction {
            Direction::Up if recorded => {
                warn!(
                    version = migration.version,
                    name = %migration.name,
                    "Migration already applied, skipping"
                );
                return Ok(false);
            }
            Direction::Down if !recorded => {
                warn!(
                    version = migration.version,
                    name = %migration.name,
                    "Migration not applied, skipping rollback"
                );
                return Ok(false);
            }
            _ => {}
        }

        info!(
            version = migration.version,
            name = %migration.name,
            %direction,
            "Running migration"
        );

        let steps = match direction {
            Direction::Up => &migration.up,
            Direction::Down => &migration.down,
        };

        for step in steps {
            self.execute_step(step)
                .await
                .map_err(|source| MigrateError::MigrationExecution {
                    name: migration.name.clone(),
                    version: migration.version,
                    direction,
                    source: Box::new(source),
                })?;
        }

        if !self.dry_run {
            match direction {
                Direction::Up => {
                    self.ledger
                        .add_version(migration.version, &migration.name)
                        .await?;
                }
                Direction::Down => {
                    self.ledger.remove_version(migration.version).await?;
                }
            }
        }

        info!(
            version = migration.version,
            name = %migration.name,
            %direction,
            "Migration finished"
        );
        Ok(true)
    }

    /// Applies every migration that is not yet recorded, in order.
    ///
    /// Returns the versions that were applied.
    pub async fn run_pending(&self, migrations: &[MigrationArtifact]) -> Result<Vec<i64>> {
        self.init().await?;
        let mut applied = Vec::new();
        for migration in migrations {
            if self.apply(migration, Direction::Up).await? {
                applied.push(migration.version);
            }
        }
        Ok(applied)
    }

    /// Migrations from `migrations` that are not yet recorded.
    pub async fn pending<'a>(
        &self,
        migrations: &'a [MigrationArtifact],
    ) -> Result<Vec<&'a MigrationArtifact>> {
        let applied = self.ledger.all_versions().await?;
        Ok(migrations
            .iter()
            .filter(|m| applied.binary_search(&m.version).is_err())
            .collect())
    }

    /// Rolls back the `count` most recently applied migrations, newest
    /// first, reading their artifacts from the writer's directory.
    pub async fn rollback(&self, count: usize, writer: &MigrationWriter) -> Result<Vec<i64>> {
        let versions = self.ledger.all_versions().await?;
        let mut rolled_back = Vec::new();
        for version in versions.into_iter().rev().take(count) {
            let artifact = writer.find(version)?;
            if self.apply(&artifact, Direction::Down).await? {
                rolled_back.push(version);
            }
        }
        Ok(rolled_back)
    }

    /// Executes a step if its guard holds. Returns whether it ran.
    pub async fn execute_step(&self, step: &Step) -> Result<bool> {
        if let Some(ref guard) = step.when {
            let present = self
                .introspector
                .has_column(guard.table(), guard.column())
                .await?;
            if !guard.holds(present) {
                warn!(
                    table = %guard.table(),
                    column = %guard.column(),
                    operation = %step.operation.description(),
                    "Guard not satisfied, skipping step"
                );
                return Ok(false);
            }
        }
        self.execute_operation(&step.operation).await?;
        Ok(true)
    }

    /// Executes an operation directly, without touching the ledger.
    pub async fn execute_operation(&self, operation: &MigrationOperation) -> Result<()> {
        let statements = self.sql_for(operation).await?;
        self.execute_sql(&statements).await
    }

    /// SQL statements an operation would run against the current schema.
    pub async fn sql_for(&self, operation: &MigrationOperation) -> Result<Vec<String>> {
        match operation {
            MigrationOperation::AlterColumn {
                table,
                column,
                change,
            } if !self.dialect.supports_alter_column() => {
                self.rebuild_sql(table, |defs| {
                    let def = defs.iter_mut().find(|d| d.name == *column).ok_or_else(|| {
                        MigrateError::ColumnNotFound {
                            table: table.clone(),
                            column: column.clone(),
                        }
                    })?;
                    change.apply_to(def);
                    Ok(())
                })
                .await
            }

            MigrationOperation::AddColumn { table, column }
                if self.dialect.add_column_needs_rebuild(column) =>
            {
                self.rebuild_sql(table, |defs| {
                    defs.push(column.clone());
                    Ok(())
                })
                .await
            }

            MigrationOperation::DropColumn { table, column } => {
                let mut statements = Vec::new();
                for index in self.introspector.indexes(table).await? {
                    if index.columns.contains(column) {
                        statements.extend(
                            self.dialect
                                .generate_sql(&MigrationOperation::drop_index(table, &index.name)),
                        );
                    }
                }
                statements.extend(self.dialect.generate_sql(operation));
                Ok(statements)
            }

            _ => Ok(self.dialect.generate_sql(operation)),
        }
    }

    async fn rebuild_sql<F>(&self, table: &str, edit: F) -> Result<Vec<String>>
    where
        F: FnOnce(&mut Vec<ColumnDef>) -> Result<()>,
    {
        let columns = self.introspector.schema(table).await?;
        if columns.is_empty() {
            return Err(MigrateError::TableNotFound(table.to_string()));
        }

        let shared: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let mut defs = columns
            .iter()
            .map(ColumnDef::from_column)
            .collect::<Result<Vec<_>>>()?;
        edit(&mut defs)?;

        let indexes = self.introspector.indexes(table).await?;
        debug!(table = %table, "Rebuilding table");
        Ok(self
            .dialect
            .rebuild_table_sql(table, &defs, &shared, &indexes))
    }

    async fn execute_sql(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            if sql.starts_with("--") {
                warn!(comment = %sql, "Skipping comment (unsupported operation)");
                continue;
            }
            if self.dry_run {
                info!(sql = %sql, "Dry run");
                continue;
            }
            debug!(sql = %sql, "Executing SQL");
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::ColumnChange;
    use crate::schema::{DefaultValue, IndexSpec};
    use crate::types::{StorageOptions, StorageType};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn executor_with_users() -> MigrationExecutor {
        let pool = create_test_pool().await;
        let executor = MigrationExecutor::new(pool, SqliteDialect::new());
        executor.init().await.unwrap();
        executor
            .execute_operation(&MigrationOperation::create_table(
                "users",
                vec![
                    ColumnDef::identity(),
                    ColumnDef::overflow(),
                    ColumnDef::new(
                        "name",
                        StorageType::String,
                        StorageOptions {
                            allow_null: true,
                            text: true,
                            ..StorageOptions::default()
                        },
                    ),
                ],
            ))
            .await
            .unwrap();
        executor
    }

    async fn insert_user(executor: &MigrationExecutor, id: &str, name: Option<&str>) {
        sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&executor.pool)
            .await
            .unwrap();
    }

    fn rename_migration(version: i64) -> MigrationArtifact {
        MigrationArtifact {
            version,
            name: "rename_users_name_to_full_name".to_string(),
            up: vec![Step::if_column_exists(
                MigrationOperation::rename_column("users", "name", "full_name"),
                "name",
            )],
            down: vec![Step::new(MigrationOperation::rename_column(
                "users",
                "full_name",
                "name",
            ))],
        }
    }

    async fn column_names(executor: &MigrationExecutor, table: &str) -> Vec<String> {
        executor
            .introspector()
            .schema(table)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[tokio::test]
    async fn test_apply_and_rollback() {
        let executor = executor_with_users().await;
        let migration = rename_migration(100);

        assert!(executor.apply(&migration, Direction::Up).await.unwrap());
        assert_eq!(column_names(&executor, "users").await, ["id", "extra", "full_name"]);
        assert!(executor.ledger().has_version(100).await.unwrap());

        assert!(executor.apply(&migration, Direction::Down).await.unwrap());
        assert_eq!(column_names(&executor, "users").await, ["id", "extra", "name"]);
        assert!(!executor.ledger().has_version(100).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_idempotent() {
        let executor = executor_with_users().await;
        let migration = rename_migration(100);

        assert!(executor.apply(&migration, Direction::Up).await.unwrap());
        assert!(!executor.apply(&migration, Direction::Up).await.unwrap());
        assert_eq!(executor.ledger().all_versions().await.unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn test_unsatisfied_guard_skips_step() {
        let executor = executor_with_users().await;
        let step = Step::if_column_exists(
            MigrationOperation::drop_column("users", "nickname"),
            "nickname",
        );
        assert!(!executor.execute_step(&step).await.unwrap());

        let step = Step::if_column_missing(
            MigrationOperation::add_column(
                "ghosts",
                ColumnDef::new("x", StorageType::Integer, StorageOptions::default()),
            ),
            "x",
        );
        // The table does not exist, so the column counts as missing.
        let err = executor.execute_step(&step).await.unwrap_err();
        assert!(matches!(err, MigrateError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_migration_leaves_ledger_unchanged() {
        let executor = executor_with_users().await;
        let migration = MigrationArtifact {
            version: 7,
            name: "drop_missing".to_string(),
            up: vec![Step::new(MigrationOperation::drop_column("users", "nope"))],
            down: vec![],
        };

        let err = executor.apply(&migration, Direction::Up).await.unwrap_err();
        match err {
            MigrateError::MigrationExecution {
                version, direction, ..
            } => {
                assert_eq!(version, 7);
                assert_eq!(direction, Direction::Up);
            }
            other => panic!("Expected MigrationExecution, got {other:?}"),
        }
        assert!(!executor.ledger().has_version(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_alter_column_rebuilds_table() {
        let executor = executor_with_users().await;
        insert_user(&executor, "u1", Some("Ada")).await;
        insert_user(&executor, "u2", None).await;
        executor
            .execute_operation(&MigrationOperation::create_index(
                "users",
                IndexSpec::new("users_name_index", vec!["name".to_string()]),
            ))
            .await
            .unwrap();

        executor
            .execute_operation(&MigrationOperation::alter_column(
                "users",
                "name",
                ColumnChange::SetNullable { allow_null: false },
            ))
            .await
            .unwrap();

        let cols = executor.introspector().schema("users").await.unwrap();
        let name = cols.iter().find(|c| c.name == "name").unwrap();
        assert!(!name.allow_null);

        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, name FROM users ORDER BY id")
            .fetch_all(&executor.pool)
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("u1".to_string(), "Ada".to_string()),
                ("u2".to_string(), String::new())
            ]
        );

        let indexes = executor.introspector().indexes("users").await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "users_name_index");
    }

    #[tokio::test]
    async fn test_add_not_null_column_without_default() {
        let executor = executor_with_users().await;
        insert_user(&executor, "u1", Some("Ada")).await;

        executor
            .execute_operation(&MigrationOperation::add_column(
                "users",
                ColumnDef::new("age", StorageType::Integer, StorageOptions::default()),
            ))
            .await
            .unwrap();

        let row: (i64,) = sqlx::query_as("SELECT age FROM users WHERE id = 'u1'")
            .fetch_one(&executor.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_add_column_with_default_uses_alter() {
        let executor = executor_with_users().await;
        let op = MigrationOperation::add_column(
            "users",
            ColumnDef::new(
                "active",
                StorageType::Boolean,
                StorageOptions {
                    default: Some(DefaultValue::Bool(true)),
                    ..StorageOptions::default()
                },
            ),
        );
        let sql = executor.sql_for(&op).await.unwrap();
        assert_eq!(sql.len(), 1);
        assert!(sql[0].starts_with("ALTER TABLE \"users\" ADD COLUMN"));
    }

    #[tokio::test]
    async fn test_drop_indexed_column() {
        let executor = executor_with_users().await;
        executor
            .execute_operation(&MigrationOperation::create_index(
                "users",
                IndexSpec::new("users_name_index", vec!["name".to_string()]),
            ))
            .await
            .unwrap();

        executor
            .execute_operation(&MigrationOperation::drop_column("users", "name"))
            .await
            .unwrap();

        assert_eq!(column_names(&executor, "users").await, ["id", "extra"]);
        assert!(executor.introspector().indexes("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_pending_and_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MigrationWriter::new(dir.path());
        let executor = executor_with_users().await;

        let first = writer
            .create(
                "rename_users_name_to_full_name",
                rename_migration(0).up,
                rename_migration(0).down,
            )
            .unwrap();
        let artifacts = writer.list().unwrap();
        assert_eq!(executor.pending(&artifacts).await.unwrap().len(), 1);

        let applied = executor.run_pending(&artifacts).await.unwrap();
        assert_eq!(applied, vec![first.version]);
        assert!(executor.run_pending(&artifacts).await.unwrap().is_empty());

        let rolled_back = executor.rollback(1, &writer).await.unwrap();
        assert_eq!(rolled_back, vec![first.version]);
        assert_eq!(column_names(&executor, "users").await, ["id", "extra", "name"]);
    }

    #[tokio::test]
    async fn test_dry_run() {
        let pool = create_test_pool().await;
        let executor = MigrationExecutor::new(pool.clone(), SqliteDialect::new()).dry_run(true);

        executor
            .execute_operation(&MigrationOperation::create_table(
                "users",
                vec![ColumnDef::identity()],
            ))
            .await
            .unwrap();

        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='users'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
    }
}
