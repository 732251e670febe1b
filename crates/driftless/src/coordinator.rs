//! Reconciliation coordinator.
//!
//! [`Database`] owns the connection pool and runs a full reconciliation
//! pass on first access. The pass is one critical section: concurrent
//! callers wait for it and then see the reconciled state. Registry events
//! bump an invalidation epoch, so the next access runs another pass.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::dialect::{MigrationDialect, SqliteDialect};
use crate::error::{MigrateError, Result};
use crate::executor::MigrationExecutor;
use crate::ledger::MigrationLedger;
use crate::model::{ModelRegistry, Subscription};
use crate::table::{TableOutcome, TablePlan, TableReconciler};
use crate::writer::MigrationWriter;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Tables created because they were missing.
    pub created_tables: Vec<String>,
    /// Versions of pending migrations applied before diffing.
    pub pending_applied: Vec<i64>,
    /// Per-table outcomes in model order.
    pub tables: Vec<TableOutcome>,
    /// The pass ran under [`Database::skip_reconcile`] and changed nothing.
    pub skipped: bool,
}

impl ReconcileReport {
    /// Names of all migrations written during the pass.
    #[must_use]
    pub fn migrations(&self) -> Vec<&str> {
        self.tables
            .iter()
            .flat_map(|t| match t {
                TableOutcome::Reconciled { migrations, .. } => {
                    migrations.iter().map(String::as_str).collect::<Vec<_>>()
                }
                TableOutcome::Unreconcilable { .. } => Vec::new(),
            })
            .collect()
    }

    /// Tables that need a manual migration.
    #[must_use]
    pub fn unreconcilable(&self) -> Vec<&TableOutcome> {
        self.tables
            .iter()
            .filter(|t| matches!(t, TableOutcome::Unreconcilable { .. }))
            .collect()
    }

    /// Turns the first unreconcilable table into an error.
    pub fn ensure_reconciled(&self) -> Result<()> {
        for outcome in &self.tables {
            if let TableOutcome::Unreconcilable {
                table,
                orphans,
                new_fields,
            } = outcome
            {
                return Err(MigrateError::UnreconcilableTable {
                    table: table.clone(),
                    orphans: orphans.clone(),
                    new_fields: new_fields.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Shared database handle.
pub struct Database {
    config: DatabaseConfig,
    registry: Arc<ModelRegistry>,
    writer: MigrationWriter,
    pool: OnceCell<SqlitePool>,
    pass: Mutex<()>,
    epoch: Arc<AtomicU64>,
    reconciled_epoch: AtomicU64,
    skip_depth: Arc<AtomicUsize>,
    subscription: parking_lot::Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("connected", &self.pool.initialized())
            .field("reconciled", &self.is_reconciled())
            .finish()
    }
}

impl Database {
    /// Creates a handle. Nothing connects until the pool is first used.
    pub fn new(config: DatabaseConfig, registry: Arc<ModelRegistry>) -> Self {
        let writer = MigrationWriter::new(config.migrations_dir.clone());
        Self {
            config,
            registry,
            writer,
            pool: OnceCell::new(),
            pass: Mutex::new(()),
            epoch: Arc::new(AtomicU64::new(1)),
            reconciled_epoch: AtomicU64::new(0),
            skip_depth: Arc::new(AtomicUsize::new(0)),
            subscription: parking_lot::Mutex::new(None),
        }
    }

    /// The handle's configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The model registry the handle reconciles.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The migration writer for the configured directory.
    #[must_use]
    pub fn writer(&self) -> &MigrationWriter {
        &self.writer
    }

    /// Whether the last pass is still current.
    #[must_use]
    pub fn is_reconciled(&self) -> bool {
        self.reconciled_epoch.load(Ordering::SeqCst) == self.epoch.load(Ordering::SeqCst)
    }

    /// The pool, reconciling first when auto reconciliation is enabled and
    /// the schema may be stale.
    pub async fn pool(&self) -> Result<&SqlitePool> {
        if self.config.auto_reconcile && !self.is_reconciled() {
            self.run_pass(false).await?;
        }
        self.raw_pool().await
    }

    /// The pool without reconciling. Connects if needed.
    pub async fn raw_pool(&self) -> Result<&SqlitePool> {
        self.pool.get_or_try_init(|| self.connect()).await
    }

    /// Runs a reconciliation pass now, even if the schema is current.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.run_pass(true).await
    }

    /// Marks the schema stale so the next access reconciles again.
    pub fn invalidate_reconcile(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Drops the registry listener and marks the schema stale.
    pub fn reset(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.remove();
        }
        self.invalidate_reconcile();
    }

    /// While the guard lives, passes mark themselves complete without
    /// touching the schema.
    #[must_use]
    pub fn skip_reconcile(&self) -> SkipReconcile {
        self.skip_depth.fetch_add(1, Ordering::SeqCst);
        SkipReconcile {
            depth: Arc::clone(&self.skip_depth),
        }
    }

    /// Drops every table, the ledger included, and marks the schema stale.
    pub async fn drop_all_tables(&self) -> Result<()> {
        let pool = self.raw_pool().await?;
        let executor = MigrationExecutor::new(pool.clone(), SqliteDialect::new());
        let dialect = executor.dialect();
        for table in executor.introspector().tables().await? {
            let sql = format!("DROP TABLE IF EXISTS {}", dialect.quote_identifier(&table));
            debug!(sql = %sql, "Executing SQL");
            sqlx::query(&sql).execute(pool).await?;
        }
        self.invalidate_reconcile();
        Ok(())
    }

    /// Plans every registered model without changing the schema.
    pub async fn plan(&self) -> Result<Vec<TablePlan>> {
        let pool = self.raw_pool().await?;
        let executor = MigrationExecutor::new(pool.clone(), SqliteDialect::new());
        let tables = TableReconciler::new(&executor, &self.writer);
        let mut plans = Vec::new();
        for model in self.registry.models() {
            plans.push(tables.plan(&model).await?);
        }
        Ok(plans)
    }

    /// The ledger of the connected database.
    pub async fn ledger(&self) -> Result<MigrationLedger> {
        let ledger = MigrationLedger::new(self.raw_pool().await?.clone());
        ledger.ensure_table().await?;
        Ok(ledger)
    }

    async fn connect(&self) -> Result<SqlitePool> {
        if let Some(parent) = self.config.database_path().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&self.config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect_with(options)
            .await?;
        info!(url = %self.config.url, "Connected to database");
        Ok(pool)
    }

    /// Replaces the registry listener with a fresh one.
    fn resubscribe(&self) {
        let epoch = Arc::clone(&self.epoch);
        let subscription = self.registry.subscribe(move |event| {
            debug!(?event, "Model change, invalidating reconciliation");
            epoch.fetch_add(1, Ordering::SeqCst);
        });
        if let Some(old) = self.subscription.lock().replace(subscription) {
            old.remove();
        }
    }

    async fn run_pass(&self, force: bool) -> Result<ReconcileReport> {
        let _pass = self.pass.lock().await;
        if !force && self.is_reconciled() {
            return Ok(ReconcileReport::default());
        }

        let started = self.epoch.load(Ordering::SeqCst);
        self.resubscribe();

        if self.skip_depth.load(Ordering::SeqCst) > 0 {
            debug!("Reconciliation skipped");
            self.reconciled_epoch.store(started, Ordering::SeqCst);
            return Ok(ReconcileReport {
                skipped: true,
                ..ReconcileReport::default()
            });
        }

        let pool = self.raw_pool().await?;
        let executor = MigrationExecutor::new(pool.clone(), SqliteDialect::new());
        executor.init().await?;

        let models = self.registry.models();
        let tables = TableReconciler::new(&executor, &self.writer);
        let mut report = ReconcileReport::default();

        for model in &models {
            if tables.ensure_table(model).await? {
                report.created_tables.push(model.collection.clone());
            }
        }

        report.pending_applied = executor.run_pending(&self.writer.list()?).await?;

        for model in &models {
            let outcome = tables.run(model).await?;
            if let TableOutcome::Unreconcilable {
                table,
                orphans,
                new_fields,
            } = &outcome
            {
                warn!(
                    table = %table,
                    ?orphans,
                    ?new_fields,
                    "Table left for manual migration"
                );
            }
            report.tables.push(outcome);
        }

        self.reconciled_epoch.store(started, Ordering::SeqCst);
        info!(
            models = models.len(),
            migrations = report.migrations().len(),
            "Reconciliation complete"
        );
        Ok(report)
    }
}

/// Guard returned by [`Database::skip_reconcile`].
#[derive(Debug)]
pub struct SkipReconcile {
    depth: Arc<AtomicUsize>,
}

impl Drop for SkipReconcile {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelSpec;
    use crate::types::LogicalType;

    fn memory_db(dir: &std::path::Path) -> Database {
        let config = DatabaseConfig::new("sqlite::memory:")
            .migrations_dir(dir)
            .max_connections(1);
        Database::new(config, Arc::new(ModelRegistry::new()))
    }

    fn users() -> ModelSpec {
        ModelSpec::new("users").field("name", [LogicalType::String, LogicalType::Nil])
    }

    #[tokio::test]
    async fn test_first_access_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        let db = memory_db(dir.path());
        db.registry().register(users());
        assert!(!db.is_reconciled());

        let pool = db.pool().await.unwrap();
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='users'")
                .fetch_optional(pool)
                .await
                .unwrap();
        assert!(row.is_some());
        assert!(db.is_reconciled());
    }

    #[tokio::test]
    async fn test_registration_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let db = memory_db(dir.path());
        db.registry().register(users());
        db.pool().await.unwrap();
        assert!(db.is_reconciled());

        db.registry().register(ModelSpec::new("posts"));
        assert!(!db.is_reconciled());
        db.pool().await.unwrap();
        assert!(db.is_reconciled());
    }

    #[tokio::test]
    async fn test_single_listener_across_passes() {
        let dir = tempfile::tempdir().unwrap();
        let db = memory_db(dir.path());
        db.reconcile().await.unwrap();
        db.reconcile().await.unwrap();
        db.reconcile().await.unwrap();
        assert_eq!(db.registry().listener_count(), 1);

        db.reset();
        assert_eq!(db.registry().listener_count(), 0);
        assert!(!db.is_reconciled());
    }

    #[tokio::test]
    async fn test_skip_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let db = memory_db(dir.path());
        {
            let _skip = db.skip_reconcile();
            db.registry().register(users());
            let report = db.reconcile().await.unwrap();
            assert!(report.skipped);
        }
        assert!(db.is_reconciled());

        let executor = MigrationExecutor::new(db.raw_pool().await.unwrap().clone(), SqliteDialect::new());
        assert!(!executor.introspector().table_exists("users").await.unwrap());

        db.invalidate_reconcile();
        let report = db.reconcile().await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.created_tables, ["users"]);
    }

    #[tokio::test]
    async fn test_drop_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db = memory_db(dir.path());
        db.registry().register(users());
        db.pool().await.unwrap();

        db.drop_all_tables().await.unwrap();
        assert!(!db.is_reconciled());
        let executor = MigrationExecutor::new(db.raw_pool().await.unwrap().clone(), SqliteDialect::new());
        assert!(executor.introspector().tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_reconciled() {
        let report = ReconcileReport {
            tables: vec![TableOutcome::Unreconcilable {
                table: "users".to_string(),
                orphans: vec!["a".to_string(), "b".to_string()],
                new_fields: vec!["c".to_string(), "d".to_string()],
            }],
            ..ReconcileReport::default()
        };
        assert_eq!(report.unreconcilable().len(), 1);
        assert!(matches!(
            report.ensure_reconciled(),
            Err(MigrateError::UnreconcilableTable { .. })
        ));
        assert!(ReconcileReport::default().ensure_reconciled().is_ok());
    }
}
