//! Per-model table reconciliation.

use tracing::{info, warn};

use crate::dialect::MigrationDialect;
use crate::differ::{plan_fields, reconcile_fields, FieldPlan};
use crate::error::Result;
use crate::executor::MigrationExecutor;
use crate::indexes::{plan_indexes, reconcile_indexes, IndexReport};
use crate::model::ModelSpec;
use crate::operations::MigrationOperation;
use crate::schema::ColumnDef;
use crate::writer::MigrationWriter;

/// Outcome of reconciling one model's table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOutcome {
    /// Fields and indexes now match the model.
    Reconciled {
        /// Table name.
        table: String,
        /// Names of the migrations written and applied.
        migrations: Vec<String>,
        /// Index changes.
        indexes: IndexReport,
    },
    /// Ambiguous field changes; the table was left untouched.
    Unreconcilable {
        /// Table name.
        table: String,
        /// Orphaned columns.
        orphans: Vec<String>,
        /// New fields.
        new_fields: Vec<String>,
    },
}

impl TableOutcome {
    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Reconciled { table, .. } | Self::Unreconcilable { table, .. } => table,
        }
    }
}

/// What a pass would do to one table, without doing it.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    /// Table name.
    pub table: String,
    /// Whether the table would be created first.
    pub create_table: bool,
    /// Field plan.
    pub fields: FieldPlan,
    /// Index operations (empty when the fields are unreconcilable).
    pub indexes: Vec<MigrationOperation>,
}

/// Reconciles model tables through an executor and a migration writer.
pub struct TableReconciler<'a, D: MigrationDialect> {
    executor: &'a MigrationExecutor<D>,
    writer: &'a MigrationWriter,
}

impl<'a, D: MigrationDialect> TableReconciler<'a, D> {
    /// Creates a reconciler.
    pub fn new(executor: &'a MigrationExecutor<D>, writer: &'a MigrationWriter) -> Self {
        Self { executor, writer }
    }

    /// Creates the table with its identity and overflow columns if it is
    /// missing. Returns whether it was created.
    pub async fn ensure_table(&self, model: &ModelSpec) -> Result<bool> {
        let table = &model.collection;
        if self.executor.introspector().table_exists(table).await? {
            return Ok(false);
        }

        info!(table = %table, "Creating table");
        self.executor
            .execute_operation(&MigrationOperation::create_table(
                table,
                vec![ColumnDef::identity(), ColumnDef::overflow()],
            ))
            .await?;
        Ok(true)
    }

    /// Ensures the table, then reconciles its fields and indexes.
    pub async fn run(&self, model: &ModelSpec) -> Result<TableOutcome> {
        let table = model.collection.clone();
        self.ensure_table(model).await?;

        let actual = self.executor.introspector().schema(&table).await?;
        let plan = reconcile_fields(
            self.executor,
            self.writer,
            &table,
            model.fields.values(),
            &actual,
        )
        .await?;

        let migrations = match plan {
            FieldPlan::Unreconcilable {
                orphans,
                new_fields,
            } => {
                return Ok(TableOutcome::Unreconcilable {
                    table,
                    orphans,
                    new_fields,
                });
            }
            FieldPlan::Reconcilable { migrations, .. } => {
                migrations.into_iter().map(|m| m.name).collect()
            }
        };

        let indexes = reconcile_indexes(self.executor, &table, model.indexes.values()).await?;
        Ok(TableOutcome::Reconciled {
            table,
            migrations,
            indexes,
        })
    }

    /// Computes what [`run`](Self::run) would do without changing anything.
    ///
    /// Index operations are computed against the current indexes, so they
    /// may differ after pending field migrations run.
    pub async fn plan(&self, model: &ModelSpec) -> Result<TablePlan> {
        let table = model.collection.clone();
        let introspector = self.executor.introspector();
        let create_table = !introspector.table_exists(&table).await?;

        let actual = if create_table {
            Vec::new()
        } else {
            introspector.schema(&table).await?
        };
        let fields = plan_fields(&table, model.fields.values(), &actual)?;

        let indexes = if matches!(fields, FieldPlan::Unreconcilable { .. }) {
            warn!(table = %table, "Table is not reconcilable automatically");
            Vec::new()
        } else {
            let live = introspector.indexes(&table).await?;
            plan_indexes(&table, model.indexes.values(), &live).0
        };

        Ok(TablePlan {
            table,
            create_table,
            fields,
            indexes,
        })
    }
}
