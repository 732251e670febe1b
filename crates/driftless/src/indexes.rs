//! Index reconciliation.
//!
//! Indexes are immutable, so a declared index that differs from the live
//! one of the same name is dropped and recreated. Live indexes that are no
//! longer declared are dropped. Nothing goes through the ledger.

use indexmap::IndexMap;
use tracing::info;

use crate::dialect::MigrationDialect;
use crate::error::Result;
use crate::executor::MigrationExecutor;
use crate::operations::MigrationOperation;
use crate::schema::IndexSpec;

/// What the index reconciler did to a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Indexes created (including recreated ones).
    pub created: Vec<String>,
    /// Indexes dropped (including recreated ones).
    pub dropped: Vec<String>,
    /// Indexes left as they were.
    pub unchanged: Vec<String>,
}

impl IndexReport {
    /// Whether the reconciler changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.dropped.is_empty()
    }
}

/// Operations that bring the live indexes of `table` in line with `declared`.
///
/// Drops come before creates for the same name; stale indexes are dropped last.
pub fn plan_indexes<'a>(
    table: &str,
    declared: impl IntoIterator<Item = &'a IndexSpec>,
    actual: &[IndexSpec],
) -> (Vec<MigrationOperation>, IndexReport) {
    let mut remaining: IndexMap<&str, &IndexSpec> =
        actual.iter().map(|i| (i.name.as_str(), i)).collect();
    let mut operations = Vec::new();
    let mut report = IndexReport::default();

    for index in declared {
        match remaining.shift_remove(index.name.as_str()) {
            Some(live) if live == index => report.unchanged.push(index.name.clone()),
            Some(_) => {
                operations.push(MigrationOperation::drop_index(table, &index.name));
                operations.push(MigrationOperation::create_index(table, index.clone()));
                report.dropped.push(index.name.clone());
                report.created.push(index.name.clone());
            }
            None => {
                operations.push(MigrationOperation::create_index(table, index.clone()));
                report.created.push(index.name.clone());
            }
        }
    }

    for name in remaining.keys() {
        operations.push(MigrationOperation::drop_index(table, *name));
        report.dropped.push((*name).to_string());
    }

    (operations, report)
}

/// Reconciles the indexes of one table against the live database.
pub async fn reconcile_indexes<'a, D: MigrationDialect>(
    executor: &MigrationExecutor<D>,
    table: &str,
    declared: impl IntoIterator<Item = &'a IndexSpec>,
) -> Result<IndexReport> {
    let actual = executor.introspector().indexes(table).await?;
    let (operations, report) = plan_indexes(table, declared, &actual);

    for operation in &operations {
        info!(table = %table, operation = %operation.description(), "Index change");
        executor.execute_operation(operation).await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use sqlx::sqlite::SqlitePoolOptions;

    fn index(name: &str, columns: &[&str]) -> IndexSpec {
        IndexSpec::new(name, columns.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn test_plan_matching_index_is_untouched() {
        let declared = [index("users_name_index", &["name"])];
        let (ops, report) = plan_indexes("users", &declared, &declared);
        assert!(ops.is_empty());
        assert_eq!(report.unchanged, ["users_name_index"]);
        assert!(report.is_empty());
    }

    #[test]
    fn test_plan_changed_index_is_replaced() {
        let declared = [index("users_name_index", &["name"]).unique()];
        let actual = [index("users_name_index", &["name"])];
        let (ops, _) = plan_indexes("users", &declared, &actual);
        assert_eq!(
            ops,
            vec![
                MigrationOperation::drop_index("users", "users_name_index"),
                MigrationOperation::create_index("users", declared[0].clone()),
            ]
        );
    }

    #[test]
    fn test_plan_creates_missing_and_drops_stale() {
        let declared = [index("users_email_index", &["email"])];
        let actual = [index("users_name_index", &["name"])];
        let (ops, report) = plan_indexes("users", &declared, &actual);
        assert_eq!(
            ops,
            vec![
                MigrationOperation::create_index("users", declared[0].clone()),
                MigrationOperation::drop_index("users", "users_name_index"),
            ]
        );
        assert_eq!(report.created, ["users_email_index"]);
        assert_eq!(report.dropped, ["users_name_index"]);
    }

    #[tokio::test]
    async fn test_declared_then_removed_index() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        sqlx::query("CREATE TABLE users (id text PRIMARY KEY NOT NULL, extra text, name text)")
            .execute(&pool)
            .await
            .unwrap();
        let executor = MigrationExecutor::new(pool, SqliteDialect::new());

        let declared = [index("users_name_index", &["name"])];
        let report = reconcile_indexes(&executor, "users", &declared).await.unwrap();
        assert_eq!(report.created, ["users_name_index"]);
        assert_eq!(executor.introspector().indexes("users").await.unwrap(), declared);

        let report = reconcile_indexes(&executor, "users", &declared).await.unwrap();
        assert!(report.is_empty());

        let report = reconcile_indexes(&executor, "users", &Vec::<IndexSpec>::new()).await.unwrap();
        assert_eq!(report.dropped, ["users_name_index"]);
        assert!(executor.introspector().indexes("users").await.unwrap().is_empty());
    }
}
