//! Field differ.
//!
//! Compares a model's declared fields with the live columns of its table,
//! classifies every difference and turns it into reversible migrations.
//! Planning is pure; [`reconcile_fields`] writes and applies the plan.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::dialect::MigrationDialect;
use crate::error::Result;
use crate::executor::{Direction, MigrationExecutor};
use crate::operations::{ColumnChange, MigrationOperation, Step};
use crate::schema::{
    ColumnDef, ColumnSpec, DefaultValue, FieldSpec, IDENTITY_COLUMN, OVERFLOW_COLUMN,
};
use crate::types::{storage_of_column, to_storage_type, StorageOptions, StorageType};
use crate::writer::MigrationWriter;

/// Classification of one difference between fields and columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldChange {
    /// Declared field with no column.
    Added {
        /// Field name.
        name: String,
    },
    /// Column with no declared field.
    Removed {
        /// Column name.
        name: String,
    },
    /// The single orphan column is taken to be the single new field.
    Renamed {
        /// Old column name.
        from: String,
        /// New field name.
        to: String,
    },
    /// The storage type or its size options changed.
    Retyped {
        /// Field name.
        name: String,
        /// Live storage type.
        from: StorageType,
        /// Declared storage type.
        to: StorageType,
    },
    /// NULL permission changed.
    NullabilityChanged {
        /// Field name.
        name: String,
        /// Live value.
        from: bool,
        /// Declared value.
        to: bool,
    },
    /// Default value changed.
    DefaultChanged {
        /// Field name.
        name: String,
        /// Live default.
        from: Option<DefaultValue>,
        /// Declared default.
        to: Option<DefaultValue>,
    },
    /// Field and column agree.
    Unchanged {
        /// Field name.
        name: String,
    },
}

/// A migration the differ wants written.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMigration {
    /// Migration name, deterministic from table and field.
    pub name: String,
    /// Up steps.
    pub up: Vec<Step>,
    /// Down steps.
    pub down: Vec<Step>,
}

/// Result of diffing one table.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPlan {
    /// The differences can be migrated automatically.
    Reconcilable {
        /// Classification, in processing order.
        changes: Vec<FieldChange>,
        /// Migrations to write and apply, in order.
        migrations: Vec<PlannedMigration>,
    },
    /// Ambiguous orphans and new fields; the table is left alone.
    Unreconcilable {
        /// Orphaned columns.
        orphans: Vec<String>,
        /// New fields.
        new_fields: Vec<String>,
    },
}

impl FieldPlan {
    /// Planned migrations (none when unreconcilable).
    #[must_use]
    pub fn migrations(&self) -> &[PlannedMigration] {
        match self {
            Self::Reconcilable { migrations, .. } => migrations,
            Self::Unreconcilable { .. } => &[],
        }
    }

    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Reconcilable { migrations, .. } if migrations.is_empty())
    }
}

fn table_slug(table: &str) -> String {
    table.replace('/', "_")
}

/// Plans the migrations that bring `actual` in line with `declared`.
///
/// The identity and overflow columns are never diffed, and declared fields
/// with those names are ignored. A renamed column is compared with its
/// field in the same plan, so a single pass converges.
pub fn plan_fields<'a>(
    table: &str,
    declared: impl IntoIterator<Item = &'a FieldSpec>,
    actual: &[ColumnSpec],
) -> Result<FieldPlan> {
    let declared: Vec<&FieldSpec> = declared
        .into_iter()
        .filter(|f| !is_reserved(&f.name))
        .collect();
    let mut columns: IndexMap<String, ColumnSpec> = actual
        .iter()
        .filter(|c| !is_reserved(&c.name))
        .map(|c| (c.name.clone(), c.clone()))
        .collect();

    let orphans: Vec<String> = columns
        .keys()
        .filter(|name| !declared.iter().any(|f| &f.name == *name))
        .cloned()
        .collect();
    let news: Vec<String> = declared
        .iter()
        .filter(|f| !columns.contains_key(&f.name))
        .map(|f| f.name.clone())
        .collect();

    let slug = table_slug(table);
    let mut changes = Vec::new();
    let mut migrations = Vec::new();

    if orphans.len() == 1 && news.len() == 1 {
        let (from, to) = (&orphans[0], &news[0]);
        migrations.push(PlannedMigration {
            name: format!("rename_{slug}_{from}_to_{to}"),
            up: vec![Step::if_column_exists(
                MigrationOperation::rename_column(table, from, to),
                from,
            )],
            down: vec![Step::new(MigrationOperation::rename_column(table, to, from))],
        });
        changes.push(FieldChange::Renamed {
            from: from.clone(),
            to: to.clone(),
        });

        // The renamed column keeps its old definition for the comparison below.
        if let Some(mut column) = columns.shift_remove(from) {
            column.name = to.clone();
            columns.insert(to.clone(), column);
        }
    } else if news.is_empty() && !orphans.is_empty() {
        for name in &orphans {
            let Some(column) = columns.shift_remove(name) else {
                continue;
            };
            let last_known = ColumnDef::from_column(&column)?;
            migrations.push(PlannedMigration {
                name: format!("remove_{slug}_{name}"),
                up: vec![Step::if_column_exists(
                    MigrationOperation::drop_column(table, name),
                    name,
                )],
                down: vec![Step::new(MigrationOperation::add_column(table, last_known))],
            });
            changes.push(FieldChange::Removed { name: name.clone() });
        }
    } else if !orphans.is_empty() {
        return Ok(FieldPlan::Unreconcilable {
            orphans,
            new_fields: news,
        });
    }

    for field in declared {
        let (storage_type, options) = to_storage_type(&field.types, &field.options)?;

        let Some(column) = columns.get(&field.name) else {
            migrations.push(PlannedMigration {
                name: format!("add_{slug}_{}", field.name),
                up: vec![Step::if_column_missing(
                    MigrationOperation::add_column(
                        table,
                        ColumnDef::new(&field.name, storage_type, options),
                    ),
                    &field.name,
                )],
                down: vec![Step::new(MigrationOperation::drop_column(table, &field.name))],
            });
            changes.push(FieldChange::Added {
                name: field.name.clone(),
            });
            continue;
        };

        let (live_type, live) = storage_of_column(column)?;
        let field_changes = compare(&field.name, (live_type, &live), (storage_type, &options));
        if field_changes.is_empty() {
            changes.push(FieldChange::Unchanged {
                name: field.name.clone(),
            });
            continue;
        }

        migrations.push(change_migration(
            table,
            &slug,
            &field.name,
            (live_type, &live),
            (storage_type, &options),
        ));
        changes.extend(field_changes);
    }

    Ok(FieldPlan::Reconcilable {
        changes,
        migrations,
    })
}

fn is_reserved(name: &str) -> bool {
    name == IDENTITY_COLUMN || name == OVERFLOW_COLUMN
}

fn same_type(a: (StorageType, &StorageOptions), b: (StorageType, &StorageOptions)) -> bool {
    a.0 == b.0 && a.1.size == b.1.size && a.1.text == b.1.text
}

fn compare(
    name: &str,
    live: (StorageType, &StorageOptions),
    target: (StorageType, &StorageOptions),
) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if live.1.allow_null != target.1.allow_null {
        changes.push(FieldChange::NullabilityChanged {
            name: name.to_string(),
            from: live.1.allow_null,
            to: target.1.allow_null,
        });
    }
    if !same_type(live, target) {
        changes.push(FieldChange::Retyped {
            name: name.to_string(),
            from: live.0,
            to: target.0,
        });
    }
    if live.1.default != target.1.default {
        changes.push(FieldChange::DefaultChanged {
            name: name.to_string(),
            from: live.1.default.clone(),
            to: target.1.default.clone(),
        });
    }
    changes
}

/// One migration per field covering nullability, type and default, in
/// that order. Down steps undo them in reverse.
fn change_migration(
    table: &str,
    slug: &str,
    name: &str,
    live: (StorageType, &StorageOptions),
    target: (StorageType, &StorageOptions),
) -> PlannedMigration {
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut push = |forward: ColumnChange, backward: ColumnChange| {
        up.push(Step::if_column_exists(
            MigrationOperation::alter_column(table, name, forward),
            name,
        ));
        down.insert(0, Step::new(MigrationOperation::alter_column(table, name, backward)));
    };

    if live.1.allow_null != target.1.allow_null {
        push(
            ColumnChange::SetNullable {
                allow_null: target.1.allow_null,
            },
            ColumnChange::SetNullable {
                allow_null: live.1.allow_null,
            },
        );
    }
    if !same_type(live, target) {
        push(
            ColumnChange::SetType {
                storage_type: target.0,
                size: target.1.size,
                text: target.1.text,
            },
            ColumnChange::SetType {
                storage_type: live.0,
                size: live.1.size,
                text: live.1.text,
            },
        );
    }
    if live.1.default != target.1.default {
        push(
            ColumnChange::SetDefault {
                default: target.1.default.clone(),
            },
            ColumnChange::SetDefault {
                default: live.1.default.clone(),
            },
        );
    }

    PlannedMigration {
        name: format!("column_change_{slug}_{name}"),
        up,
        down,
    }
}

/// Plans, writes and applies the field migrations for a table.
///
/// An unreconcilable table is reported through the returned plan and
/// nothing is written.
pub async fn reconcile_fields<'a, D: MigrationDialect>(
    executor: &MigrationExecutor<D>,
    writer: &MigrationWriter,
    table: &str,
    declared: impl IntoIterator<Item = &'a FieldSpec>,
    actual: &[ColumnSpec],
) -> Result<FieldPlan> {
    let plan = plan_fields(table, declared, actual)?;

    match &plan {
        FieldPlan::Unreconcilable {
            orphans,
            new_fields,
        } => {
            warn!(
                table = %table,
                ?orphans,
                ?new_fields,
                "Could not auto migrate table, manual migration required"
            );
        }
        FieldPlan::Reconcilable {
            changes,
            migrations,
        } => {
            for change in changes {
                log_change(table, change);
            }
            for planned in migrations {
                let artifact =
                    writer.create(&planned.name, planned.up.clone(), planned.down.clone())?;
                executor.apply(&artifact, Direction::Up).await?;
            }
        }
    }

    Ok(plan)
}

fn log_change(table: &str, change: &FieldChange) {
    match change {
        FieldChange::Added { name } => info!(table = %table, field = %name, "Add field"),
        FieldChange::Removed { name } => info!(table = %table, field = %name, "Remove field"),
        FieldChange::Renamed { from, to } => {
            info!(table = %table, from = %from, to = %to, "Rename field");
        }
        FieldChange::Retyped { name, from, to } => {
            info!(table = %table, field = %name, ?from, ?to, "Change field type");
        }
        FieldChange::NullabilityChanged { name, to, .. } => {
            info!(table = %table, field = %name, allow_null = to, "Change field nullability");
        }
        FieldChange::DefaultChanged { name, .. } => {
            info!(table = %table, field = %name, "Change field default");
        }
        FieldChange::Unchanged { .. } => {}
    }
}
