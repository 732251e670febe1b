//! Migration operations.
//!
//! Only the operations needed by the automatically detected changes exist
//! here. Each operation can carry a guard so that replaying a pending
//! migration against a database that never had the column is a no-op.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnDef, DefaultValue, IndexSpec};
use crate::types::StorageType;

/// A single change to an existing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ColumnChange {
    /// Toggle NULL permission.
    SetNullable {
        /// Whether NULL is allowed afterwards.
        allow_null: bool,
    },
    /// Change the storage type (and its size options).
    SetType {
        /// New storage type.
        storage_type: StorageType,
        /// Bounded string size.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u32>,
        /// Unbounded text.
        #[serde(default)]
        text: bool,
    },
    /// Change (or clear) the default value.
    SetDefault {
        /// New default, `None` removes it.
        default: Option<DefaultValue>,
    },
}

impl ColumnChange {
    /// Applies this change to a column definition.
    pub fn apply_to(&self, column: &mut ColumnDef) {
        match self {
            Self::SetNullable { allow_null } => column.options.allow_null = *allow_null,
            Self::SetType {
                storage_type,
                size,
                text,
            } => {
                column.storage_type = *storage_type;
                column.options.size = *size;
                column.options.text = *text;
            }
            Self::SetDefault { default } => column.options.default = default.clone(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::SetNullable { allow_null: true } => "allow null".to_string(),
            Self::SetNullable { allow_null: false } => "set not null".to_string(),
            Self::SetType {
                storage_type, size, ..
            } => match size {
                Some(size) => format!("set type {storage_type:?}({size})"),
                None => format!("set type {storage_type:?}"),
            },
            Self::SetDefault { default: Some(d) } => format!("set default {}", d.to_sql()),
            Self::SetDefault { default: None } => "drop default".to_string(),
        }
    }
}

/// A single schema operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOperation {
    /// Create a new table.
    CreateTable {
        /// Table name.
        name: String,
        /// Column definitions.
        columns: Vec<ColumnDef>,
    },

    /// Add a column to a table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnDef,
    },

    /// Drop a column from a table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Old column name.
        old_name: String,
        /// New column name.
        new_name: String,
    },

    /// Alter one property of a column.
    AlterColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// The change to apply.
        change: ColumnChange,
    },

    /// Create an index.
    CreateIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexSpec,
    },

    /// Drop an index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index name.
        name: String,
    },
}

impl MigrationOperation {
    /// Creates a CreateTable operation.
    #[must_use]
    pub fn create_table(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self::CreateTable {
            name: name.into(),
            columns,
        }
    }

    /// Creates an AddColumn operation.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: ColumnDef) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates a DropColumn operation.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a RenameColumn operation.
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an AlterColumn operation.
    #[must_use]
    pub fn alter_column(
        table: impl Into<String>,
        column: impl Into<String>,
        change: ColumnChange,
    ) -> Self {
        Self::AlterColumn {
            table: table.into(),
            column: column.into(),
            change,
        }
    }

    /// Creates a CreateIndex operation.
    #[must_use]
    pub fn create_index(table: impl Into<String>, index: IndexSpec) -> Self {
        Self::CreateIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a DropIndex operation.
    #[must_use]
    pub fn drop_index(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropIndex {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Table the operation targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { name, .. } => name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. } => table,
        }
    }

    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { name, .. } => format!("Create table {name}"),
            Self::AddColumn { table, column } => {
                format!("Add column {} to {table}", column.name)
            }
            Self::DropColumn { table, column } => format!("Drop column {column} from {table}"),
            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => format!("Rename column {old_name} to {new_name} on {table}"),
            Self::AlterColumn {
                table,
                column,
                change,
            } => format!("Alter column {column} on {table}: {}", change.describe()),
            Self::CreateIndex { table, index } => {
                format!("Create index {} on {table}", index.name)
            }
            Self::DropIndex { table, name } => format!("Drop index {name} on {table}"),
        }
    }
}

/// Precondition checked against the live schema before a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "guard", rename_all = "snake_case")]
pub enum Guard {
    /// The column must exist.
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// The column must not exist. A missing table satisfies this guard.
    ColumnMissing {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

impl Guard {
    /// Table the guard inspects.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::ColumnExists { table, .. } | Self::ColumnMissing { table, .. } => table,
        }
    }

    /// Column the guard inspects.
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::ColumnExists { column, .. } | Self::ColumnMissing { column, .. } => column,
        }
    }

    /// Whether the guard holds given the column's presence.
    #[must_use]
    pub fn holds(&self, column_present: bool) -> bool {
        match self {
            Self::ColumnExists { .. } => column_present,
            Self::ColumnMissing { .. } => !column_present,
        }
    }
}

/// One step of a migration direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Operation to execute.
    pub operation: MigrationOperation,
    /// Optional precondition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Guard>,
}

impl Step {
    /// An unguarded step.
    #[must_use]
    pub fn new(operation: MigrationOperation) -> Self {
        Self {
            operation,
            when: None,
        }
    }

    /// A step that only runs when the column exists.
    #[must_use]
    pub fn if_column_exists(operation: MigrationOperation, column: impl Into<String>) -> Self {
        let table = operation.table().to_string();
        Self {
            operation,
            when: Some(Guard::ColumnExists {
                table,
                column: column.into(),
            }),
        }
    }

    /// A step that only runs when the column is missing.
    #[must_use]
    pub fn if_column_missing(operation: MigrationOperation, column: impl Into<String>) -> Self {
        let table = operation.table().to_string();
        Self {
            operation,
            when: Some(Guard::ColumnMissing {
                table,
                column: column.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageOptions;

    #[test]
    fn test_description() {
        let op = MigrationOperation::rename_column("users", "name", "full_name");
        assert_eq!(op.description(), "Rename column name to full_name on users");

        let op = MigrationOperation::alter_column(
            "users",
            "email",
            ColumnChange::SetNullable { allow_null: false },
        );
        assert_eq!(op.description(), "Alter column email on users: set not null");
    }

    #[test]
    fn test_change_applies_to_definition() {
        let mut col = ColumnDef::new(
            "title",
            StorageType::String,
            StorageOptions {
                allow_null: true,
                text: true,
                ..StorageOptions::default()
            },
        );

        ColumnChange::SetNullable { allow_null: false }.apply_to(&mut col);
        ColumnChange::SetType {
            storage_type: StorageType::String,
            size: Some(40),
            text: false,
        }
        .apply_to(&mut col);
        ColumnChange::SetDefault {
            default: Some(DefaultValue::String("untitled".to_string())),
        }
        .apply_to(&mut col);

        assert!(!col.options.allow_null);
        assert_eq!(col.options.size, Some(40));
        assert!(!col.options.text);
        assert_eq!(
            col.options.default,
            Some(DefaultValue::String("untitled".to_string()))
        );
    }

    #[test]
    fn test_guards() {
        let step = Step::if_column_missing(
            MigrationOperation::drop_column("users", "nickname"),
            "nickname",
        );
        let guard = step.when.unwrap();
        assert_eq!(guard.table(), "users");
        assert_eq!(guard.column(), "nickname");
        assert!(guard.holds(false));
        assert!(!guard.holds(true));
    }

    #[test]
    fn test_step_serialization() {
        let step = Step::if_column_exists(
            MigrationOperation::rename_column("users", "b", "c"),
            "b",
        );
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["operation"]["op"], "rename_column");
        assert_eq!(json["when"]["guard"], "column_exists");

        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);

        let unguarded = serde_json::to_value(Step::new(MigrationOperation::drop_index(
            "users",
            "users_name_index",
        )))
        .unwrap();
        assert!(unguarded.get("when").is_none());
    }
}
