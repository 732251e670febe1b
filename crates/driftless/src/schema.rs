//! Schema representation types.
//!
//! `FieldSpec` and `IndexSpec` describe what a model declares, `ColumnSpec`
//! describes what introspection found in the live table, and `ColumnDef`
//! is the storage-level definition used when emitting DDL.

use serde::{Deserialize, Serialize};

use crate::types::{FieldOptions, LogicalType, StorageOptions, StorageType};

/// Name of the primary identity column every table carries.
pub const IDENTITY_COLUMN: &str = "id";

/// Name of the overflow column holding undeclared attributes.
pub const OVERFLOW_COLUMN: &str = "extra";

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Expression(expr) => expr.clone(),
        }
    }

    /// Parses a default literal as reported by the engine.
    ///
    /// `NULL` (and an absent literal) means there is no default.
    #[must_use]
    pub fn from_sql(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return None;
        }
        if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            return Some(Self::String(raw[1..raw.len() - 1].replace("''", "'")));
        }
        if raw.eq_ignore_ascii_case("true") {
            return Some(Self::Bool(true));
        }
        if raw.eq_ignore_ascii_case("false") {
            return Some(Self::Bool(false));
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Some(Self::Integer(i));
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Some(Self::Float(f));
        }
        Some(Self::Expression(raw.to_string()))
    }
}

/// A field declared by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field (and column) name.
    pub name: String,
    /// Logical type tags: at most one concrete type plus an optional nil marker.
    #[serde(default)]
    pub types: Vec<LogicalType>,
    /// Declared options.
    #[serde(default)]
    pub options: FieldOptions,
}

impl FieldSpec {
    /// Creates a field with the given types and default options.
    #[must_use]
    pub fn new(name: impl Into<String>, types: impl IntoIterator<Item = LogicalType>) -> Self {
        Self {
            name: name.into(),
            types: types.into_iter().collect(),
            options: FieldOptions::default(),
        }
    }

    /// Replaces the field options.
    #[must_use]
    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }
}

/// A column as reported by the live table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Declared type exactly as the engine reports it.
    pub db_type: String,
    /// Storage type parsed from `db_type`, if recognized.
    pub storage_type: Option<StorageType>,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Declared size for bounded strings.
    pub max_length: Option<u32>,
    /// Default value, if any.
    pub default: Option<DefaultValue>,
    /// Whether the column is (part of) the primary key.
    pub primary_key: bool,
}

/// Storage-level definition of a column, used to emit DDL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub storage_type: StorageType,
    /// Storage options.
    pub options: StorageOptions,
    /// Whether this column is the primary key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
}

impl ColumnDef {
    /// Creates a column definition.
    #[must_use]
    pub fn new(name: impl Into<String>, storage_type: StorageType, options: StorageOptions) -> Self {
        Self {
            name: name.into(),
            storage_type,
            options,
            primary_key: false,
        }
    }

    /// The primary identity column: unbounded text, never NULL.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            name: IDENTITY_COLUMN.to_string(),
            storage_type: StorageType::String,
            options: StorageOptions {
                allow_null: false,
                text: true,
                ..StorageOptions::default()
            },
            primary_key: true,
        }
    }

    /// The overflow column for undeclared attributes.
    #[must_use]
    pub fn overflow() -> Self {
        Self::new(
            OVERFLOW_COLUMN,
            StorageType::Json,
            StorageOptions {
                allow_null: true,
                ..StorageOptions::default()
            },
        )
    }

    /// Rebuilds a definition from an introspected column, keeping its
    /// storage type verbatim (including the identity and overflow columns).
    pub fn from_column(column: &ColumnSpec) -> crate::error::Result<Self> {
        let storage_type = column
            .storage_type
            .ok_or_else(|| crate::types::unmapped(column))?;
        let text = storage_type == StorageType::String && column.max_length.is_none();
        Ok(Self {
            name: column.name.clone(),
            storage_type,
            options: StorageOptions {
                allow_null: column.allow_null,
                size: if text { None } else { column.max_length },
                text,
                default: column.default.clone(),
            },
            primary_key: column.primary_key,
        })
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Columns included in the index, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index.
    ///
    /// SQLite index names are unique per database, not per table. An
    /// explicit name shared by two tables fails at `CREATE INDEX`; the
    /// [`default_name`](Self::default_name) is prefixed with the table.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Default index name for a set of columns on a table.
    #[must_use]
    pub fn default_name(table: &str, columns: &[String]) -> String {
        format!("{}_{}_index", table, columns.join("_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_value_to_sql() {
        assert_eq!(DefaultValue::Bool(true).to_sql(), "1");
        assert_eq!(DefaultValue::Integer(42).to_sql(), "42");
        assert_eq!(DefaultValue::String("it's".to_string()).to_sql(), "'it''s'");
        assert_eq!(
            DefaultValue::Expression("CURRENT_TIMESTAMP".to_string()).to_sql(),
            "CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_default_value_from_sql() {
        assert_eq!(DefaultValue::from_sql("NULL"), None);
        assert_eq!(DefaultValue::from_sql("-3"), Some(DefaultValue::Integer(-3)));
        assert_eq!(DefaultValue::from_sql("2.5"), Some(DefaultValue::Float(2.5)));
        assert_eq!(
            DefaultValue::from_sql("'O''Brien'"),
            Some(DefaultValue::String("O'Brien".to_string()))
        );
        assert_eq!(DefaultValue::from_sql("FALSE"), Some(DefaultValue::Bool(false)));
        assert_eq!(
            DefaultValue::from_sql("CURRENT_TIMESTAMP"),
            Some(DefaultValue::Expression("CURRENT_TIMESTAMP".to_string()))
        );
    }

    #[test]
    fn test_identity_and_overflow() {
        let id = ColumnDef::identity();
        assert!(id.primary_key);
        assert!(!id.options.allow_null);
        assert_eq!(ColumnDef::overflow().storage_type, StorageType::Json);
    }

    #[test]
    fn test_from_column_keeps_bounded_size() {
        let column = ColumnSpec {
            name: "title".to_string(),
            db_type: "varchar(50)".to_string(),
            storage_type: Some(StorageType::String),
            allow_null: true,
            max_length: Some(50),
            default: None,
            primary_key: false,
        };
        let def = ColumnDef::from_column(&column).unwrap();
        assert_eq!(def.options.size, Some(50));
        assert!(!def.options.text);
    }

    #[test]
    fn test_default_index_name() {
        let cols = vec!["name".to_string(), "email".to_string()];
        assert_eq!(IndexSpec::default_name("users", &cols), "users_name_email_index");
        assert_ne!(
            IndexSpec::default_name("users", &cols),
            IndexSpec::default_name("accounts", &cols)
        );
    }
}
