//! Translation between logical field types and storage column types.
//!
//! Both directions are pure. The field differ calls them on each side of a
//! comparison, so "no change" means equality after normalization.

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::schema::{ColumnSpec, DefaultValue};

/// Longest string that is stored as a bounded `varchar`.
pub const MAX_VARCHAR_SIZE: u32 = 255;

/// Engine-independent type tag of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    /// Character data.
    String,
    /// Whole numbers.
    Integer,
    /// Floating point numbers.
    Float,
    /// Arbitrary precision numbers.
    Numeric,
    /// True/false.
    Boolean,
    /// Point in time.
    Time,
    /// The nullability marker.
    Nil,
}

/// Options declared on a model field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    /// Explicit nullability. When absent, the nil marker decides.
    pub allow_null: Option<bool>,
    /// Maximum length for strings.
    pub max_length: Option<u32>,
    /// Default value.
    pub default_value: Option<DefaultValue>,
    /// Store strings as unbounded text.
    pub text: bool,
}

/// Concrete column type understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// `text` or `varchar(n)` depending on options.
    String,
    /// `integer`.
    Integer,
    /// `double precision`.
    Float,
    /// `numeric`.
    Numeric,
    /// The engine's canonical boolean.
    Boolean,
    /// `timestamp`.
    DateTime,
    /// Schemaless JSON document (overflow column only).
    Json,
}

/// Options attached to a storage column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Bounded string size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Unbounded text.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub text: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

/// Maps a field's logical types and options to a storage type and options.
///
/// An empty type set is treated as `[String, Nil]`. The nil marker becomes
/// `allow_null` unless `allow_null` is given explicitly.
pub fn to_storage_type(
    types: &[LogicalType],
    options: &FieldOptions,
) -> Result<(StorageType, StorageOptions)> {
    let allow_nil = types.is_empty() || types.contains(&LogicalType::Nil);
    let concrete: Vec<LogicalType> = types
        .iter()
        .copied()
        .filter(|t| *t != LogicalType::Nil)
        .collect();

    if concrete.len() > 1 {
        return Err(MigrateError::MultiType {
            types: types.to_vec(),
        });
    }

    let storage_type = match concrete.first().copied().unwrap_or(LogicalType::String) {
        LogicalType::String | LogicalType::Nil => StorageType::String,
        LogicalType::Integer => StorageType::Integer,
        LogicalType::Float => StorageType::Float,
        LogicalType::Numeric => StorageType::Numeric,
        LogicalType::Boolean => StorageType::Boolean,
        LogicalType::Time => StorageType::DateTime,
    };

    let mut storage = StorageOptions {
        allow_null: options.allow_null.unwrap_or(allow_nil),
        size: None,
        text: false,
        default: options
            .default_value
            .clone()
            .map(|value| coerce_default(storage_type, value)),
    };

    if storage_type == StorageType::String {
        match options.max_length {
            Some(size) if size <= MAX_VARCHAR_SIZE && !options.text => storage.size = Some(size),
            _ => storage.text = true,
        }
    }

    Ok((storage_type, storage))
}

/// Maps an introspected column back to the logical types and options that
/// would have declared it.
pub fn to_logical_types(column: &ColumnSpec) -> Result<(Vec<LogicalType>, FieldOptions)> {
    let storage_type = column.storage_type.ok_or_else(|| unmapped(column))?;

    let logical = match storage_type {
        StorageType::String => LogicalType::String,
        StorageType::Integer => LogicalType::Integer,
        StorageType::Float => LogicalType::Float,
        StorageType::Numeric => LogicalType::Numeric,
        StorageType::Boolean => LogicalType::Boolean,
        StorageType::DateTime => LogicalType::Time,
        StorageType::Json => return Err(unmapped(column)),
    };

    let mut types = vec![logical];
    if column.allow_null {
        types.push(LogicalType::Nil);
    }

    let options = FieldOptions {
        allow_null: None,
        max_length: column.max_length,
        default_value: column
            .default
            .clone()
            .map(|value| coerce_default(storage_type, value)),
        text: false,
    };

    Ok((types, options))
}

/// Storage type and options of a live column, recomputed through the
/// logical representation so it is comparable with a declared field.
pub fn storage_of_column(column: &ColumnSpec) -> Result<(StorageType, StorageOptions)> {
    let (types, options) = to_logical_types(column)?;
    to_storage_type(&types, &options)
}

/// Brings a default literal in line with the column type it belongs to.
#[must_use]
pub fn coerce_default(storage_type: StorageType, value: DefaultValue) -> DefaultValue {
    match (storage_type, value) {
        (StorageType::Boolean, DefaultValue::Integer(0)) => DefaultValue::Bool(false),
        (StorageType::Boolean, DefaultValue::Integer(1)) => DefaultValue::Bool(true),
        (StorageType::Boolean, value) => value,
        #[allow(clippy::cast_precision_loss)]
        (StorageType::Float | StorageType::Numeric, DefaultValue::Integer(i)) => {
            DefaultValue::Float(i as f64)
        }
        (StorageType::Float | StorageType::Numeric, DefaultValue::Bool(b)) => {
            DefaultValue::Float(f64::from(u8::from(b)))
        }
        // Booleans are written as 0/1 and read back as integers.
        (_, DefaultValue::Bool(b)) => DefaultValue::Integer(i64::from(b)),
        (_, value) => value,
    }
}

pub(crate) fn unmapped(column: &ColumnSpec) -> MigrateError {
    MigrateError::TypeMapping {
        column: column.name.clone(),
        db_type: column.db_type.clone(),
        dump: format!("{column:?}"),
    }
}
