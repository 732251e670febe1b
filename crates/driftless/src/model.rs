//! Model declarations and the registry that announces them.
//!
//! A [`ModelSpec`] is what the reconciler reads: a table name, ordered
//! fields and named indexes. The [`ModelRegistry`] holds every known model
//! and emits [`ModelEvent`]s to subscribers when models or fields appear.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::schema::{FieldSpec, IndexSpec};
use crate::types::{FieldOptions, LogicalType};

/// Declared shape of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Table name.
    pub collection: String,
    /// Fields in declaration order.
    pub fields: IndexMap<String, FieldSpec>,
    /// Indexes by name.
    pub indexes: IndexMap<String, IndexSpec>,
}

impl ModelSpec {
    /// Creates a model with no fields.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: IndexMap::new(),
            indexes: IndexMap::new(),
        }
    }

    /// Declares a field with default options.
    #[must_use]
    pub fn field(self, name: impl Into<String>, types: impl IntoIterator<Item = LogicalType>) -> Self {
        self.field_with(name, types, FieldOptions::default())
    }

    /// Declares a field with options.
    #[must_use]
    pub fn field_with(
        mut self,
        name: impl Into<String>,
        types: impl IntoIterator<Item = LogicalType>,
        options: FieldOptions,
    ) -> Self {
        let field = FieldSpec::new(name, types).with_options(options);
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Declares a non-unique index with the default name.
    #[must_use]
    pub fn index<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        self.add_index(None, columns, false)
    }

    /// Declares a unique index with the default name.
    #[must_use]
    pub fn unique_index<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        self.add_index(None, columns, true)
    }

    /// Declares an index with an explicit name.
    #[must_use]
    pub fn named_index<S: Into<String>>(
        self,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        unique: bool,
    ) -> Self {
        self.add_index(Some(name.into()), columns, unique)
    }

    fn add_index<S: Into<String>>(
        mut self,
        name: Option<String>,
        columns: impl IntoIterator<Item = S>,
        unique: bool,
    ) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let name = name.unwrap_or_else(|| IndexSpec::default_name(&self.collection, &columns));
        self.indexes.insert(
            name.clone(),
            IndexSpec {
                name,
                columns,
                unique,
            },
        );
        self
    }
}

/// Something that happened in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A model was registered (or replaced).
    Registered {
        /// Table name.
        collection: String,
    },
    /// A field was declared on an existing model.
    FieldDeclared {
        /// Table name.
        collection: String,
        /// Field name.
        field: String,
    },
}

type Listener = Arc<dyn Fn(&ModelEvent) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, Listener)>>;

/// Registry of all known models.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<IndexMap<String, ModelSpec>>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.read().keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model, replacing any model with the same table name.
    pub fn register(&self, model: ModelSpec) {
        let collection = model.collection.clone();
        self.models.write().insert(collection.clone(), model);
        debug!(collection = %collection, "Registered model");
        self.emit(&ModelEvent::Registered { collection });
    }

    /// Declares an extra field on a registered model.
    pub fn declare_field(&self, collection: &str, field: FieldSpec) -> Result<()> {
        let name = field.name.clone();
        {
            let mut models = self.models.write();
            let model = models
                .get_mut(collection)
                .ok_or_else(|| MigrateError::TableNotFound(collection.to_string()))?;
            model.fields.insert(name.clone(), field);
        }
        self.emit(&ModelEvent::FieldDeclared {
            collection: collection.to_string(),
            field: name,
        });
        Ok(())
    }

    /// Snapshot of all models in registration order.
    #[must_use]
    pub fn models(&self) -> Vec<ModelSpec> {
        self.models.read().values().cloned().collect()
    }

    /// Looks up a model by table name.
    #[must_use]
    pub fn get(&self, collection: &str) -> Option<ModelSpec> {
        self.models.read().get(collection).cloned()
    }

    /// Number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Whether no model is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// Calls `listener` for every future event until the returned handle
    /// is removed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn emit(&self, event: &ModelEvent) {
        // Listeners run outside the lock so they may touch the registry.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Handle to a registry subscription. Dropping it unsubscribes.
pub struct Subscription {
    listeners: Weak<Listeners>,
    id: u64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Unsubscribes.
    pub fn remove(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Manifest {
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ManifestModel {
    collection: String,
    #[serde(default)]
    fields: IndexMap<String, ManifestField>,
    #[serde(default)]
    indexes: IndexMap<String, ManifestIndex>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ManifestField {
    #[serde(default)]
    types: Vec<LogicalType>,
    #[serde(default)]
    options: FieldOptions,
}

#[derive(Debug, Deserialize, Serialize)]
struct ManifestIndex {
    columns: Vec<String>,
    #[serde(default)]
    unique: bool,
}

/// Parses a JSON model manifest.
///
/// ```json
/// {"models": [{"collection": "users",
///              "fields": {"name": {"types": ["string", "nil"]}},
///              "indexes": {"users_name_index": {"columns": ["name"]}}}]}
/// ```
pub fn parse_manifest(source: &str) -> serde_json::Result<Vec<ModelSpec>> {
    let manifest: Manifest = serde_json::from_str(source)?;
    Ok(manifest
        .models
        .into_iter()
        .map(|m| ModelSpec {
            fields: m
                .fields
                .into_iter()
                .map(|(name, f)| {
                    let field = FieldSpec::new(name.clone(), f.types).with_options(f.options);
                    (name, field)
                })
                .collect(),
            indexes: m
                .indexes
                .into_iter()
                .map(|(name, i)| {
                    let index = IndexSpec {
                        name: name.clone(),
                        columns: i.columns,
                        unique: i.unique,
                    };
                    (name, index)
                })
                .collect(),
            collection: m.collection,
        })
        .collect())
}

/// Reads a JSON model manifest from disk.
pub fn load_manifest(path: &Path) -> Result<Vec<ModelSpec>> {
    let source = std::fs::read_to_string(path)?;
    parse_manifest(&source).map_err(|e| MigrateError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_builder() {
        let model = ModelSpec::new("users")
            .field("name", [LogicalType::String, LogicalType::Nil])
            .field("age", [LogicalType::Integer])
            .index(["name"])
            .unique_index(["name", "age"])
            .named_index("by_age", ["age"], false);

        let fields: Vec<&str> = model.fields.keys().map(String::as_str).collect();
        assert_eq!(fields, ["name", "age"]);
        assert!(model.indexes.contains_key("users_name_index"));
        assert!(model.indexes["users_name_age_index"].unique);
        assert_eq!(model.indexes["by_age"].columns, ["age"]);
    }

    #[test]
    fn test_events_reach_subscribers() {
        let registry = ModelRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = registry.subscribe(move |e| sink.lock().push(e.clone()));

        registry.register(ModelSpec::new("posts"));
        registry
            .declare_field("posts", FieldSpec::new("title", [LogicalType::String]))
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ModelEvent::Registered {
                    collection: "posts".to_string()
                },
                ModelEvent::FieldDeclared {
                    collection: "posts".to_string(),
                    field: "title".to_string()
                },
            ]
        );
        assert!(registry.get("posts").unwrap().fields.contains_key("title"));
    }

    #[test]
    fn test_declare_field_on_unknown_model() {
        let registry = ModelRegistry::new();
        let err = registry
            .declare_field("ghosts", FieldSpec::new("x", []))
            .unwrap_err();
        assert!(matches!(err, MigrateError::TableNotFound(_)));
    }

    #[test]
    fn test_subscription_removal() {
        let registry = ModelRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let sub = registry.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.register(ModelSpec::new("a"));
        sub.remove();
        registry.register(ModelSpec::new("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        {
            let c = Arc::clone(&count);
            let _scoped = registry.subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(registry.listener_count(), 1);
        }
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_parse_manifest() {
        let models = parse_manifest(
            r#"{"models": [{
                "collection": "users",
                "fields": {
                    "name": {"types": ["string", "nil"], "options": {"max_length": 50}},
                    "active": {"types": ["boolean"], "options": {"default_value": {"bool": true}}}
                },
                "indexes": {"users_name_index": {"columns": ["name"], "unique": true}}
            }]}"#,
        )
        .unwrap();

        assert_eq!(models.len(), 1);
        let users = &models[0];
        assert_eq!(users.collection, "users");
        assert_eq!(users.fields["name"].options.max_length, Some(50));
        assert_eq!(users.fields["active"].types, [LogicalType::Boolean]);
        assert!(users.indexes["users_name_index"].unique);
    }
}
