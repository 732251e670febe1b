//! Database handle configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:config/db/development.db";

/// Default directory for migration artifacts.
pub const DEFAULT_MIGRATIONS_DIR: &str = "config/db/migrations";

/// Configuration of a [`Database`](crate::coordinator::Database) handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    pub url: String,
    /// Directory holding migration artifacts.
    pub migrations_dir: PathBuf,
    /// Pool size.
    pub max_connections: u32,
    /// Reconcile on first pool access.
    pub auto_reconcile: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            max_connections: 5,
            auto_reconcile: true,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a file or URL with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the migrations directory.
    #[must_use]
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Enables or disables reconciliation on first access.
    #[must_use]
    pub fn auto_reconcile(mut self, enabled: bool) -> Self {
        self.auto_reconcile = enabled;
        self
    }

    /// Reads `DATABASE_URL`, `DRIFTLESS_MIGRATIONS_DIR` and
    /// `DRIFTLESS_MAX_CONNECTIONS`, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("DATABASE_URL") {
            config.url = url;
        }
        if let Some(dir) = lookup("DRIFTLESS_MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("DRIFTLESS_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }
        config
    }

    /// Path of the database file, or `None` for in-memory databases.
    #[must_use]
    pub fn database_path(&self) -> Option<&Path> {
        let rest = self
            .url
            .strip_prefix("sqlite://")
            .or_else(|| self.url.strip_prefix("sqlite:"))
            .unwrap_or(&self.url);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };
        if path.is_empty() || path == ":memory:" || query.contains("mode=memory") {
            return None;
        }
        Some(Path::new(path))
    }
}
