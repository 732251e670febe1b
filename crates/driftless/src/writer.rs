//! Migration artifact files.
//!
//! Artifacts are JSON documents named `<unix_timestamp>_<snake_name>.json`.
//! They are written once and never modified.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::operations::Step;

/// A persisted, reversible migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationArtifact {
    /// Version, derived from the creation timestamp.
    pub version: i64,
    /// Migration name.
    pub name: String,
    /// Steps executed when applying.
    pub up: Vec<Step>,
    /// Steps executed when rolling back.
    pub down: Vec<Step>,
}

impl MigrationArtifact {
    /// File name of the artifact.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_{}.json", self.version, snake_case(&self.name))
    }

    /// Full identifier `<version>_<name>`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

/// Writes and lists migration artifacts in a directory.
#[derive(Debug)]
pub struct MigrationWriter {
    dir: PathBuf,
    last_version: Mutex<i64>,
}

impl MigrationWriter {
    /// Creates a writer for the given migrations directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_version: Mutex::new(0),
        }
    }

    /// The migrations directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists a new migration and returns it.
    ///
    /// The version is the current unix time, bumped past every version
    /// already handed out or present on disk.
    pub fn create(&self, name: &str, up: Vec<Step>, down: Vec<Step>) -> Result<MigrationArtifact> {
        fs::create_dir_all(&self.dir)?;

        let mut last = self.last_version.lock();
        let on_disk = self.max_version_on_disk()?;
        let version = Utc::now().timestamp().max(*last + 1).max(on_disk + 1);

        let artifact = MigrationArtifact {
            version,
            name: name.to_string(),
            up,
            down,
        };

        let path = self.dir.join(artifact.file_name());
        if path.exists() {
            return Err(MigrateError::MigrationExists(path));
        }

        let content = serde_json::to_string_pretty(&artifact)?;
        fs::write(&path, content)?;
        *last = version;

        info!(version, name = %artifact.name, path = %path.display(), "Wrote migration");
        Ok(artifact)
    }

    /// All artifacts in the directory, ordered by version then name.
    pub fn list(&self) -> Result<Vec<MigrationArtifact>> {
        let mut artifacts = Vec::new();
        for path in self.artifact_paths()? {
            let content = fs::read_to_string(&path)?;
            let artifact: MigrationArtifact =
                serde_json::from_str(&content).map_err(|e| MigrateError::ParseError {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            debug!(path = %path.display(), "Loaded migration");
            artifacts.push(artifact);
        }
        artifacts.sort_by(|a, b| (a.version, &a.name).cmp(&(b.version, &b.name)));
        Ok(artifacts)
    }

    /// Finds the artifact for a version.
    pub fn find(&self, version: i64) -> Result<MigrationArtifact> {
        self.list()?
            .into_iter()
            .find(|a| a.version == version)
            .ok_or(MigrateError::MigrationNotFound(version))
    }

    fn artifact_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if file_version(&path).is_some() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn max_version_on_disk(&self) -> Result<i64> {
        Ok(self
            .artifact_paths()?
            .iter()
            .filter_map(|p| file_version(p))
            .max()
            .unwrap_or(0))
    }
}

/// Version prefix of an artifact file name, if it is one.
fn file_version(path: &Path) -> Option<i64> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (prefix, rest) = stem.split_once('_')?;
    if rest.is_empty() {
        return None;
    }
    prefix.parse().ok()
}

/// Converts a migration name to a file-name-safe snake case.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}
