//! Series registry
//!
//! A series is one monitored route, identified by the source's route id and
//! carrying a display name that also names its table on disk. The registry is
//! a headerless two-column CSV (`id,name`) loaded once per run.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One synchronized series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Series {
    id: String,
    name: String,
}

impl Series {
    /// Create a series, validating the id and display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Result<Self, RegistryError> {
        let id = id.into().trim().to_string();
        let name = name.into().trim().to_string();

        if id.is_empty() {
            return Err(RegistryError::Invalid(format!("empty id for series '{}'", name)));
        }
        // the id becomes a path segment of the source URL
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(RegistryError::Invalid(format!(
                "id '{}' of series '{}' may only contain letters, digits, '-' and '_'",
                id, name
            )));
        }
        if name.is_empty() {
            return Err(RegistryError::Invalid(format!("empty name for series {}", id)));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(RegistryError::Invalid(format!(
                "name '{}' of series {} cannot be used as a directory name",
                name, id
            )));
        }

        Ok(Self { id, name })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// The configured set of series, in registry file order
#[derive(Debug, Clone, Default)]
pub struct SeriesRegistry {
    series: Vec<Series>,
}

impl SeriesRegistry {
    /// Load the registry from a headerless `id,name` CSV file
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let file = std::fs::File::open(path).map_err(|e| RegistryError::Unreadable {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let registry = Self::from_reader(file)?;
        tracing::info!(path = ?path, series = registry.len(), "Loaded series registry");
        Ok(registry)
    }

    /// Parse a registry from any reader
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, RegistryError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut seen = HashSet::new();
        let mut series = Vec::new();

        for (line, result) in reader.records().enumerate() {
            let record = result.map_err(|e| RegistryError::Malformed {
                line: line + 1,
                error: e.to_string(),
            })?;

            if record.iter().all(str::is_empty) {
                continue;
            }
            if record.len() != 2 {
                return Err(RegistryError::Malformed {
                    line: line + 1,
                    error: format!("expected 2 columns, found {}", record.len()),
                });
            }

            let entry = Series::new(&record[0], &record[1])?;
            if !seen.insert(entry.id.clone()) {
                return Err(RegistryError::Duplicate(entry.id));
            }
            series.push(entry);
        }

        Ok(Self { series })
    }

    pub fn get(&self, id: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[Series] {
        &self.series
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Restrict to the given ids, or everything when `ids` is empty
    pub fn select(&self, ids: &[String]) -> Result<Vec<Series>, RegistryError> {
        if ids.is_empty() {
            return Ok(self.series.clone());
        }
        ids.iter()
            .map(|id| {
                self.get(id)
                    .cloned()
                    .ok_or_else(|| RegistryError::Unknown(id.clone()))
            })
            .collect()
    }
}

/// Errors raised while loading or querying the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read series registry {path:?}: {error}")]
    Unreadable { path: PathBuf, error: String },

    #[error("Malformed registry line {line}: {error}")]
    Malformed { line: usize, error: String },

    #[error("Invalid series: {0}")]
    Invalid(String),

    #[error("Duplicate series id: {0}")]
    Duplicate(String),

    #[error("Unknown series id: {0}")]
    Unknown(String),
}
