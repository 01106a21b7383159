//! Persistent tool → environment dependency configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use toolshed_core::{EnvironmentKey, ToolName};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::file::{read_json, write_json_atomic, StoreLock};
use crate::version::FormatVersion;

/// File name of the dependency configuration inside the data directory.
pub const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Contents of `dependencies.json`.
///
/// ```json
/// { "tool_dependencies": { "FastQC": ["java-11"] }, "version": "1.0" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default)]
    pub tool_dependencies: BTreeMap<ToolName, Vec<EnvironmentKey>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<NaiveDate>,

    #[serde(default)]
    pub version: FormatVersion,
}

impl DependencyConfig {
    /// Builds a config from `(tool, environments)` pairs.
    pub fn from_pairs<I, E>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ToolName, E)>,
        E: IntoIterator<Item = EnvironmentKey>,
    {
        Self {
            tool_dependencies: pairs
                .into_iter()
                .map(|(tool, envs)| (tool, envs.into_iter().collect()))
                .collect(),
            last_updated: None,
            version: FormatVersion::CURRENT,
        }
    }
}

/// Access to the persistent dependency configuration.
pub trait DependencyStore: Send + Sync {
    /// Loads the configuration. A missing file is an empty configuration.
    fn load(&self) -> StoreResult<DependencyConfig>;

    /// Replaces the stored configuration.
    fn save(&self, config: &DependencyConfig) -> StoreResult<()>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Dependency configuration backed by `dependencies.json`.
#[derive(Debug, Clone)]
pub struct JsonDependencyStore {
    path: PathBuf,
}

impl JsonDependencyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens `dependencies.json` inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(DEPENDENCIES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DependencyStore for JsonDependencyStore {
    fn load(&self) -> StoreResult<DependencyConfig> {
        let Some(config) = read_json::<DependencyConfig>(&self.path)? else {
            debug!(path = %self.path.display(), "no dependency file, starting empty");
            return Ok(DependencyConfig::default());
        };

        if !config.version.is_compatible_with(&FormatVersion::CURRENT) {
            return Err(StoreError::VersionMismatch {
                path: self.path.clone(),
                found: config.version,
                expected: FormatVersion::CURRENT,
            });
        }
        if config.version.is_newer_than(&FormatVersion::CURRENT) {
            warn!(
                path = %self.path.display(),
                found = %config.version,
                "dependency file written by a newer version; unknown fields are ignored"
            );
        }
        Ok(config)
    }

    fn save(&self, config: &DependencyConfig) -> StoreResult<()> {
        let _lock = StoreLock::acquire(&self.path)?;
        let stamped = DependencyConfig {
            tool_dependencies: config.tool_dependencies.clone(),
            last_updated: Some(Utc::now().date_naive()),
            version: FormatVersion::CURRENT,
        };
        write_json_atomic(&self.path, &stamped)?;
        debug!(
            path = %self.path.display(),
            tools = stamped.tool_dependencies.len(),
            "dependency configuration saved"
        );
        Ok(())
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Dependency configuration held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryDependencyStore {
    config: Mutex<DependencyConfig>,
}

impl MemoryDependencyStore {
    pub fn new(config: DependencyConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl DependencyStore for MemoryDependencyStore {
    fn load(&self) -> StoreResult<DependencyConfig> {
        Ok(self.config.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, config: &DependencyConfig) -> StoreResult<()> {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonDependencyStore::in_dir(dir.path());
        let config = store.load().unwrap();
        assert!(config.tool_dependencies.is_empty());
    }

    #[test]
    fn test_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DEPENDENCIES_FILE),
            r#"{
                "tool_dependencies": {
                    "FastQC": ["java-11"],
                    "HISAT2": ["python-3.8", "gcc-runtime"]
                },
                "last_updated": "2025-01-15",
                "version": "1.0"
            }"#,
        )
        .unwrap();

        let config = JsonDependencyStore::in_dir(dir.path()).load().unwrap();
        assert_eq!(config.tool_dependencies.len(), 2);
        assert_eq!(
            config.tool_dependencies[&ToolName::new("HISAT2")],
            vec![EnvironmentKey::new("python-3.8"), EnvironmentKey::new("gcc-runtime")]
        );
        assert_eq!(config.last_updated, NaiveDate::from_ymd_opt(2025, 1, 15));
    }

    #[test]
    fn test_rejects_incompatible_major() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DEPENDENCIES_FILE),
            r#"{"tool_dependencies": {}, "version": "2.0"}"#,
        )
        .unwrap();

        let err = JsonDependencyStore::in_dir(dir.path()).load().unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonDependencyStore::in_dir(dir.path());
        let config = DependencyConfig::from_pairs([(
            ToolName::new("BWA"),
            vec![EnvironmentKey::new("gcc-runtime")],
        )]);

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.tool_dependencies, config.tool_dependencies);
        assert!(loaded.last_updated.is_some());
        assert_eq!(loaded.version, FormatVersion::CURRENT);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryDependencyStore::default();
        let config = DependencyConfig::from_pairs([(
            ToolName::new("BLAST"),
            vec![EnvironmentKey::new("python-3.8")],
        )]);
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }
}
