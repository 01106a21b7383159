//! The opened data directory: stores, storage accounting and planner wiring
//! shared by every subcommand.

use std::fs;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use toolshed_core::{Environment, EnvironmentKey, ToolName, ToolRecord};
use toolshed_engine::{DeletionPlanner, DependencyGraph, LocalFilesystem, StorageAccountant};
use toolshed_store::{
    DependencyConfig, DependencyStore, JsonDependencyStore, JsonRegistry, RegistryStore,
};

use crate::config::Config;

/// Dependency table written by `deps --init` when no configuration exists.
pub const DEFAULT_DEPENDENCIES: &[(&str, &[&str])] = &[
    ("FastQC", &["java-11"]),
    ("BLAST", &["python-3.8"]),
    ("SAMtools", &["python-3.8"]),
    ("BWA", &["gcc-runtime"]),
    ("IQ-TREE", &["gcc-runtime"]),
    ("HISAT2", &["python-3.8", "gcc-runtime"]),
];

pub struct Shed {
    pub config: Config,
    pub registry: Arc<JsonRegistry>,
    pub dependencies: Arc<JsonDependencyStore>,
    pub storage: StorageAccountant,
}

impl Shed {
    pub fn open(config: Config) -> Self {
        let registry = Arc::new(JsonRegistry::in_dir(&config.data_dir));
        let dependencies = Arc::new(JsonDependencyStore::in_dir(&config.data_dir));
        let storage = StorageAccountant::new(Arc::new(LocalFilesystem::new()), &config.install_root)
            .with_low_space_threshold(config.low_space_warning_bytes);
        Self {
            config,
            registry,
            dependencies,
            storage,
        }
    }

    pub fn tools(&self) -> Result<Vec<ToolRecord>> {
        self.registry
            .read_all()
            .with_context(|| format!("Failed to read {}", self.registry.path().display()))
    }

    /// Looks up one registered tool.
    pub fn tool(&self, name: &ToolName) -> Result<ToolRecord> {
        self.registry
            .get(name)?
            .with_context(|| format!("{name} is not in the registry"))
    }

    /// The dependency graph, with environment directories found under
    /// `envs_root` that no tool references materialized as unreferenced.
    pub fn graph(&self) -> Result<DependencyGraph> {
        let config = self
            .dependencies
            .load()
            .with_context(|| format!("Failed to read {}", self.dependencies.path().display()))?;
        let mut graph = DependencyGraph::from_config(&config);
        for key in self.environment_dirs()? {
            graph.materialize_environment(key);
        }
        Ok(graph)
    }

    /// Every known environment, described.
    pub fn environments(&self, graph: &DependencyGraph) -> Vec<Environment> {
        graph
            .environments()
            .map(|key| self.config.environment(key.clone()))
            .collect()
    }

    /// Writes [`DEFAULT_DEPENDENCIES`] unless a configuration already exists.
    ///
    /// Returns false when the file was left alone.
    pub fn init_dependencies(&self) -> Result<bool> {
        if self.dependencies.path().exists() {
            return Ok(false);
        }
        let config = DependencyConfig::from_pairs(DEFAULT_DEPENDENCIES.iter().map(|(tool, envs)| {
            (
                ToolName::new(*tool),
                envs.iter().map(|e| EnvironmentKey::new(*e)).collect::<Vec<_>>(),
            )
        }));
        self.dependencies.save(&config)?;
        Ok(true)
    }

    pub fn planner(&self) -> DeletionPlanner {
        DeletionPlanner::new(
            self.registry.clone(),
            self.dependencies.clone(),
            self.storage.clone(),
            &self.config.envs_root,
            Arc::new(toolshed_core::SystemClock),
        )
        .with_max_parallel(self.config.max_parallel_removals)
    }

    fn environment_dirs(&self) -> Result<Vec<EnvironmentKey>> {
        let entries = match fs::read_dir(&self.config.envs_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to list {}", self.config.envs_root.display())
                })
            }
        };

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match EnvironmentKey::parse(&name) {
                Ok(key) => keys.push(key),
                Err(e) => debug!(name = %name, error = %e, "ignoring directory"),
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shed(dir: &TempDir) -> Shed {
        let config = Config::from_toml("", Some(dir.path().to_path_buf())).unwrap();
        Shed::open(config)
    }

    #[test]
    fn test_init_dependencies_once() {
        let dir = TempDir::new().unwrap();
        let shed = shed(&dir);

        assert!(shed.init_dependencies().unwrap());
        assert!(!shed.init_dependencies().unwrap());

        let graph = shed.graph().unwrap();
        assert_eq!(
            graph.users_of(&EnvironmentKey::new("python-3.8")).len(),
            3,
            "BLAST, SAMtools and HISAT2 share python-3.8"
        );
    }

    #[test]
    fn test_graph_materializes_stray_environment_dirs() {
        let dir = TempDir::new().unwrap();
        let shed = shed(&dir);
        fs::create_dir_all(shed.config.envs_root.join("r-4.2")).unwrap();

        let graph = shed.graph().unwrap();
        assert!(graph.contains_environment(&EnvironmentKey::new("r-4.2")));
        assert!(graph.users_of(&EnvironmentKey::new("r-4.2")).is_empty());
    }

    #[test]
    fn test_unknown_tool_lookup_fails() {
        let dir = TempDir::new().unwrap();
        let shed = shed(&dir);
        let err = shed.tool(&ToolName::new("BWA")).unwrap_err();
        assert!(err.to_string().contains("BWA"));
    }
}
