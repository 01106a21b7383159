//! Host configuration.
//!
//! Read from `config.toml` in the user config directory, or from the file
//! named by `--config` / `TOOLSHED_CONFIG`. Every field is optional.
//!
//! ```toml
//! data_dir = "/srv/toolshed"
//! poll_interval_secs = 5
//! max_parallel_removals = 4
//!
//! [process_names]
//! FastQC = ["fastqc", "java"]
//!
//! [environment_descriptions]
//! "java-11" = "OpenJDK 11 runtime"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use toolshed_core::{Environment, EnvironmentKey, ToolName};
use toolshed_engine::{
    ProcessNameTable, DEFAULT_LOW_SPACE_THRESHOLD, DEFAULT_MAX_PARALLEL_REMOVALS,
    DEFAULT_POLL_INTERVAL,
};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TOOLSHED_CONFIG";

/// Environment variable overriding `data_dir`.
pub const HOME_ENV: &str = "TOOLSHED_HOME";

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "toolshed";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The file as written by the user.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    data_dir: Option<PathBuf>,
    install_root: Option<PathBuf>,
    envs_root: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    max_parallel_removals: Option<usize>,
    low_space_warning_bytes: Option<u64>,
    process_names: BTreeMap<String, Vec<String>>,
    environment_descriptions: BTreeMap<String, String>,
}

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    /// Holds `tools.json` and `dependencies.json`
    pub data_dir: PathBuf,
    pub install_root: PathBuf,
    /// One sub-directory per environment key
    pub envs_root: PathBuf,
    pub poll_interval: Duration,
    pub max_parallel_removals: usize,
    pub low_space_warning_bytes: u64,
    pub process_names: BTreeMap<ToolName, Vec<String>>,
    pub environment_descriptions: BTreeMap<EnvironmentKey, String>,
}

impl Config {
    /// Loads the configuration.
    ///
    /// `explicit` (from `--config`) wins over `TOOLSHED_CONFIG`, which wins
    /// over the default location. Only the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

        let text = match named {
            Some(path) => Some((read(&path)?, path)),
            None => match default_config_path() {
                Some(path) if path.exists() => Some((read(&path)?, path)),
                _ => None,
            },
        };

        let home = env::var_os(HOME_ENV).map(PathBuf::from);
        match text {
            Some((text, path)) => {
                debug!(path = %path.display(), "loading config");
                Self::from_toml(&text, home).map_err(|source| ConfigError::Parse { path, source })
            }
            None => Ok(Self::resolve(RawConfig::default(), home)),
        }
    }

    /// Parses `text`; `home` stands in for `TOOLSHED_HOME`.
    pub fn from_toml(text: &str, home: Option<PathBuf>) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(text)?;
        Ok(Self::resolve(raw, home))
    }

    fn resolve(raw: RawConfig, home: Option<PathBuf>) -> Self {
        let data_dir = home.or(raw.data_dir).unwrap_or_else(default_data_dir);
        let install_root = raw
            .install_root
            .unwrap_or_else(|| data_dir.join("installed_tools"));
        let envs_root = raw.envs_root.unwrap_or_else(|| data_dir.join("envs_cache"));

        Self {
            data_dir,
            install_root,
            envs_root,
            poll_interval: raw
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            max_parallel_removals: raw
                .max_parallel_removals
                .unwrap_or(DEFAULT_MAX_PARALLEL_REMOVALS),
            low_space_warning_bytes: raw
                .low_space_warning_bytes
                .unwrap_or(DEFAULT_LOW_SPACE_THRESHOLD),
            process_names: raw
                .process_names
                .into_iter()
                .map(|(tool, names)| (ToolName::new(tool), names))
                .collect(),
            environment_descriptions: raw
                .environment_descriptions
                .into_iter()
                .map(|(key, text)| (EnvironmentKey::new(key), text))
                .collect(),
        }
    }

    /// The configured process-name heuristic table.
    pub fn process_name_table(&self) -> ProcessNameTable {
        self.process_names
            .iter()
            .map(|(tool, names)| (tool.clone(), names.clone()))
            .collect()
    }

    /// Describes the environment `key` under `envs_root`.
    pub fn environment(&self, key: EnvironmentKey) -> Environment {
        let description = self.environment_descriptions.get(&key).cloned();
        Environment::locate(key, &self.envs_root, description.as_deref())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// `<config dir>/toolshed/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_follow_data_dir() {
        let config = Config::from_toml("data_dir = \"/srv/shed\"", None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/shed"));
        assert_eq!(config.install_root, PathBuf::from("/srv/shed/installed_tools"));
        assert_eq!(config.envs_root, PathBuf::from("/srv/shed/envs_cache"));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_parallel_removals, 4);
        assert_eq!(config.low_space_warning_bytes, 10 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_home_overrides_data_dir() {
        let config =
            Config::from_toml("data_dir = \"/srv/shed\"", Some(PathBuf::from("/home/me/shed")))
                .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/me/shed"));
        assert_eq!(config.envs_root, PathBuf::from("/home/me/shed/envs_cache"));
    }

    #[test]
    fn test_tables() {
        let text = r#"
            envs_root = "/opt/envs"
            poll_interval_secs = 2

            [process_names]
            FastQC = ["fastqc", "java"]

            [environment_descriptions]
            "java-11" = "OpenJDK 11"
        "#;
        let config = Config::from_toml(text, Some(PathBuf::from("/d"))).unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(
            config.process_name_table().names_for(&ToolName::new("FastQC")),
            vec!["fastqc".to_string(), "java".to_string()]
        );
        // Unlisted tools fall back to their lower-cased name.
        assert_eq!(
            config.process_name_table().names_for(&ToolName::new("BWA")),
            vec!["bwa".to_string()]
        );

        let env = config.environment(EnvironmentKey::new("java-11"));
        assert_eq!(env.path, PathBuf::from("/opt/envs/java-11"));
        assert_eq!(env.description, "OpenJDK 11");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::from_toml("poll_secs = 3", None).is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_parallel_removals = 8\ninstall_root = \"/opt/tools\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.max_parallel_removals, 8);
        assert_eq!(config.install_root, PathBuf::from("/opt/tools"));
    }
}
