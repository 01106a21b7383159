//! Shared runtime environments (toolchains, interpreters) that tools depend on.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{is_safe_component, DomainError, DomainResult};

/// Identifier of a shared environment (e.g. "java-11", "python-3.8").
///
/// The key doubles as the environment's directory name under the
/// environments root. Deserialization goes through [`EnvironmentKey::parse`],
/// so a persisted key can never name anything but a direct child of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct EnvironmentKey(String);

impl EnvironmentKey {
    /// Creates an EnvironmentKey without validation.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Creates an EnvironmentKey from user input.
    pub fn parse(key: &str) -> DomainResult<Self> {
        if is_safe_component(key) {
            Ok(Self(key.to_string()))
        } else {
            Err(DomainError::InvalidEnvironmentKey(key.to_string()))
        }
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is usable as a single directory name.
    ///
    /// Always true for parsed keys; keys built with [`EnvironmentKey::new`]
    /// are not checked.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_safe_component(&self.0)
    }

    /// Derives a version string from the key.
    ///
    /// `java-11` → `11`, `python-3.8` → `3.8`; keys without a known runtime
    /// prefix yield `"unknown"`.
    #[must_use]
    pub fn detect_version(&self) -> String {
        let lower = self.0.to_lowercase();
        for runtime in ["java", "python"] {
            if let Some(rest) = lower.strip_prefix(runtime) {
                let version = rest.trim_start_matches(['-', '_']);
                if !version.is_empty() {
                    return version.to_string();
                }
            }
        }
        "unknown".to_string()
    }
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for EnvironmentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for EnvironmentKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EnvironmentKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A shared environment on disk.
///
/// Not owned by any single tool; referenced by zero or more tools through
/// dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub key: EnvironmentKey,
    pub path: PathBuf,
    pub description: String,
    pub version: String,
}

impl Environment {
    /// Describes the environment `key` located under `envs_root`.
    ///
    /// Falls back to `"<key> runtime environment"` when no description is
    /// configured.
    pub fn locate(key: EnvironmentKey, envs_root: &Path, description: Option<&str>) -> Self {
        let path = envs_root.join(key.as_str());
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("{key} runtime environment"));
        let version = key.detect_version();
        Self {
            key,
            path,
            description,
            version,
        }
    }
}
