//! Tool identity and the persistent registry record.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{is_safe_component, DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique, stable name of an installed tool (e.g. "FastQC", "IQ-TREE").
///
/// The name is the registry's primary key and the key of the active-session
/// map, so at most one session per `ToolName` can be open at a time.
/// Persisted names are validated with [`ToolName::parse`] on the way in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Creates a ToolName without validation.
    ///
    /// Use for names that were already validated.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a ToolName from user input, rejecting empty names and names
    /// that could not be used as a single path component.
    pub fn parse(name: &str) -> DomainResult<Self> {
        if is_safe_component(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(DomainError::InvalidToolName(name.to_string()))
        }
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name is usable as a single path component.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_safe_component(&self.0)
    }

    /// Default process name for the name heuristic: the lower-cased tool name.
    #[must_use]
    pub fn default_process_name(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ToolName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for ToolName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ToolName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ToolName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Tool Status
// ============================================================================

/// Installation status of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Installed on disk and launchable.
    Installed,

    /// Known to the registry but not installed.
    #[default]
    #[serde(alias = "not-installed", alias = "not_installed")]
    Available,

    /// Installed, with a newer version available.
    Update,
}

impl ToolStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Available => "not installed",
            Self::Update => "update available",
        }
    }

    /// Returns true if the tool has files on disk.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed | Self::Update)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Registry Record
// ============================================================================

/// One record of the persistent tool registry.
///
/// The registry owns these records. Usage tracking never holds a private
/// copy: it reads the current record, applies [`ToolRecord::record_session`]
/// and writes it back through the store's update interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Unique tool name
    pub name: ToolName,

    /// Directory the tool is installed in
    pub install_path: PathBuf,

    /// End time of the most recent session
    #[serde(default, with = "last_used_format")]
    pub last_used: Option<DateTime<Utc>>,

    /// Cumulative runtime in seconds, monotonic across the tool's lifetime
    #[serde(default)]
    pub total_runtime: u64,

    /// Free-form category ("quality", "sequence", ...)
    #[serde(default)]
    pub category: String,

    /// Installation status
    #[serde(default)]
    pub status: ToolStatus,

    /// Fields owned by other collaborators (description, version, ...),
    /// carried through read-modify-write untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ToolRecord {
    /// Creates an installed tool record with no recorded usage.
    pub fn new(name: impl Into<ToolName>, install_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            install_path: install_path.into(),
            last_used: None,
            total_runtime: 0,
            category: String::new(),
            status: ToolStatus::Installed,
            extra: serde_json::Map::new(),
        }
    }

    /// Sets the category (builder style).
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the status (builder style).
    #[must_use]
    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the install directory.
    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// Adds one closed session to the usage statistics.
    ///
    /// The update is additive: `total_runtime` grows by `duration_secs` and
    /// never decreases. Returns the new total.
    pub fn record_session(&mut self, duration_secs: u64, ended_at: DateTime<Utc>) -> u64 {
        self.total_runtime = self.total_runtime.saturating_add(duration_secs);
        self.last_used = Some(ended_at);
        self.total_runtime
    }

    /// Clears usage statistics (maintenance utility).
    pub fn reset_usage(&mut self) {
        self.total_runtime = 0;
        self.last_used = None;
    }
}

/// Serde adapter for `last_used`.
///
/// Writes RFC 3339. Reads RFC 3339 as well as offset-less ISO-8601
/// timestamps (`2025-01-15T10:30:00`), which are interpreted as UTC.
mod last_used_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Some(naive.and_utc()))
            .map_err(|e| de::Error::custom(format!("invalid last_used {raw:?}: {e}")))
    }
}
