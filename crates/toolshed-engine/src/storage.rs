//! Storage accounting: directory sizes, free space and deletion savings.
//!
//! All sizes are bytes. Unreadable entries contribute zero and are counted
//! in the returned reports; a free-space query that fails reads as zero free
//! bytes and is logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use toolshed_core::{
    Environment, EnvironmentKey, FilesystemProbe, ItemSize, SavingsBreakdown, SizeReport,
    ToolName, ToolRecord,
};

/// Default free-space warning threshold: 10 GiB.
pub const DEFAULT_LOW_SPACE_THRESHOLD: u64 = 10 * 1024 * 1024 * 1024;

/// Pass/fail answer of [`StorageAccountant::check_sufficient_space`] with
/// the numbers behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpaceCheck {
    pub sufficient: bool,
    pub free_bytes: u64,
    pub required_bytes: u64,
}

/// Free space is under the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LowSpaceWarning {
    pub free_bytes: u64,
    pub required_bytes: u64,
    pub threshold_bytes: u64,
}

/// Storage used by installed tools and environments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    /// Per-tool sizes, largest first
    pub tools: Vec<ItemSize<ToolName>>,
    /// Per-environment sizes, largest first
    pub environments: Vec<ItemSize<EnvironmentKey>>,
    pub tools_bytes: u64,
    pub environments_bytes: u64,
    /// Free bytes on the install volume, `None` if it could not be read
    pub free_bytes: Option<u64>,
}

impl StorageSummary {
    pub fn total_bytes(&self) -> u64 {
        self.tools_bytes.saturating_add(self.environments_bytes)
    }

    pub fn largest_tool(&self) -> Option<&ItemSize<ToolName>> {
        self.tools.first()
    }
}

/// Computes sizes through a [`FilesystemProbe`].
#[derive(Clone)]
pub struct StorageAccountant {
    fs: Arc<dyn FilesystemProbe>,
    install_volume: PathBuf,
    low_space_threshold: u64,
}

impl StorageAccountant {
    /// `install_volume` is any path on the volume that hosts installs.
    pub fn new(fs: Arc<dyn FilesystemProbe>, install_volume: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            install_volume: install_volume.into(),
            low_space_threshold: DEFAULT_LOW_SPACE_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_low_space_threshold(mut self, bytes: u64) -> Self {
        self.low_space_threshold = bytes;
        self
    }

    pub fn install_volume(&self) -> &Path {
        &self.install_volume
    }

    /// The probe sizes are read through.
    pub fn filesystem(&self) -> Arc<dyn FilesystemProbe> {
        Arc::clone(&self.fs)
    }

    /// Recursive size of `path`. Unreadable entries are skipped and counted.
    pub fn size_of(&self, path: &Path) -> SizeReport {
        let report = self.fs.size_of(path);
        if report.skipped_entries > 0 {
            debug!(
                path = %path.display(),
                bytes = report.bytes,
                skipped = report.skipped_entries,
                "size is a lower bound, some entries were unreadable"
            );
        }
        report
    }

    fn free_bytes(&self) -> Option<u64> {
        match self.fs.free_space(&self.install_volume) {
            Ok(free) => Some(free),
            Err(e) => {
                warn!(
                    volume = %self.install_volume.display(),
                    error = %e,
                    "free space unavailable"
                );
                None
            }
        }
    }

    /// Is there room for `required_bytes` more on the install volume?
    pub fn check_sufficient_space(&self, required_bytes: u64) -> SpaceCheck {
        let free_bytes = self.free_bytes().unwrap_or(0);
        SpaceCheck {
            sufficient: free_bytes >= required_bytes,
            free_bytes,
            required_bytes,
        }
    }

    /// Returns a warning when free space is under the threshold.
    pub fn low_space_warning(&self, required_bytes: u64) -> Option<LowSpaceWarning> {
        let free_bytes = self.free_bytes()?;
        (free_bytes < self.low_space_threshold).then_some(LowSpaceWarning {
            free_bytes,
            required_bytes,
            threshold_bytes: self.low_space_threshold,
        })
    }

    fn measure<K>(&self, key: K, path: PathBuf) -> ItemSize<K> {
        let report = self.size_of(&path);
        ItemSize {
            key,
            path,
            bytes: report.bytes,
            skipped_entries: report.skipped_entries,
        }
    }

    /// Itemized space freed by removing `tools` and `environments`.
    ///
    /// The total equals the sum of the items exactly.
    pub fn deletion_savings<T, E>(&self, tools: T, environments: E) -> SavingsBreakdown
    where
        T: IntoIterator<Item = (ToolName, PathBuf)>,
        E: IntoIterator<Item = (EnvironmentKey, PathBuf)>,
    {
        let tools = tools
            .into_iter()
            .map(|(name, path)| self.measure(name, path))
            .collect();
        let environments = environments
            .into_iter()
            .map(|(key, path)| self.measure(key, path))
            .collect();
        SavingsBreakdown::new(tools, environments)
    }

    /// Sizes every installed tool and every environment.
    pub fn summary(&self, tools: &[ToolRecord], environments: &[Environment]) -> StorageSummary {
        let mut tool_sizes: Vec<ItemSize<ToolName>> = tools
            .iter()
            .filter(|t| t.status.is_installed())
            .map(|t| self.measure(t.name.clone(), t.install_path.clone()))
            .collect();
        tool_sizes.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.key.cmp(&b.key)));

        let mut env_sizes: Vec<ItemSize<EnvironmentKey>> = environments
            .iter()
            .map(|e| self.measure(e.key.clone(), e.path.clone()))
            .collect();
        env_sizes.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.key.cmp(&b.key)));

        let tools_bytes = total_of(&tool_sizes);
        let environments_bytes = total_of(&env_sizes);

        StorageSummary {
            tools: tool_sizes,
            environments: env_sizes,
            tools_bytes,
            environments_bytes,
            free_bytes: self.free_bytes(),
        }
    }
}

fn total_of<K>(items: &[ItemSize<K>]) -> u64 {
    items.iter().fold(0u64, |acc, i| acc.saturating_add(i.bytes))
}
