//! Deletion plans and commit summaries.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentKey;
use crate::tool::ToolName;

// ============================================================================
// Savings
// ============================================================================

/// Size of one item (a tool install or an environment) on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSize<K> {
    pub key: K,
    pub path: PathBuf,
    pub bytes: u64,
    /// Entries that could not be read while sizing
    pub skipped_entries: u64,
}

/// Space a deletion would free, itemized.
///
/// Totals are derived from the items at construction and cannot be set
/// independently, so `total_bytes == tools_bytes + environments_bytes ==
/// sum of every item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsBreakdown {
    tools: Vec<ItemSize<ToolName>>,
    environments: Vec<ItemSize<EnvironmentKey>>,
    tools_bytes: u64,
    environments_bytes: u64,
}

impl SavingsBreakdown {
    pub fn new(tools: Vec<ItemSize<ToolName>>, environments: Vec<ItemSize<EnvironmentKey>>) -> Self {
        let tools_bytes = tools.iter().fold(0u64, |acc, i| acc.saturating_add(i.bytes));
        let environments_bytes = environments
            .iter()
            .fold(0u64, |acc, i| acc.saturating_add(i.bytes));
        Self {
            tools,
            environments,
            tools_bytes,
            environments_bytes,
        }
    }

    pub fn tools(&self) -> &[ItemSize<ToolName>] {
        &self.tools
    }

    pub fn environments(&self) -> &[ItemSize<EnvironmentKey>] {
        &self.environments
    }

    pub fn tools_bytes(&self) -> u64 {
        self.tools_bytes
    }

    pub fn environments_bytes(&self) -> u64 {
        self.environments_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.tools_bytes.saturating_add(self.environments_bytes)
    }
}

// ============================================================================
// Deletion Plan
// ============================================================================

/// Immutable preview of a batch deletion.
///
/// Valid for one confirm/commit cycle only; the planner re-validates it
/// against current state before deleting anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPlan {
    savings: SavingsBreakdown,
    created_at: DateTime<Utc>,
}

impl DeletionPlan {
    pub fn new(savings: SavingsBreakdown, created_at: DateTime<Utc>) -> Self {
        Self {
            savings,
            created_at,
        }
    }

    pub fn savings(&self) -> &SavingsBreakdown {
        &self.savings
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Target tools with their install paths and sizes.
    pub fn tools(&self) -> &[ItemSize<ToolName>] {
        self.savings.tools()
    }

    /// Environments predicted to become orphaned.
    pub fn environments(&self) -> &[ItemSize<EnvironmentKey>] {
        self.savings.environments()
    }

    pub fn tool_names(&self) -> BTreeSet<ToolName> {
        self.tools().iter().map(|t| t.key.clone()).collect()
    }

    pub fn environment_keys(&self) -> BTreeSet<EnvironmentKey> {
        self.environments().iter().map(|e| e.key.clone()).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.savings.total_bytes()
    }
}

// ============================================================================
// Commit Summary
// ============================================================================

/// A per-item failure during commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure<K> {
    pub key: K,
    pub reason: String,
}

/// What a commit actually did.
///
/// "Some succeeded, some failed" is an expected outcome, so partial failure
/// is reported here instead of as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub succeeded_tools: Vec<ToolName>,
    pub failed_tools: Vec<ItemFailure<ToolName>>,
    pub succeeded_environments: Vec<EnvironmentKey>,
    pub failed_environments: Vec<ItemFailure<EnvironmentKey>>,
    /// Bytes measured on the items that were actually removed
    pub recovered_bytes: u64,
}

impl CommitSummary {
    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_tools.is_empty() && self.failed_environments.is_empty()
    }

    pub(crate) fn add_recovered(&mut self, bytes: u64) {
        self.recovered_bytes = self.recovered_bytes.saturating_add(bytes);
    }

    /// Records a removed tool and the bytes it freed.
    pub fn tool_removed(&mut self, name: ToolName, bytes: u64) {
        self.succeeded_tools.push(name);
        self.add_recovered(bytes);
    }

    pub fn tool_failed(&mut self, name: ToolName, reason: impl Into<String>) {
        self.failed_tools.push(ItemFailure {
            key: name,
            reason: reason.into(),
        });
    }

    /// Records a removed environment and the bytes it freed.
    pub fn environment_removed(&mut self, key: EnvironmentKey, bytes: u64) {
        self.succeeded_environments.push(key);
        self.add_recovered(bytes);
    }

    pub fn environment_failed(&mut self, key: EnvironmentKey, reason: impl Into<String>) {
        self.failed_environments.push(ItemFailure {
            key,
            reason: reason.into(),
        });
    }
}
