//! Tool → environment dependency graph.
//!
//! The graph keeps a forward index (tool → environments it needs) and a
//! reverse index (environment → tools that need it). Every mutation updates
//! both inside one `&mut self` call, so the two indices never disagree.
//!
//! An environment appears in the reverse index while at least one tool
//! depends on it, or while it is materialized with zero referrers pending
//! cleanup. The graph never deletes anything on disk; reclaiming an orphaned
//! environment is the deletion planner's job.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;
use toolshed_core::{EnvironmentKey, ToolName};
use toolshed_store::DependencyConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    forward: BTreeMap<ToolName, BTreeSet<EnvironmentKey>>,
    reverse: BTreeMap<EnvironmentKey, BTreeSet<ToolName>>,
}

/// Counts reported by [`DependencyGraph::summary`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencySummary {
    /// Tools with at least one dependency
    pub tool_count: usize,
    /// Environments in the reverse index, referenced or not
    pub environment_count: usize,
    /// Number of referring tools per environment
    pub referrers: BTreeMap<EnvironmentKey, usize>,
    /// Environments materialized with zero referrers
    pub unreferenced: Vec<EnvironmentKey>,
    /// Environments used by more than one tool
    pub shared: Vec<EnvironmentKey>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from the persisted configuration.
    ///
    /// Edges whose tool name or environment key is not a single path
    /// component are skipped with a warning.
    pub fn from_config(config: &DependencyConfig) -> Self {
        let mut graph = Self::new();
        for (tool, envs) in &config.tool_dependencies {
            if !tool.is_valid() {
                warn!(tool = %tool, "Skipping dependencies of invalid tool name");
                continue;
            }
            for env in envs {
                if !env.is_valid() {
                    warn!(tool = %tool, environment = %env, "Skipping invalid environment key");
                    continue;
                }
                graph.add_dependency(tool.clone(), env.clone());
            }
        }
        graph
    }

    /// Forward edges in persistable form. Zero-referrer environments are not
    /// part of the configuration and are dropped.
    pub fn to_config(&self) -> DependencyConfig {
        DependencyConfig::from_pairs(
            self.forward
                .iter()
                .map(|(tool, envs)| (tool.clone(), envs.iter().cloned().collect::<Vec<_>>())),
        )
    }

    /// Environments `tool` depends on (empty if none).
    pub fn dependencies_of(&self, tool: &ToolName) -> BTreeSet<EnvironmentKey> {
        self.forward.get(tool).cloned().unwrap_or_default()
    }

    /// Tools depending on `env` (empty if none).
    pub fn users_of(&self, env: &EnvironmentKey) -> BTreeSet<ToolName> {
        self.reverse.get(env).cloned().unwrap_or_default()
    }

    /// Returns true if `env` is in the reverse index.
    pub fn contains_environment(&self, env: &EnvironmentKey) -> bool {
        self.reverse.contains_key(env)
    }

    /// All tools with dependencies, in name order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolName> {
        self.forward.keys()
    }

    /// All environments in the reverse index, in key order.
    pub fn environments(&self) -> impl Iterator<Item = &EnvironmentKey> {
        self.reverse.keys()
    }

    /// Records that `tool` depends on `env`.
    pub fn add_dependency(&mut self, tool: ToolName, env: EnvironmentKey) {
        self.forward
            .entry(tool.clone())
            .or_default()
            .insert(env.clone());
        self.reverse.entry(env).or_default().insert(tool);
    }

    /// Drops every edge from `tool`, returning the environments it used.
    ///
    /// Environments left without referrers stay in the reverse index with an
    /// empty referrer set until they are released.
    pub fn remove_dependencies_of(&mut self, tool: &ToolName) -> BTreeSet<EnvironmentKey> {
        let envs = self.forward.remove(tool).unwrap_or_default();
        for env in &envs {
            if let Some(users) = self.reverse.get_mut(env) {
                users.remove(tool);
            }
        }
        envs
    }

    /// Adds `env` to the reverse index without referrers, if absent.
    pub fn materialize_environment(&mut self, env: EnvironmentKey) {
        self.reverse.entry(env).or_default();
    }

    /// Removes `env` from the reverse index if nothing references it.
    ///
    /// Returns true if it was removed.
    pub fn release_environment(&mut self, env: &EnvironmentKey) -> bool {
        match self.reverse.get(env) {
            Some(users) if users.is_empty() => {
                self.reverse.remove(env);
                true
            }
            _ => false,
        }
    }

    /// Environments that would have no referrers left if every tool in
    /// `tools` were removed.
    ///
    /// Only environments used by at least one of `tools` are considered.
    /// Pure: the graph is not modified.
    pub fn orphaned_after_removing<'a, I>(&self, tools: I) -> BTreeSet<EnvironmentKey>
    where
        I: IntoIterator<Item = &'a ToolName>,
    {
        let candidates: BTreeSet<&ToolName> = tools.into_iter().collect();

        candidates
            .iter()
            .filter_map(|tool| self.forward.get(*tool))
            .flatten()
            .filter(|env| {
                self.reverse
                    .get(*env)
                    .map(|users| users.iter().all(|user| candidates.contains(user)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> DependencySummary {
        let referrers: BTreeMap<EnvironmentKey, usize> = self
            .reverse
            .iter()
            .map(|(env, users)| (env.clone(), users.len()))
            .collect();
        let unreferenced = referrers
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(env, _)| env.clone())
            .collect();
        let shared = referrers
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(env, _)| env.clone())
            .collect();

        DependencySummary {
            tool_count: self.forward.len(),
            environment_count: self.reverse.len(),
            referrers,
            unreferenced,
            shared,
        }
    }
}
