//! Previewable, then committed, batch deletion of tools.
//!
//! `plan` is read-only: it validates the names, predicts which shared
//! environments become orphaned and sizes everything. `commit` re-reads the
//! registry and the dependency configuration, refuses a plan whose inputs
//! changed, and then deletes tool by tool. A failure on one tool is recorded
//! and the batch goes on. Directory removal and the locked registry and
//! dependency writes run on the blocking pool.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A removal task that dies is reported as a failure of its item

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use toolshed_core::{
    Clock, CloseReason, CommitSummary, DeletionPlan, EnvironmentKey, ToolName, ToolRecord,
};
use toolshed_store::{DependencyStore, RegistryStore, StoreError};

use crate::graph::DependencyGraph;
use crate::storage::StorageAccountant;
use crate::tracker::TrackerHandle;

/// Default number of concurrent directory removals.
pub const DEFAULT_MAX_PARALLEL_REMOVALS: usize = 4;

// ============================================================================
// Errors
// ============================================================================

/// Errors that reject a plan or a commit as a whole.
///
/// Per-item removal failures are not errors; they are reported in
/// [`CommitSummary`].
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Names absent from the registry.
    #[error("unknown tools: {}", join_names(.0))]
    UnknownTools(Vec<ToolName>),

    /// The registry or the dependency configuration changed since the plan
    /// was made. Nothing was deleted.
    #[error("stale plan: {0}; re-plan and confirm again")]
    StalePlan(String),

    /// No tools were selected.
    #[error("no tools selected")]
    EmptySelection,

    /// Reading the registry or dependency configuration failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_names(names: &[ToolName]) -> String {
    names
        .iter()
        .map(ToolName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Deletion Planner
// ============================================================================

pub struct DeletionPlanner {
    registry: Arc<dyn RegistryStore>,
    dependencies: Arc<dyn DependencyStore>,
    storage: StorageAccountant,
    envs_root: PathBuf,
    tracker: Option<TrackerHandle>,
    clock: Arc<dyn Clock>,
    max_parallel: usize,
}

impl DeletionPlanner {
    /// `envs_root` is the directory holding one sub-directory per
    /// environment key.
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        dependencies: Arc<dyn DependencyStore>,
        storage: StorageAccountant,
        envs_root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            dependencies,
            storage,
            envs_root: envs_root.into(),
            tracker: None,
            clock,
            max_parallel: DEFAULT_MAX_PARALLEL_REMOVALS,
        }
    }

    /// Active sessions of removed tools are closed through `tracker`.
    #[must_use]
    pub fn with_tracker(mut self, tracker: TrackerHandle) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Caps concurrent directory removals (at least one).
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Directory of `key`, or `None` unless it is a direct child of the
    /// environments root.
    fn environment_path(&self, key: &EnvironmentKey) -> Option<PathBuf> {
        if !key.is_valid() {
            return None;
        }
        let path = self.envs_root.join(key.as_str());
        (path.parent() == Some(self.envs_root.as_path())).then_some(path)
    }

    /// Environments orphaned by removing `tools`, with the directory each
    /// one would be reclaimed from. Keys without a safe directory are left
    /// out.
    fn reclaimable_orphans<'a, I>(
        &self,
        graph: &DependencyGraph,
        tools: I,
    ) -> BTreeMap<EnvironmentKey, PathBuf>
    where
        I: IntoIterator<Item = &'a ToolName>,
    {
        graph
            .orphaned_after_removing(tools)
            .into_iter()
            .filter_map(|key| match self.environment_path(&key) {
                Some(path) => Some((key, path)),
                None => {
                    warn!(environment = %key, "Refusing to reclaim environment outside the environments root");
                    None
                }
            })
            .collect()
    }

    fn load_graph(&self) -> Result<DependencyGraph, PlannerError> {
        Ok(DependencyGraph::from_config(&self.dependencies.load()?))
    }

    /// Builds an immutable preview of deleting `names`.
    ///
    /// # Errors
    ///
    /// - `PlannerError::EmptySelection` if `names` is empty
    /// - `PlannerError::UnknownTools` listing every name not in the registry
    /// - `PlannerError::Store` if the registry or configuration is unreadable
    pub fn plan(&self, names: &[ToolName]) -> Result<DeletionPlan, PlannerError> {
        if names.is_empty() {
            return Err(PlannerError::EmptySelection);
        }
        let selected: BTreeSet<&ToolName> = names.iter().collect();

        let records: HashMap<ToolName, ToolRecord> = self
            .registry
            .read_all()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let unknown: Vec<ToolName> = selected
            .iter()
            .filter(|name| !records.contains_key(**name))
            .map(|name| (*name).clone())
            .collect();
        if !unknown.is_empty() {
            return Err(PlannerError::UnknownTools(unknown));
        }

        let graph = self.load_graph()?;
        let orphans = self.reclaimable_orphans(&graph, selected.iter().copied());

        let tools = selected.iter().filter_map(|name| {
            records
                .get(*name)
                .map(|r| (r.name.clone(), r.install_path.clone()))
        });
        let environments = orphans.into_iter();
        let savings = self.storage.deletion_savings(tools, environments);

        info!(
            tools = savings.tools().len(),
            orphaned_environments = savings.environments().len(),
            bytes = savings.total_bytes(),
            "Deletion planned"
        );
        Ok(DeletionPlan::new(savings, self.clock.now()))
    }

    /// Executes `plan`.
    ///
    /// # Errors
    ///
    /// - `PlannerError::StalePlan` if a planned tool disappeared or moved,
    ///   or the predicted orphan set changed; nothing is deleted
    /// - `PlannerError::Store` if the current state cannot be read
    pub async fn commit(&self, plan: &DeletionPlan) -> Result<CommitSummary, PlannerError> {
        let mut graph = self.revalidate(plan)?;
        let attempted = plan.tool_names();
        // Orphans are confirmed against everything attempted, before any edge
        // is dropped, so an environment shared only by planned tools is
        // reclaimed even when one of those tools fails.
        let confirmed_orphans = self.reclaimable_orphans(&graph, &attempted);

        self.stop_sessions(&attempted).await;

        let mut summary = CommitSummary::default();

        let tool_items: Vec<(ToolName, PathBuf)> = plan
            .tools()
            .iter()
            .map(|t| (t.key.clone(), t.path.clone()))
            .collect();
        let mut outcomes = self.remove_paths(tool_items).await;

        for item in plan.tools() {
            let name = &item.key;
            match take_outcome(&mut outcomes, name) {
                Ok(bytes) => {
                    self.unregister(name).await;
                    graph.remove_dependencies_of(name);
                    info!(tool = %name, bytes, "Tool removed");
                    summary.tool_removed(name.clone(), bytes);
                }
                Err(reason) => {
                    warn!(tool = %name, reason = %reason, "Tool removal failed");
                    summary.tool_failed(name.clone(), reason);
                }
            }
        }

        let env_items: Vec<(EnvironmentKey, PathBuf)> = plan
            .environments()
            .iter()
            .filter_map(|e| {
                confirmed_orphans
                    .get(&e.key)
                    .map(|path| (e.key.clone(), path.clone()))
            })
            .collect();
        let mut env_outcomes = self.remove_paths(env_items.clone()).await;

        for (key, _) in &env_items {
            match take_outcome(&mut env_outcomes, key) {
                Ok(bytes) => {
                    graph.materialize_environment(key.clone());
                    if !graph.release_environment(key) {
                        warn!(
                            environment = %key,
                            users = ?graph.users_of(key),
                            "Environment removed while failed tools still reference it"
                        );
                    }
                    info!(environment = %key, bytes, "Environment removed");
                    summary.environment_removed(key.clone(), bytes);
                }
                Err(reason) => {
                    warn!(environment = %key, reason = %reason, "Environment removal failed");
                    summary.environment_failed(key.clone(), reason);
                }
            }
        }

        self.persist_graph(&graph).await;

        info!(
            removed_tools = summary.succeeded_tools.len(),
            failed_tools = summary.failed_tools.len(),
            removed_environments = summary.succeeded_environments.len(),
            failed_environments = summary.failed_environments.len(),
            recovered_bytes = summary.recovered_bytes,
            "Deletion committed"
        );
        Ok(summary)
    }

    /// Re-reads current state and compares it with the plan's inputs.
    /// Returns the fresh graph on success.
    fn revalidate(&self, plan: &DeletionPlan) -> Result<DependencyGraph, PlannerError> {
        if plan.tools().is_empty() {
            return Err(PlannerError::EmptySelection);
        }

        let records: HashMap<ToolName, ToolRecord> = self
            .registry
            .read_all()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        for item in plan.tools() {
            match records.get(&item.key) {
                None => {
                    return Err(PlannerError::StalePlan(format!(
                        "{} is no longer in the registry",
                        item.key
                    )))
                }
                Some(record) if record.install_path != item.path => {
                    return Err(PlannerError::StalePlan(format!(
                        "{} moved to {}",
                        item.key,
                        record.install_path.display()
                    )))
                }
                Some(_) => {}
            }
        }

        let graph = self.load_graph()?;
        let orphans: BTreeSet<EnvironmentKey> = self
            .reclaimable_orphans(&graph, &plan.tool_names())
            .into_keys()
            .collect();
        let planned = plan.environment_keys();
        if orphans != planned {
            debug!(planned = ?planned, current = ?orphans, "Orphan set changed");
            return Err(PlannerError::StalePlan(
                "the set of orphaned environments changed".to_string(),
            ));
        }

        Ok(graph)
    }

    async fn stop_sessions(&self, tools: &BTreeSet<ToolName>) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        for tool in tools {
            match tracker
                .stop_tracking_with(tool.clone(), CloseReason::ToolRemoved)
                .await
            {
                Ok(Some(closed)) => {
                    info!(tool = %tool, duration_secs = closed.duration_secs, "Closed session of removed tool");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tool = %tool, error = %e, "Could not stop session before removal");
                }
            }
        }
    }

    /// Drops the registry entry of a tool whose directory is gone.
    async fn unregister(&self, name: &ToolName) {
        let registry = Arc::clone(&self.registry);
        let owned = name.clone();
        match tokio::task::spawn_blocking(move || registry.remove(&owned)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!(tool = %name, error = %e, "Directory removed but registry entry kept");
            }
            Err(e) => {
                error!(tool = %name, error = %e, "Registry removal task failed, entry kept");
            }
        }
    }

    async fn persist_graph(&self, graph: &DependencyGraph) {
        let dependencies = Arc::clone(&self.dependencies);
        let config = graph.to_config();
        match tokio::task::spawn_blocking(move || dependencies.save(&config)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to persist dependency changes"),
            Err(e) => error!(error = %e, "Dependency save task failed"),
        }
    }

    /// Measures and removes each path, at most `max_parallel` at a time.
    ///
    /// The size is read right before removal, so the reported bytes are
    /// what was actually removed.
    async fn remove_paths<K>(&self, items: Vec<(K, PathBuf)>) -> HashMap<K, Result<u64, String>>
    where
        K: Clone + Eq + Hash + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for (key, path) in items {
            let fs = self.storage.filesystem();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = tokio::task::spawn_blocking(move || {
                    let size = fs.size_of(&path);
                    fs.remove(&path)
                        .map(|()| size.bytes)
                        .map_err(|e| describe_failure(&path, &e))
                })
                .await
                .unwrap_or_else(|e| Err(format!("removal task failed: {e}")));
                (key, outcome)
            });
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    outcomes.insert(key, outcome);
                }
                Err(e) => warn!(error = %e, "Removal task aborted"),
            }
        }
        outcomes
    }
}

fn take_outcome<K: Eq + Hash>(
    outcomes: &mut HashMap<K, Result<u64, String>>,
    key: &K,
) -> Result<u64, String> {
    outcomes
        .remove(key)
        .unwrap_or_else(|| Err("removal task aborted".to_string()))
}

fn describe_failure(path: &Path, err: &std::io::Error) -> String {
    format!("{}: {err}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use toolshed_core::{FilesystemProbe, ManualClock, SizeReport};
    use toolshed_store::{DependencyConfig, MemoryDependencyStore, MemoryRegistry};

    const MB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct FakeFs {
        sizes: Mutex<HashMap<PathBuf, u64>>,
        fail: Mutex<BTreeSet<PathBuf>>,
    }

    impl FilesystemProbe for FakeFs {
        fn size_of(&self, path: &Path) -> SizeReport {
            self.sizes
                .lock()
                .unwrap()
                .get(path)
                .map(|b| SizeReport::new(*b))
                .unwrap_or_else(SizeReport::missing)
        }

        fn free_space(&self, _: &Path) -> io::Result<u64> {
            Ok(u64::MAX)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            if self.fail.lock().unwrap().contains(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file in use"));
            }
            self.sizes.lock().unwrap().remove(path);
            Ok(())
        }
    }

    fn planner(fs: Arc<FakeFs>) -> (DeletionPlanner, Arc<MemoryRegistry>, Arc<MemoryDependencyStore>) {
        fs.sizes.lock().unwrap().extend([
            (PathBuf::from("/tools/A"), 50 * MB),
            (PathBuf::from("/tools/B"), 30 * MB),
            (PathBuf::from("/envs/E"), 20 * MB),
        ]);
        let registry = Arc::new(MemoryRegistry::with_records([
            ToolRecord::new("A", "/tools/A"),
            ToolRecord::new("B", "/tools/B"),
        ]));
        let deps = Arc::new(MemoryDependencyStore::new(DependencyConfig::from_pairs([
            (ToolName::new("A"), vec![EnvironmentKey::new("E")]),
            (ToolName::new("B"), vec![EnvironmentKey::new("E")]),
        ])));
        let storage = StorageAccountant::new(fs, "/tools");
        let planner = DeletionPlanner::new(
            registry.clone(),
            deps.clone(),
            storage,
            "/envs",
            Arc::new(ManualClock::default()),
        );
        (planner, registry, deps)
    }

    #[test]
    fn test_plan_rejects_empty_and_unknown() {
        let (planner, _, _) = planner(Arc::new(FakeFs::default()));
        assert!(matches!(planner.plan(&[]), Err(PlannerError::EmptySelection)));

        let err = planner
            .plan(&[ToolName::new("A"), ToolName::new("X"), ToolName::new("Y")])
            .unwrap_err();
        match err {
            PlannerError::UnknownTools(names) => {
                assert_eq!(names, vec![ToolName::new("X"), ToolName::new("Y")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plan_single_tool_keeps_shared_environment() {
        let (planner, _, _) = planner(Arc::new(FakeFs::default()));
        let plan = planner.plan(&[ToolName::new("A")]).unwrap();
        assert!(plan.environments().is_empty());
        assert_eq!(plan.total_bytes(), 50 * MB);
    }

    #[tokio::test]
    async fn test_commit_all_succeed() {
        let fs = Arc::new(FakeFs::default());
        let (planner, registry, deps) = planner(fs.clone());

        let plan = planner.plan(&[ToolName::new("A"), ToolName::new("B")]).unwrap();
        let summary = planner.commit(&plan).await.unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.recovered_bytes, 100 * MB);
        assert!(registry.read_all().unwrap().is_empty());
        assert!(deps.load().unwrap().tool_dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_commit_moved_tool_is_stale() {
        let fs = Arc::new(FakeFs::default());
        let (planner, registry, _) = planner(fs.clone());

        let plan = planner.plan(&[ToolName::new("A")]).unwrap();
        registry.upsert(ToolRecord::new("A", "/elsewhere/A")).unwrap();

        assert!(matches!(
            planner.commit(&plan).await,
            Err(PlannerError::StalePlan(_))
        ));
        assert!(fs.sizes.lock().unwrap().contains_key(Path::new("/tools/A")));
    }

    #[test]
    fn test_environment_path_stays_under_root() {
        let (planner, _, _) = planner(Arc::new(FakeFs::default()));
        assert_eq!(
            planner.environment_path(&EnvironmentKey::new("E")),
            Some(PathBuf::from("/envs/E"))
        );
        for key in ["..", "", ".", "../data", "a/b"] {
            assert_eq!(planner.environment_path(&EnvironmentKey::new(key)), None, "{key:?}");
        }
    }

    #[tokio::test]
    async fn test_commit_never_removes_parent_or_root() {
        let fs = Arc::new(FakeFs::default());
        let (planner, _, deps) = planner(fs.clone());
        fs.sizes.lock().unwrap().extend([
            (PathBuf::from("/"), 500 * MB),
            (PathBuf::from("/envs"), 20 * MB),
        ]);
        deps.save(&DependencyConfig::from_pairs([
            (
                ToolName::new("A"),
                vec![EnvironmentKey::new(".."), EnvironmentKey::new("")],
            ),
            (ToolName::new("B"), vec![EnvironmentKey::new("E")]),
        ]))
        .unwrap();

        let plan = planner.plan(&[ToolName::new("A")]).unwrap();
        assert!(plan.environments().is_empty());

        let summary = planner.commit(&plan).await.unwrap();
        assert!(summary.succeeded_environments.is_empty());
        assert_eq!(summary.recovered_bytes, 50 * MB);

        let sizes = fs.sizes.lock().unwrap();
        assert!(sizes.contains_key(Path::new("/")));
        assert!(sizes.contains_key(Path::new("/envs")));
        assert!(sizes.contains_key(Path::new("/envs/E")));
    }

    #[test]
    fn test_error_display() {
        let err = PlannerError::UnknownTools(vec![ToolName::new("X"), ToolName::new("Y")]);
        assert_eq!(err.to_string(), "unknown tools: X, Y");
    }
}
