//! Integration tests for plan/commit deletion.
//!
//! Tools and environments are real directories in a temporary data dir; the
//! registry and dependency configuration are the JSON stores. Removal
//! failures are injected by wrapping [`LocalFilesystem`].
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use toolshed_core::{
    EnvironmentKey, FilesystemProbe, ManualClock, SizeReport, ToolName, ToolRecord,
};
use toolshed_engine::{
    spawn_tracker, DeletionPlanner, DependencyGraph, LocalFilesystem, PlannerError,
    StorageAccountant,
};
use toolshed_store::{
    DependencyConfig, DependencyStore, JsonDependencyStore, JsonRegistry,
    MemoryDependencyStore, RegistryStore, DEPENDENCIES_FILE, REGISTRY_FILE,
};

const KB: u64 = 1024;

// ============================================================================
// Test Helpers
// ============================================================================

/// Local filesystem that refuses to remove selected paths.
struct FlakyFs {
    inner: LocalFilesystem,
    locked: Mutex<BTreeSet<PathBuf>>,
}

impl FlakyFs {
    fn new() -> Self {
        Self {
            inner: LocalFilesystem::new(),
            locked: Mutex::new(BTreeSet::new()),
        }
    }

    fn lock_path(&self, path: &Path) {
        self.locked.lock().unwrap().insert(path.to_path_buf());
    }
}

impl FilesystemProbe for FlakyFs {
    fn size_of(&self, path: &Path) -> SizeReport {
        self.inner.size_of(path)
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        self.inner.free_space(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.locked.lock().unwrap().contains(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "file in use"));
        }
        self.inner.remove(path)
    }
}

struct Shed {
    dir: TempDir,
    fs: Arc<FlakyFs>,
    registry: Arc<JsonRegistry>,
    deps: Arc<JsonDependencyStore>,
}

impl Shed {
    fn tool_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join("installed_tools").join(name)
    }

    fn env_dir(&self, key: &str) -> PathBuf {
        self.dir.path().join("envs_cache").join(key)
    }

    fn planner(&self) -> DeletionPlanner {
        let storage = StorageAccountant::new(self.fs.clone(), self.dir.path());
        DeletionPlanner::new(
            self.registry.clone(),
            self.deps.clone(),
            storage,
            self.dir.path().join("envs_cache"),
            Arc::new(ManualClock::default()),
        )
    }
}

fn fill(dir: &Path, bytes: u64) {
    fs::create_dir_all(dir.join("lib")).unwrap();
    let half = bytes / 2;
    fs::write(dir.join("bin"), vec![0u8; half as usize]).unwrap();
    fs::write(dir.join("lib").join("data"), vec![0u8; (bytes - half) as usize]).unwrap();
}

/// A: 50 KiB, B: 30 KiB, both on E: 20 KiB. F: 10 KiB on its own env G: 5 KiB.
fn shed() -> Shed {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(FlakyFs::new());
    let registry = Arc::new(JsonRegistry::in_dir(dir.path()));
    let deps = Arc::new(JsonDependencyStore::in_dir(dir.path()));

    let shed = Shed {
        dir,
        fs,
        registry,
        deps,
    };

    for (name, size) in [("A", 50 * KB), ("B", 30 * KB), ("F", 10 * KB)] {
        fill(&shed.tool_dir(name), size);
        shed.registry
            .upsert(ToolRecord::new(name, shed.tool_dir(name)))
            .unwrap();
    }
    fill(&shed.env_dir("E"), 20 * KB);
    fill(&shed.env_dir("G"), 5 * KB);

    shed.deps
        .save(&DependencyConfig::from_pairs([
            (ToolName::new("A"), vec![EnvironmentKey::new("E")]),
            (ToolName::new("B"), vec![EnvironmentKey::new("E")]),
            (ToolName::new("F"), vec![EnvironmentKey::new("G")]),
        ]))
        .unwrap();
    shed
}

fn names(list: &[&str]) -> Vec<ToolName> {
    list.iter().map(|n| ToolName::new(*n)).collect()
}

// ============================================================================
// Planning
// ============================================================================

#[tokio::test]
async fn test_plan_shared_environment_needs_every_referrer() {
    let shed = shed();
    let planner = shed.planner();

    let plan = planner.plan(&names(&["A"])).unwrap();
    assert!(plan.environment_keys().is_empty());

    let plan = planner.plan(&names(&["A", "B"])).unwrap();
    assert_eq!(
        plan.environment_keys(),
        BTreeSet::from([EnvironmentKey::new("E")])
    );
    assert_eq!(plan.savings().tools_bytes(), 80 * KB);
    assert_eq!(plan.savings().environments_bytes(), 20 * KB);
    assert_eq!(plan.total_bytes(), 100 * KB);
}

#[tokio::test]
async fn test_plan_is_read_only() {
    let shed = shed();
    let planner = shed.planner();

    planner.plan(&names(&["A", "B", "F"])).unwrap();

    assert!(shed.tool_dir("A").exists());
    assert!(shed.env_dir("E").exists());
    assert_eq!(shed.registry.read_all().unwrap().len(), 3);
    let graph = DependencyGraph::from_config(&shed.deps.load().unwrap());
    assert_eq!(graph.users_of(&EnvironmentKey::new("E")).len(), 2);
}

#[tokio::test]
async fn test_plan_rejects_unknown_names() {
    let shed = shed();
    let err = shed.planner().plan(&names(&["A", "Nope"])).unwrap_err();
    assert!(
        matches!(&err, PlannerError::UnknownTools(unknown) if unknown == &names(&["Nope"])),
        "unexpected error: {err:?}"
    );
}

// ============================================================================
// Commit
// ============================================================================

#[tokio::test]
async fn test_commit_partial_failure_still_reclaims_shared_env() {
    let shed = shed();
    let planner = shed.planner();
    let plan = planner.plan(&names(&["A", "B"])).unwrap();

    shed.fs.lock_path(&shed.tool_dir("B"));
    let summary = planner.commit(&plan).await.unwrap();

    assert_eq!(summary.succeeded_tools, names(&["A"]));
    assert_eq!(summary.failed_tools.len(), 1);
    assert_eq!(summary.failed_tools[0].key.as_str(), "B");
    assert!(summary.failed_tools[0].reason.contains("file in use"));
    assert_eq!(summary.succeeded_environments, vec![EnvironmentKey::new("E")]);
    assert_eq!(summary.recovered_bytes, 70 * KB);

    assert!(!shed.tool_dir("A").exists());
    assert!(shed.tool_dir("B").exists());
    assert!(!shed.env_dir("E").exists());

    let remaining: Vec<_> = shed
        .registry
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(remaining, names(&["B", "F"]));

    // B keeps its edge; A's is gone.
    let graph = DependencyGraph::from_config(&shed.deps.load().unwrap());
    assert!(graph.dependencies_of(&ToolName::new("A")).is_empty());
    assert_eq!(
        graph.dependencies_of(&ToolName::new("B")),
        BTreeSet::from([EnvironmentKey::new("E")])
    );
}

#[tokio::test]
async fn test_commit_all_tools() {
    let shed = shed();
    let planner = shed.planner().with_max_parallel(2);
    let plan = planner.plan(&names(&["A", "B", "F"])).unwrap();

    let summary = planner.commit(&plan).await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.recovered_bytes, plan.total_bytes());
    assert_eq!(summary.recovered_bytes, 115 * KB);
    assert!(shed.registry.read_all().unwrap().is_empty());
    assert!(shed.deps.load().unwrap().tool_dependencies.is_empty());
    assert!(!shed.env_dir("G").exists());
}

#[tokio::test]
async fn test_commit_stale_after_external_removal() {
    let shed = shed();
    let planner = shed.planner();
    let plan = planner.plan(&names(&["A", "F"])).unwrap();

    shed.registry.remove(&ToolName::new("F")).unwrap();

    let result = planner.commit(&plan).await;
    assert!(matches!(result, Err(PlannerError::StalePlan(_))));
    assert!(shed.tool_dir("A").exists());
    assert!(shed.tool_dir("F").exists());
    assert!(shed.env_dir("G").exists());
}

#[tokio::test]
async fn test_commit_stale_after_new_dependency() {
    let shed = shed();
    let planner = shed.planner();
    let plan = planner.plan(&names(&["F"])).unwrap();
    assert_eq!(plan.environment_keys().len(), 1);

    // Someone else starts depending on G: it would no longer be orphaned.
    let mut graph = DependencyGraph::from_config(&shed.deps.load().unwrap());
    graph.add_dependency(ToolName::new("A"), EnvironmentKey::new("G"));
    shed.deps.save(&graph.to_config()).unwrap();

    let result = planner.commit(&plan).await;
    assert!(matches!(result, Err(PlannerError::StalePlan(_))));
    assert!(shed.tool_dir("F").exists());
    assert!(shed.env_dir("G").exists());
}

#[tokio::test]
async fn test_commit_closes_active_session() {
    let shed = shed();
    let clock = Arc::new(ManualClock::default());
    let tracker = spawn_tracker(shed.registry.clone(), clock.clone());
    tracker.start_tracking(ToolName::new("F"), None).await.unwrap();

    let planner = shed.planner().with_tracker(tracker.clone());
    let plan = planner.plan(&names(&["F"])).unwrap();
    let summary = planner.commit(&plan).await.unwrap();

    assert!(summary.is_complete());
    assert!(tracker.get_session_info(ToolName::new("F")).await.is_none());
    assert!(shed.registry.get(&ToolName::new("F")).unwrap().is_none());
}

#[tokio::test]
async fn test_commit_missing_directory_counts_zero() {
    let shed = shed();
    let planner = shed.planner();
    let plan = planner.plan(&names(&["F"])).unwrap();

    fs::remove_dir_all(shed.tool_dir("F")).unwrap();
    let summary = planner.commit(&plan).await.unwrap();

    assert_eq!(summary.succeeded_tools, names(&["F"]));
    assert_eq!(summary.recovered_bytes, 5 * KB);
}

// ============================================================================
// Environment Keys Outside The Root
// ============================================================================

#[tokio::test]
async fn test_edited_dependency_file_with_parent_key_is_rejected() {
    let shed = shed();
    fs::write(
        shed.dir.path().join(DEPENDENCIES_FILE),
        r#"{ "tool_dependencies": { "A": [".."], "F": ["G"] }, "version": "1.0" }"#,
    )
    .unwrap();

    let err = shed.planner().plan(&names(&["A"])).unwrap_err();
    assert!(matches!(err, PlannerError::Store(_)), "unexpected error: {err:?}");

    assert!(shed.tool_dir("A").exists());
    assert!(shed.env_dir("E").exists());
    assert!(shed.dir.path().join(REGISTRY_FILE).exists());
}

#[tokio::test]
async fn test_commit_never_reclaims_root_or_its_parent() {
    let shed = shed();
    let deps = Arc::new(MemoryDependencyStore::new(DependencyConfig::from_pairs([
        (
            ToolName::new("A"),
            vec![EnvironmentKey::new(".."), EnvironmentKey::new("")],
        ),
        (ToolName::new("B"), vec![EnvironmentKey::new("E")]),
    ])));
    let planner = DeletionPlanner::new(
        shed.registry.clone(),
        deps,
        StorageAccountant::new(shed.fs.clone(), shed.dir.path()),
        shed.dir.path().join("envs_cache"),
        Arc::new(ManualClock::default()),
    );

    let plan = planner.plan(&names(&["A"])).unwrap();
    assert!(plan.environments().is_empty());
    let summary = planner.commit(&plan).await.unwrap();

    assert_eq!(summary.succeeded_tools, names(&["A"]));
    assert!(summary.succeeded_environments.is_empty());
    assert_eq!(summary.recovered_bytes, 50 * KB);
    assert!(shed.dir.path().join(REGISTRY_FILE).exists());
    assert!(shed.dir.path().join("envs_cache").exists());
    assert!(shed.env_dir("E").exists());
    assert!(shed.env_dir("G").exists());
}
