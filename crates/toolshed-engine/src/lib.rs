//! toolshed engine - Usage tracking and dependency-safe cleanup
//!
//! This crate composes the lifecycle components on top of the domain types
//! in `toolshed-core` and the stores in `toolshed-store`:
//! - `tracker` - Session tracker actor owning the active-session map
//! - `monitor` - Background poller closing sessions whose process exited
//! - `graph` - Tool → environment dependency index with orphan queries
//! - `storage` - Size accounting and free-space checks
//! - `planner` - Plan/commit batch deletion with partial-failure reporting
//! - `probe` - Host implementations of the process and filesystem probes
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      toolshed engine                       │
//! ├────────────────────────────────────────────────────────────┤
//! │                                                            │
//! │  ┌────────────────┐  close_if_current  ┌────────────────┐  │
//! │  │ ProcessMonitor │───────────────────▶│  TrackerActor  │  │
//! │  │ (poll loop)    │                    │ (session map)  │  │
//! │  └───────┬────────┘                    └───────┬────────┘  │
//! │          │ is_alive                            │ update    │
//! │          ▼                                     ▼           │
//! │  ┌────────────────┐                    ┌────────────────┐  │
//! │  │  ProcessProbe  │                    │ RegistryStore  │  │
//! │  └────────────────┘                    └───────▲────────┘  │
//! │                                                │ remove    │
//! │  ┌────────────────┐     ┌──────────────────────┴───────┐   │
//! │  │DependencyGraph │◀────│       DeletionPlanner        │   │
//! │  └────────────────┘     └──────────────┬───────────────┘   │
//! │                                        │ size / remove     │
//! │                                        ▼                   │
//! │                         ┌──────────────────────────────┐   │
//! │                         │ StorageAccountant (FsProbe)  │   │
//! │                         └──────────────────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod graph;
pub mod monitor;
pub mod planner;
pub mod probe;
pub mod storage;
pub mod tracker;

pub use graph::{DependencyGraph, DependencySummary};
pub use monitor::{
    spawn_monitor_task, ProcessMonitor, ProcessNameTable, DEFAULT_POLL_INTERVAL,
};
pub use planner::{DeletionPlanner, PlannerError, DEFAULT_MAX_PARALLEL_REMOVALS};
pub use probe::{LocalFilesystem, SysinfoProbe};
pub use storage::{
    LowSpaceWarning, SpaceCheck, StorageAccountant, StorageSummary,
    DEFAULT_LOW_SPACE_THRESHOLD,
};
pub use tracker::{
    spawn_tracker, StartedSession, TrackerError, TrackerEvent, TrackerHandle, WatchTarget,
};
