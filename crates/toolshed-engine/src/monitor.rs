//! Process-liveness monitoring for tracked sessions.
//!
//! One background loop polls every active session on a fixed interval and
//! closes the sessions whose process has exited:
//!
//! ```text
//! ACTIVE ──(probe: Dead)──▶ CLOSING ──(flushed)──▶ CLOSED
//!    │
//!    └──(probe: Alive | Unknown)──▶ stays ACTIVE
//! ```
//!
//! Sessions launched with a process handle are checked by PID (with start
//! time, so a reused PID reads as dead). Sessions without a handle, and
//! sessions whose PID check comes back `Unknown`, fall back to the process
//! name table. The name table is a weaker signal: any unrelated process whose
//! name contains a listed name keeps the session open.
//!
//! # Panic-Free Guarantees
//!
//! All code follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A failed probe round is logged and retried on the next tick

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolshed_core::{CloseReason, ClosedSession, Liveness, ProcessProbe, ToolName};

use crate::tracker::{TrackerHandle, WatchTarget};

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Process Name Table
// ============================================================================

/// Expected process names per tool, used when no PID answer is available.
///
/// Tools without an entry fall back to their lower-cased name. Matching is a
/// case-insensitive substring test.
#[derive(Debug, Clone, Default)]
pub struct ProcessNameTable {
    names: HashMap<ToolName, Vec<String>>,
}

impl ProcessNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the process names of one tool (builder style).
    #[must_use]
    pub fn with(mut self, tool: impl Into<ToolName>, names: Vec<String>) -> Self {
        self.insert(tool.into(), names);
        self
    }

    pub fn insert(&mut self, tool: ToolName, names: Vec<String>) {
        self.names.insert(tool, names);
    }

    /// Process names to look for when checking `tool`.
    pub fn names_for(&self, tool: &ToolName) -> Vec<String> {
        match self.names.get(tool) {
            Some(names) if !names.is_empty() => names.clone(),
            _ => vec![tool.default_process_name()],
        }
    }
}

impl FromIterator<(ToolName, Vec<String>)> for ProcessNameTable {
    fn from_iter<I: IntoIterator<Item = (ToolName, Vec<String>)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Process Monitor
// ============================================================================

/// Periodic liveness checker for the tracker's active sessions.
#[derive(Clone)]
pub struct ProcessMonitor {
    probe: Arc<dyn ProcessProbe>,
    tracker: TrackerHandle,
    names: Arc<ProcessNameTable>,
    poll_interval: Duration,
}

impl ProcessMonitor {
    /// Creates a monitor with the default 5 second interval.
    pub fn new(probe: Arc<dyn ProcessProbe>, tracker: TrackerHandle) -> Self {
        Self {
            probe,
            tracker,
            names: Arc::new(ProcessNameTable::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_names(mut self, names: ProcessNameTable) -> Self {
        self.names = Arc::new(names);
        self
    }

    /// Sets the polling interval. A zero interval is raised to one second.
    #[must_use]
    pub fn with_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = if poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            poll_interval
        };
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs one polling round and returns the sessions it closed.
    pub async fn poll_once(&self) -> Vec<ClosedSession> {
        let targets = self.tracker.watch_list().await;
        if targets.is_empty() {
            return Vec::new();
        }

        let probe = Arc::clone(&self.probe);
        let names = Arc::clone(&self.names);
        let checked = tokio::task::spawn_blocking(move || {
            targets
                .into_iter()
                .map(|target| {
                    let liveness = check_liveness(probe.as_ref(), &names, &target);
                    (target, liveness)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let checked = match checked {
            Ok(checked) => checked,
            Err(e) => {
                warn!(error = %e, "Liveness probe task failed, retrying next tick");
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for (target, liveness) in checked {
            match liveness {
                Liveness::Dead => {
                    match self
                        .tracker
                        .close_if_current(target.tool.clone(), target.session_id, CloseReason::ProcessExited)
                        .await
                    {
                        Ok(Some(session)) => closed.push(session),
                        Ok(None) => {}
                        Err(e) => {
                            debug!(tool = %target.tool, error = %e, "Tracker gone, stopping round");
                            break;
                        }
                    }
                }
                Liveness::Unknown => {
                    debug!(
                        tool = %target.tool,
                        session_id = %target.session_id,
                        "Liveness unknown, keeping session active"
                    );
                }
                Liveness::Alive => {}
            }
        }
        closed
    }
}

/// PID check first, name table when there is no PID or no clean answer.
fn check_liveness(
    probe: &dyn ProcessProbe,
    names: &ProcessNameTable,
    target: &WatchTarget,
) -> Liveness {
    let by_name = || {
        let candidates = names.names_for(&target.tool);
        let answer = probe.any_running(&candidates);
        debug!(
            tool = %target.tool,
            method = "name-heuristic",
            names = ?candidates,
            liveness = ?answer,
            "Liveness checked by process name"
        );
        answer
    };

    match &target.handle {
        Some(handle) => probe.is_alive(handle).or_else(by_name),
        None => by_name(),
    }
}

/// Spawns the monitoring loop.
///
/// The loop ticks every `monitor.poll_interval()` until `cancel_token` is
/// cancelled. It does not flush sessions on exit; the host calls
/// [`TrackerHandle::stop_all_tracking`] during shutdown.
pub fn spawn_monitor_task(
    monitor: ProcessMonitor,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(monitor.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = monitor.poll_interval().as_secs(),
            "Process monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Process monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let closed = monitor.poll_once().await;
                    for session in &closed {
                        info!(
                            tool = %session.tool,
                            duration_secs = session.duration_secs,
                            "Process exit detected"
                        );
                    }
                }
            }
        }

        debug!("Process monitor task completed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use toolshed_core::{ManualClock, ProcessHandle, ToolRecord};
    use toolshed_store::MemoryRegistry;

    use crate::tracker::spawn_tracker;

    /// Probe answering from fixed tables.
    #[derive(Default)]
    struct FakeProbe {
        pids: Mutex<HashMap<u32, Liveness>>,
        running_names: Mutex<Vec<String>>,
        names_unreadable: Mutex<bool>,
    }

    impl FakeProbe {
        fn set_pid(&self, pid: u32, liveness: Liveness) {
            self.pids.lock().unwrap().insert(pid, liveness);
        }

        fn set_running(&self, names: &[&str]) {
            *self.running_names.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
        }

        fn set_names_unreadable(&self, unreadable: bool) {
            *self.names_unreadable.lock().unwrap() = unreadable;
        }
    }

    impl ProcessProbe for FakeProbe {
        fn is_alive(&self, handle: &ProcessHandle) -> Liveness {
            self.pids
                .lock()
                .unwrap()
                .get(&handle.pid)
                .copied()
                .unwrap_or(Liveness::Dead)
        }

        fn find_recent_handle(&self, _: &str, _: Duration) -> Option<ProcessHandle> {
            None
        }

        fn any_running(&self, process_names: &[String]) -> Liveness {
            if *self.names_unreadable.lock().unwrap() {
                return Liveness::Unknown;
            }
            let running = self.running_names.lock().unwrap();
            if process_names.iter().any(|n| running.iter().any(|r| r.contains(n.as_str()))) {
                Liveness::Alive
            } else {
                Liveness::Dead
            }
        }
    }

    fn setup() -> (ProcessMonitor, TrackerHandle, Arc<FakeProbe>, Arc<ManualClock>) {
        let registry = Arc::new(MemoryRegistry::with_records([
            ToolRecord::new("FastQC", "/opt/FastQC"),
            ToolRecord::new("IGV", "/opt/IGV"),
        ]));
        let clock = Arc::new(ManualClock::default());
        let tracker = spawn_tracker(registry, clock.clone());
        let probe = Arc::new(FakeProbe::default());
        let monitor = ProcessMonitor::new(probe.clone(), tracker.clone())
            .with_names(ProcessNameTable::new().with("IGV", vec!["java".to_string()]));
        (monitor, tracker, probe, clock)
    }

    #[test]
    fn test_name_table_defaults_to_lowercase() {
        let table = ProcessNameTable::new().with("IGV", vec!["java".to_string()]);
        assert_eq!(table.names_for(&ToolName::new("IGV")), vec!["java"]);
        assert_eq!(table.names_for(&ToolName::new("FastQC")), vec!["fastqc"]);
    }

    #[tokio::test]
    async fn test_dead_pid_closes_session() {
        let (monitor, tracker, probe, clock) = setup();
        probe.set_pid(10, Liveness::Alive);
        tracker
            .start_tracking(ToolName::new("FastQC"), Some(ProcessHandle::new(10)))
            .await
            .unwrap();

        assert!(monitor.poll_once().await.is_empty());

        clock.advance_secs(20);
        probe.set_pid(10, Liveness::Dead);
        let closed = monitor.poll_once().await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, CloseReason::ProcessExited);
        assert_eq!(closed[0].duration_secs, 20);
        assert!(tracker.active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_falls_back_to_names() {
        let (monitor, tracker, probe, _clock) = setup();
        probe.set_pid(11, Liveness::Unknown);
        probe.set_running(&["fastqc-wrapper"]);
        tracker
            .start_tracking(ToolName::new("FastQC"), Some(ProcessHandle::new(11)))
            .await
            .unwrap();

        assert!(monitor.poll_once().await.is_empty());
        assert_eq!(tracker.active_sessions().await.len(), 1);

        probe.set_running(&[]);
        assert_eq!(monitor.poll_once().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_pid_and_unknown_names_keep_session() {
        let (monitor, tracker, probe, clock) = setup();
        probe.set_pid(12, Liveness::Unknown);
        probe.set_names_unreadable(true);
        tracker
            .start_tracking(ToolName::new("FastQC"), Some(ProcessHandle::new(12)))
            .await
            .unwrap();

        clock.advance_secs(30);
        assert!(monitor.poll_once().await.is_empty());
        assert!(monitor.poll_once().await.is_empty());

        let active = tracker.active_sessions().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tool.as_str(), "FastQC");
        assert!(active[0].is_active);
        assert_eq!(active[0].current_duration_secs, 30);
    }

    #[tokio::test]
    async fn test_no_handle_uses_name_table() {
        let (monitor, tracker, probe, _clock) = setup();
        probe.set_running(&["java"]);
        tracker.start_tracking(ToolName::new("IGV"), None).await.unwrap();

        assert!(monitor.poll_once().await.is_empty());

        probe.set_running(&["bash"]);
        let closed = monitor.poll_once().await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].tool.as_str(), "IGV");
    }

    #[tokio::test]
    async fn test_monitor_task_stops_on_cancel() {
        let (monitor, _tracker, _probe, _clock) = setup();
        let token = CancellationToken::new();
        let task = spawn_monitor_task(monitor.with_interval(Duration::from_millis(10)), token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised() {
        let (monitor, _tracker, _probe, _clock) = setup();
        assert_eq!(monitor.poll_interval(), DEFAULT_POLL_INTERVAL);
        let monitor = monitor.with_interval(Duration::ZERO);
        assert_eq!(monitor.poll_interval(), Duration::from_secs(1));
    }
}
