//! Capabilities the engine consumes from the host system.
//!
//! The engine never inspects processes or walks directories itself; it asks
//! a [`ProcessProbe`] or a [`FilesystemProbe`]. Probe failures are not
//! errors: a process query that cannot be answered yields
//! [`Liveness::Unknown`], and an unreadable directory entry contributes zero
//! bytes and is counted in [`SizeReport::skipped_entries`].

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Process Probe
// ============================================================================

/// Identifies one running process.
///
/// `start_time` (seconds since the epoch, as reported by the OS) guards
/// against PID reuse: a live PID with a different start time is a different
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub start_time: Option<u64>,
}

impl ProcessHandle {
    /// Creates a handle without a start time (no PID reuse protection).
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            start_time: None,
        }
    }

    /// Creates a handle with a known start time.
    pub fn with_start_time(pid: u32, start_time: u64) -> Self {
        Self {
            pid,
            start_time: Some(start_time),
        }
    }
}

/// Three-valued liveness answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Dead,
    /// The probe could not give a clean answer (permission denied, probe
    /// unavailable). Never treated as `Dead`.
    Unknown,
}

impl Liveness {
    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Returns `self` unless it is `Unknown`, in which case the fallback is
    /// consulted.
    pub fn or_else(self, fallback: impl FnOnce() -> Liveness) -> Liveness {
        match self {
            Self::Unknown => fallback(),
            answer => answer,
        }
    }
}

/// Process existence queries.
pub trait ProcessProbe: Send + Sync {
    /// Is the process behind `handle` still running?
    fn is_alive(&self, handle: &ProcessHandle) -> Liveness;

    /// Finds the most recently started process whose name contains
    /// `name_hint` and which started no longer than `within` ago.
    ///
    /// Used for tools started through a wrapper or interpreter, where the
    /// launcher's own PID exits immediately.
    fn find_recent_handle(&self, name_hint: &str, within: Duration) -> Option<ProcessHandle>;

    /// Name heuristic: is any process running whose name contains one of
    /// `process_names` (case-insensitive)?
    ///
    /// This is strictly weaker than [`ProcessProbe::is_alive`]: an
    /// unrelated process sharing a name (e.g. `java`) keeps the answer at
    /// `Alive`.
    fn any_running(&self, process_names: &[String]) -> Liveness;
}

// ============================================================================
// Filesystem Probe
// ============================================================================

/// Result of sizing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SizeReport {
    /// Total bytes of all readable files under the path
    pub bytes: u64,
    /// Entries that could not be read and contributed zero
    pub skipped_entries: u64,
    /// The path did not exist
    pub missing: bool,
}

impl SizeReport {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes,
            skipped_entries: 0,
            missing: false,
        }
    }

    pub fn missing() -> Self {
        Self {
            bytes: 0,
            skipped_entries: 0,
            missing: true,
        }
    }

    /// Returns true if every entry under the path was counted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped_entries == 0
    }
}

/// Filesystem queries and the one destructive operation the engine needs.
pub trait FilesystemProbe: Send + Sync {
    /// Recursive size of `path`. Unreadable entries are skipped, not fatal.
    fn size_of(&self, path: &Path) -> SizeReport;

    /// Free bytes on the volume hosting `path`.
    fn free_space(&self, path: &Path) -> io::Result<u64>;

    /// Removes `path` and everything below it.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_or_else_only_on_unknown() {
        assert_eq!(Liveness::Alive.or_else(|| Liveness::Dead), Liveness::Alive);
        assert_eq!(Liveness::Dead.or_else(|| Liveness::Alive), Liveness::Dead);
        assert_eq!(Liveness::Unknown.or_else(|| Liveness::Dead), Liveness::Dead);
    }

    #[test]
    fn test_size_report_constructors() {
        let report = SizeReport::new(42);
        assert_eq!(report.bytes, 42);
        assert!(report.is_complete());
        assert!(!report.missing);

        let report = SizeReport::missing();
        assert_eq!(report.bytes, 0);
        assert!(report.missing);
    }

    #[test]
    fn test_process_handle_constructors() {
        assert_eq!(ProcessHandle::new(10).start_time, None);
        assert_eq!(ProcessHandle::with_start_time(10, 99).start_time, Some(99));
    }
}
