//! Host implementations of the probe capabilities.
//!
//! - [`SysinfoProbe`] answers process questions with `sysinfo`
//! - [`LocalFilesystem`] sizes directories with `walkdir` and reads free
//!   space with `fs2`
//!
//! # Panic-Free Guarantees
//!
//! All code follows the panic-free policy. Probe failures degrade to
//! [`Liveness::Unknown`] or to skipped entries, never to errors that abort
//! the caller.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};
use walkdir::WalkDir;

use toolshed_core::{FilesystemProbe, Liveness, ProcessHandle, ProcessProbe, SizeReport};

// ============================================================================
// Process Probe
// ============================================================================

/// Process probe backed by `sysinfo`.
///
/// A PID whose recorded start time differs from the live process's start
/// time has been reused by the OS and is reported `Dead`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    own_pid: Pid,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            own_pid: Pid::from_u32(std::process::id()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Captures a handle for `pid` including its start time, so later
    /// liveness checks can detect PID reuse.
    ///
    /// Falls back to a handle without start time if the process cannot be
    /// read.
    pub fn resolve(&self, pid: u32) -> ProcessHandle {
        let mut system = self.lock();
        let target = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        match system.process(target) {
            Some(process) => ProcessHandle::with_start_time(pid, process.start_time()),
            None => {
                debug!(pid, "could not read process start time");
                ProcessHandle::new(pid)
            }
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_alive(&self, handle: &ProcessHandle) -> Liveness {
        let mut system = self.lock();
        let target = Pid::from_u32(handle.pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target, self.own_pid]), true);

        let Some(process) = system.process(target) else {
            // If we cannot even see ourselves the process table is not
            // readable here, so absence means nothing.
            if system.process(self.own_pid).is_none() {
                debug!(pid = handle.pid, "process table unreadable");
                return Liveness::Unknown;
            }
            return Liveness::Dead;
        };

        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return Liveness::Dead;
        }

        match handle.start_time {
            Some(expected) if expected != process.start_time() => {
                debug!(
                    pid = handle.pid,
                    expected_start_time = expected,
                    current_start_time = process.start_time(),
                    "start time mismatch, PID reused"
                );
                Liveness::Dead
            }
            _ => Liveness::Alive,
        }
    }

    fn find_recent_handle(&self, name_hint: &str, within: Duration) -> Option<ProcessHandle> {
        let hint = name_hint.to_lowercase();
        if hint.is_empty() {
            return None;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let oldest = now.saturating_sub(within.as_secs());

        let mut system = self.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        system
            .processes()
            .iter()
            .filter(|(_, process)| process.start_time() >= oldest)
            .filter(|(_, process)| process_name(process).contains(&hint))
            .max_by_key(|(_, process)| process.start_time())
            .map(|(pid, process)| ProcessHandle::with_start_time(pid.as_u32(), process.start_time()))
    }

    fn any_running(&self, process_names: &[String]) -> Liveness {
        let needles: Vec<String> = process_names
            .iter()
            .map(|n| n.to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if needles.is_empty() {
            return Liveness::Unknown;
        }

        let mut system = self.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);
        if system.processes().is_empty() {
            return Liveness::Unknown;
        }

        let running = system.processes().values().any(|process| {
            let name = process_name(process);
            needles.iter().any(|needle| name.contains(needle.as_str()))
        });
        if running {
            Liveness::Alive
        } else {
            Liveness::Dead
        }
    }
}

fn process_name(process: &Process) -> String {
    OsStr::new(process.name()).to_string_lossy().to_lowercase()
}

// ============================================================================
// Filesystem Probe
// ============================================================================

/// Filesystem probe for the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl FilesystemProbe for LocalFilesystem {
    fn size_of(&self, path: &Path) -> SizeReport {
        if let Err(e) = std::fs::symlink_metadata(path) {
            if e.kind() == io::ErrorKind::NotFound {
                return SizeReport::missing();
            }
            warn!(path = %path.display(), error = %e, "cannot stat path, counting as empty");
            return SizeReport {
                bytes: 0,
                skipped_entries: 1,
                missing: false,
            };
        }

        let mut report = SizeReport::default();
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(path = %path.display(), %err, "skipping unreadable entry");
                    report.skipped_entries += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => report.bytes = report.bytes.saturating_add(meta.len()),
                Err(err) => {
                    debug!(path = %entry.path().display(), %err, "skipping file without metadata");
                    report.skipped_entries += 1;
                }
            }
        }
        report
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        // The volume is the one hosting the nearest existing ancestor.
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or(path);
        fs2::available_space(existing)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "nothing to remove");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_size_of_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bin/lib")).unwrap();
        fs::write(dir.path().join("a.txt"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("bin/b.bin"), vec![0u8; 250]).unwrap();
        fs::write(dir.path().join("bin/lib/c.so"), vec![0u8; 650]).unwrap();

        let report = LocalFilesystem.size_of(dir.path());
        assert_eq!(report.bytes, 1000);
        assert!(report.is_complete());
        assert!(!report.missing);
    }

    #[test]
    fn test_size_of_missing_path() {
        let dir = TempDir::new().unwrap();
        let report = LocalFilesystem.size_of(&dir.path().join("absent"));
        assert!(report.missing);
        assert_eq!(report.bytes, 0);
    }

    #[test]
    fn test_free_space_of_missing_child_uses_ancestor() {
        let dir = TempDir::new().unwrap();
        let free = LocalFilesystem
            .free_space(&dir.path().join("not/yet/created"))
            .unwrap();
        assert!(free > 0);
    }

    #[test]
    fn test_remove_directory_and_missing() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("FastQC");
        fs::create_dir_all(tool.join("lib")).unwrap();
        fs::write(tool.join("lib/x"), b"x").unwrap();

        LocalFilesystem.remove(&tool).unwrap();
        assert!(!tool.exists());
        // Already gone is fine.
        LocalFilesystem.remove(&tool).unwrap();
    }

    #[test]
    fn test_own_process_is_alive() {
        let probe = SysinfoProbe::new();
        let handle = probe.resolve(std::process::id());
        assert_eq!(probe.is_alive(&handle), Liveness::Alive);
    }

    #[test]
    fn test_reused_pid_is_dead() {
        let probe = SysinfoProbe::new();
        let handle = probe.resolve(std::process::id());
        if let Some(start) = handle.start_time {
            let stale = ProcessHandle::with_start_time(handle.pid, start.saturating_sub(1000));
            assert_eq!(probe.is_alive(&stale), Liveness::Dead);
        }
    }

    #[test]
    fn test_any_running_without_names_is_unknown() {
        assert_eq!(SysinfoProbe::new().any_running(&[]), Liveness::Unknown);
    }
}
