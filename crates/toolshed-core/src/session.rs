//! Usage session entities and value objects.
//!
//! A [`UsageSession`] covers one continuous interval during which a tool's
//! process is considered running. Its lifecycle is
//! `Active → Closing → Closed`; there is no way back to `Active`. The
//! duration is computed exactly once, on the `Active → Closing` transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::ProcessHandle;
use crate::tool::ToolName;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of one session instance.
///
/// Tool names are reused across launches; session ids are not. The monitor
/// uses the id to make sure it closes the session it probed and not a newer
/// one that replaced it in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the following id.
    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a usage session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Process considered running.
    #[default]
    Active,
    /// End time fixed and duration computed; flush to the registry pending.
    Closing,
    /// Flushed (or flush given up) and removed from the active set.
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Caller asked to stop tracking.
    Explicit,
    /// The process monitor observed the process exit.
    ProcessExited,
    /// A new launch of the same tool replaced the session.
    Relaunched,
    /// Host shutdown flushed all open sessions.
    Shutdown,
    /// The tool is being deleted.
    ToolRemoved,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "stopped by caller"),
            Self::ProcessExited => write!(f, "process exited"),
            Self::Relaunched => write!(f, "replaced by relaunch"),
            Self::Shutdown => write!(f, "host shutdown"),
            Self::ToolRemoved => write!(f, "tool removed"),
        }
    }
}

// ============================================================================
// Usage Session
// ============================================================================

/// One running instance of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSession {
    pub id: SessionId,
    pub tool: ToolName,
    /// Absent when the launcher could not resolve the process
    pub handle: Option<ProcessHandle>,
    pub started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    state: SessionState,
    duration_secs: Option<u64>,
}

impl UsageSession {
    /// Opens a new active session.
    pub fn new(
        id: SessionId,
        tool: ToolName,
        handle: Option<ProcessHandle>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tool,
            handle,
            started_at,
            ended_at: None,
            state: SessionState::Active,
            duration_secs: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Duration fixed at close, `None` while active.
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_secs
    }

    /// Seconds elapsed so far while active, the fixed duration afterwards.
    pub fn current_duration_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.duration_secs {
            Some(secs) => secs,
            None => elapsed_secs(self.started_at, now),
        }
    }

    /// `Active → Closing`: fixes the end time and computes the duration.
    ///
    /// Returns the duration on the first call and `None` on every later call,
    /// so a second closer never flushes twice.
    pub fn begin_close(&mut self, now: DateTime<Utc>) -> Option<u64> {
        if self.state != SessionState::Active {
            return None;
        }
        let secs = elapsed_secs(self.started_at, now);
        self.ended_at = Some(now);
        self.duration_secs = Some(secs);
        self.state = SessionState::Closing;
        Some(secs)
    }

    /// `Closing → Closed`. No-op in any other state.
    pub fn finish_close(&mut self) {
        if self.state == SessionState::Closing {
            self.state = SessionState::Closed;
        }
    }

    /// Read-only view of the session at `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            tool: self.tool.clone(),
            pid: self.handle.map(|h| h.pid),
            started_at: self.started_at,
            current_duration_secs: self.current_duration_secs(now),
            state: self.state,
            is_active: self.is_active(),
        }
    }
}

/// Whole seconds between two instants, clamped at zero for clocks that
/// stepped backwards.
fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from(end.signed_duration_since(start).num_seconds()).unwrap_or(0)
}

// ============================================================================
// Application Layer DTOs
// ============================================================================

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub tool: ToolName,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub current_duration_secs: u64,
    pub state: SessionState,
    pub is_active: bool,
}

/// Outcome of closing one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedSession {
    pub session_id: SessionId,
    pub tool: ToolName,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub reason: CloseReason,
    /// Registry total after the flush, `None` if the flush failed
    pub total_runtime: Option<u64>,
    /// False when the registry write failed and the duration was lost
    pub flushed: bool,
}
