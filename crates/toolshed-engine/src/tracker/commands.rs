//! Tracker actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `TrackerActor`:
//! - `TrackerCommand`: Commands sent to the actor
//! - `TrackerError`: Errors that can occur when talking to the actor
//! - `TrackerEvent`: Events published by the tracker for subscribers

use thiserror::Error;
use tokio::sync::oneshot;

use toolshed_core::{
    CloseReason, ClosedSession, ProcessHandle, SessionId, SessionSnapshot, ToolName,
};

// ============================================================================
// Tracker Commands
// ============================================================================

/// Commands sent to the tracker actor.
///
/// Each command that expects an answer carries a oneshot sender for the
/// response.
#[derive(Debug)]
pub enum TrackerCommand {
    /// Open a session for a tool that was just launched.
    ///
    /// An active session for the same tool is closed first with
    /// [`CloseReason::Relaunched`].
    StartTracking {
        tool: ToolName,
        handle: Option<ProcessHandle>,
        respond_to: oneshot::Sender<StartedSession>,
    },

    /// Close the tool's active session, whichever it is.
    ///
    /// Answers `None` when no session is active; that is not an error.
    StopTracking {
        tool: ToolName,
        reason: CloseReason,
        respond_to: oneshot::Sender<Option<ClosedSession>>,
    },

    /// Close the tool's session only if it is still `session_id`.
    ///
    /// Used by the process monitor so that a probe answer about an old
    /// process never closes the session of a newer launch.
    CloseIfCurrent {
        tool: ToolName,
        session_id: SessionId,
        reason: CloseReason,
        respond_to: oneshot::Sender<Option<ClosedSession>>,
    },

    /// Close every active session.
    StopAll {
        reason: CloseReason,
        respond_to: oneshot::Sender<Vec<ClosedSession>>,
    },

    /// Read-only snapshot of one tool's active session.
    GetSessionInfo {
        tool: ToolName,
        respond_to: oneshot::Sender<Option<SessionSnapshot>>,
    },

    /// Snapshots of all active sessions, ordered by tool name.
    GetActiveSessions {
        respond_to: oneshot::Sender<Vec<SessionSnapshot>>,
    },

    /// What the process monitor should probe this round.
    GetWatchList {
        respond_to: oneshot::Sender<Vec<WatchTarget>>,
    },
}

/// Answer to [`TrackerCommand::StartTracking`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSession {
    pub session_id: SessionId,
    /// The previous session of the same tool, closed by this launch
    pub replaced: Option<ClosedSession>,
}

/// One active session as seen by the process monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub tool: ToolName,
    pub session_id: SessionId,
    pub handle: Option<ProcessHandle>,
}

// ============================================================================
// Tracker Errors
// ============================================================================

/// Errors that can occur when talking to the tracker.
///
/// Persistence failures are not errors here: they are logged and reported
/// through [`ClosedSession::flushed`].
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// The actor stopped before answering.
    #[error("tracker channel closed")]
    ChannelClosed,
}

// ============================================================================
// Tracker Events
// ============================================================================

/// Events published by the tracker to subscribers.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// A session was opened.
    SessionStarted {
        session_id: SessionId,
        tool: ToolName,
        pid: Option<u32>,
    },

    /// A session was closed and its duration flushed (or lost, see
    /// [`ClosedSession::flushed`]).
    SessionClosed {
        /// Boxed to keep the enum small
        session: Box<ClosedSession>,
    },
}

impl TrackerEvent {
    /// Tool the event is about.
    pub fn tool(&self) -> &ToolName {
        match self {
            Self::SessionStarted { tool, .. } => tool,
            Self::SessionClosed { session } => &session.tool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_tracker_error_display() {
        assert_eq!(TrackerError::ChannelClosed.to_string(), "tracker channel closed");
    }

    #[test]
    fn test_event_tool() {
        let started = TrackerEvent::SessionStarted {
            session_id: SessionId::new(1),
            tool: ToolName::new("BWA"),
            pid: Some(10),
        };
        assert_eq!(started.tool().as_str(), "BWA");

        let now = Utc::now();
        let closed = TrackerEvent::SessionClosed {
            session: Box::new(ClosedSession {
                session_id: SessionId::new(1),
                tool: ToolName::new("BWA"),
                started_at: now,
                ended_at: now,
                duration_secs: 0,
                reason: CloseReason::Explicit,
                total_runtime: Some(0),
                flushed: true,
            }),
        };
        let _cloned = closed.clone();
        assert_eq!(closed.tool().as_str(), "BWA");
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Option<ClosedSession>>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
