//! Tracker actor - owns the active-session map and processes commands.
//!
//! The TrackerActor is the single owner of usage-session state. Caller
//! requests (launch, stop, shutdown) and process-monitor requests arrive on
//! the same mpsc channel and are handled one at a time, so a monitor-driven
//! close can never interleave with a caller-driven stop on the same tool.
//! Whoever's command is processed first closes the session; the later one
//! finds nothing to close and is a no-op.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are ignored or logged, never panic
//!
//! Registry writes take a file lock and fsync, so they run on the blocking
//! pool. The actor still awaits each write before taking the next command.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use toolshed_core::{
    Clock, CloseReason, ClosedSession, ProcessHandle, SessionId, SessionSnapshot, ToolName,
    UsageSession,
};
use toolshed_store::RegistryStore;

use super::commands::{StartedSession, TrackerCommand, TrackerEvent, WatchTarget};

// ============================================================================
// Tracker Actor
// ============================================================================

/// The tracker actor - owns all active usage sessions.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: at most one active session per tool name
/// - `next_id`: source of fresh session ids
///
/// Usage totals are not owned here. They live in the registry and are only
/// changed through [`RegistryStore::update`] when a session closes.
pub struct TrackerActor {
    /// Command receiver
    receiver: mpsc::Receiver<TrackerCommand>,

    /// Active sessions keyed by tool name
    sessions: HashMap<ToolName, UsageSession>,

    /// Id for the next session
    next_id: SessionId,

    /// Persistent registry receiving flushed durations
    registry: Arc<dyn RegistryStore>,

    /// Wall clock used for start and end times
    clock: Arc<dyn Clock>,

    /// Event publisher for subscribers
    event_publisher: broadcast::Sender<TrackerEvent>,
}

impl TrackerActor {
    /// Creates a new tracker actor.
    pub fn new(
        receiver: mpsc::Receiver<TrackerCommand>,
        event_publisher: broadcast::Sender<TrackerEvent>,
        registry: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            next_id: SessionId::new(1),
            registry,
            clock,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// Sessions still open at that point are flushed with
    /// [`CloseReason::Shutdown`] so no runtime is lost.
    pub async fn run(mut self) {
        info!("Tracker actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        if !self.sessions.is_empty() {
            warn!(
                open = self.sessions.len(),
                "Tracker channel closed with open sessions, flushing"
            );
            self.handle_stop_all(CloseReason::Shutdown).await;
        }

        info!("Tracker actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: TrackerCommand) {
        match cmd {
            TrackerCommand::StartTracking {
                tool,
                handle,
                respond_to,
            } => {
                let result = self.handle_start(tool, handle).await;
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            TrackerCommand::StopTracking {
                tool,
                reason,
                respond_to,
            } => {
                let result = self.handle_stop(&tool, reason).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::CloseIfCurrent {
                tool,
                session_id,
                reason,
                respond_to,
            } => {
                let result = self.handle_close_if_current(&tool, session_id, reason).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::StopAll { reason, respond_to } => {
                let result = self.handle_stop_all(reason).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetSessionInfo { tool, respond_to } => {
                let result = self.handle_get_session_info(&tool);
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetActiveSessions { respond_to } => {
                let result = self.handle_get_active_sessions();
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetWatchList { respond_to } => {
                let result = self.handle_get_watch_list();
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Opens a session, closing any active one for the same tool first.
    async fn handle_start(
        &mut self,
        tool: ToolName,
        handle: Option<ProcessHandle>,
    ) -> StartedSession {
        let replaced = self.close_session(&tool, CloseReason::Relaunched).await;
        if let Some(prev) = &replaced {
            info!(
                tool = %tool,
                previous = %prev.session_id,
                duration_secs = prev.duration_secs,
                "Relaunch closed the previous session"
            );
        }

        let session_id = self.next_id;
        self.next_id = session_id.next();

        let session = UsageSession::new(session_id, tool.clone(), handle, self.clock.now());
        let pid = handle.map(|h| h.pid);

        info!(
            tool = %tool,
            session_id = %session_id,
            pid = ?pid,
            "Tracking started"
        );
        if handle.is_none() {
            debug!(tool = %tool, "No process handle, liveness falls back to the name table");
        }

        self.sessions.insert(tool.clone(), session);
        let _ = self.event_publisher.send(TrackerEvent::SessionStarted {
            session_id,
            tool,
            pid,
        });

        StartedSession {
            session_id,
            replaced,
        }
    }

    async fn handle_stop(&mut self, tool: &ToolName, reason: CloseReason) -> Option<ClosedSession> {
        let closed = self.close_session(tool, reason).await;
        if closed.is_none() {
            debug!(tool = %tool, reason = %reason, "Stop requested but no active session");
        }
        closed
    }

    async fn handle_close_if_current(
        &mut self,
        tool: &ToolName,
        session_id: SessionId,
        reason: CloseReason,
    ) -> Option<ClosedSession> {
        match self.sessions.get(tool) {
            Some(session) if session.id == session_id => self.close_session(tool, reason).await,
            Some(session) => {
                debug!(
                    tool = %tool,
                    probed = %session_id,
                    current = %session.id,
                    "Session was replaced since it was probed, ignoring"
                );
                None
            }
            None => None,
        }
    }

    async fn handle_stop_all(&mut self, reason: CloseReason) -> Vec<ClosedSession> {
        let mut tools: Vec<ToolName> = self.sessions.keys().cloned().collect();
        tools.sort();

        let mut closed = Vec::with_capacity(tools.len());
        for tool in &tools {
            if let Some(session) = self.close_session(tool, reason).await {
                closed.push(session);
            }
        }

        info!(count = closed.len(), reason = %reason, "Stopped all tracking");
        closed
    }

    fn handle_get_session_info(&self, tool: &ToolName) -> Option<SessionSnapshot> {
        let now = self.clock.now();
        self.sessions
            .get(tool)
            .filter(|s| s.is_active())
            .map(|s| s.snapshot(now))
    }

    fn handle_get_active_sessions(&self) -> Vec<SessionSnapshot> {
        let now = self.clock.now();
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.snapshot(now))
            .collect();
        snapshots.sort_by(|a, b| a.tool.cmp(&b.tool));
        snapshots
    }

    fn handle_get_watch_list(&self) -> Vec<WatchTarget> {
        let mut targets: Vec<WatchTarget> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| WatchTarget {
                tool: s.tool.clone(),
                session_id: s.id,
                handle: s.handle,
            })
            .collect();
        targets.sort_by(|a, b| a.tool.cmp(&b.tool));
        targets
    }

    // ========================================================================
    // Close & Flush
    // ========================================================================

    /// Runs `Active → Closing → Closed` for the tool's session.
    ///
    /// The duration is fixed by [`UsageSession::begin_close`], added to the
    /// registry exactly once, and the session is removed from the map even
    /// when the registry write fails.
    async fn close_session(
        &mut self,
        tool: &ToolName,
        reason: CloseReason,
    ) -> Option<ClosedSession> {
        let now = self.clock.now();
        let mut session = self.sessions.remove(tool)?;

        let Some(duration_secs) = session.begin_close(now) else {
            // Already closing or closed: someone else flushed it.
            debug!(tool = %tool, session_id = %session.id, "Session already closed");
            return None;
        };

        let total_runtime = self.flush(&session, duration_secs, now).await;
        session.finish_close();

        let closed = ClosedSession {
            session_id: session.id,
            tool: session.tool.clone(),
            started_at: session.started_at,
            ended_at: now,
            duration_secs,
            reason,
            total_runtime,
            flushed: total_runtime.is_some(),
        };

        info!(
            tool = %tool,
            session_id = %closed.session_id,
            duration_secs,
            total_runtime = ?total_runtime,
            reason = %reason,
            "Session closed"
        );

        let _ = self.event_publisher.send(TrackerEvent::SessionClosed {
            session: Box::new(closed.clone()),
        });
        Some(closed)
    }

    /// Adds the session's duration to the registry record.
    ///
    /// Returns the new total, or `None` if the write failed; the failure is
    /// logged with the lost duration.
    async fn flush(
        &self,
        session: &UsageSession,
        duration_secs: u64,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<u64> {
        let registry = Arc::clone(&self.registry);
        let tool = session.tool.clone();
        let write = tokio::task::spawn_blocking(move || {
            registry.update(&tool, &mut |record| {
                record.record_session(duration_secs, ended_at);
            })
        });

        let result = match write.await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    tool = %session.tool,
                    session_id = %session.id,
                    duration_secs,
                    error = %e,
                    "Registry write task failed, session runtime lost"
                );
                return None;
            }
        };
        match result {
            Ok(record) => Some(record.total_runtime),
            Err(e) if e.is_not_found() => {
                warn!(
                    tool = %session.tool,
                    session_id = %session.id,
                    duration_secs,
                    "Tool is not in the registry, session runtime dropped"
                );
                None
            }
            Err(e) => {
                error!(
                    tool = %session.tool,
                    session_id = %session.id,
                    duration_secs,
                    error = %e,
                    "Registry write failed, session runtime lost"
                );
                None
            }
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of active sessions.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
