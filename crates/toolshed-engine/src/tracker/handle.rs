//! Client interface for interacting with the TrackerActor.
//!
//! The `TrackerHandle` is a cheap-to-clone interface for sending commands
//! to the tracker actor and subscribing to session events. The launcher,
//! the process monitor and the deletion planner each hold a clone.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `TrackerError::ChannelClosed`, or to an
//!   empty answer for read-only queries

use tokio::sync::{broadcast, mpsc, oneshot};

use toolshed_core::{
    CloseReason, ClosedSession, ProcessHandle, SessionId, SessionSnapshot, ToolName,
};

use super::commands::{StartedSession, TrackerCommand, TrackerError, TrackerEvent, WatchTarget};

// ============================================================================
// Tracker Handle
// ============================================================================

/// Handle for interacting with the tracker actor.
///
/// ```ignore
/// let tracker = spawn_tracker(registry, Arc::new(SystemClock));
///
/// tracker.start_tracking(ToolName::new("FastQC"), Some(handle)).await?;
/// // ...
/// tracker.stop_tracking(ToolName::new("FastQC")).await?;
/// ```
#[derive(Clone)]
pub struct TrackerHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<TrackerCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<TrackerEvent>,
}

impl TrackerHandle {
    /// Create a new tracker handle.
    pub fn new(
        sender: mpsc::Sender<TrackerCommand>,
        event_sender: broadcast::Sender<TrackerEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Opens a session for a freshly launched tool.
    ///
    /// If the tool already has an active session, that session is closed
    /// and flushed first and returned in [`StartedSession::replaced`].
    ///
    /// # Errors
    ///
    /// - `TrackerError::ChannelClosed` if the actor has shut down
    pub async fn start_tracking(
        &self,
        tool: ToolName,
        handle: Option<ProcessHandle>,
    ) -> Result<StartedSession, TrackerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TrackerCommand::StartTracking {
                tool,
                handle,
                respond_to: tx,
            })
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;

        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Explicitly stops the tool's session.
    ///
    /// Returns `Ok(None)` when the tool has no active session.
    pub async fn stop_tracking(&self, tool: ToolName) -> Result<Option<ClosedSession>, TrackerError> {
        self.stop_tracking_with(tool, CloseReason::Explicit).await
    }

    /// Stops the tool's session, recording `reason`.
    pub async fn stop_tracking_with(
        &self,
        tool: ToolName,
        reason: CloseReason,
    ) -> Result<Option<ClosedSession>, TrackerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TrackerCommand::StopTracking {
                tool,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;

        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Closes the tool's session only if it is still `session_id`.
    pub async fn close_if_current(
        &self,
        tool: ToolName,
        session_id: SessionId,
        reason: CloseReason,
    ) -> Result<Option<ClosedSession>, TrackerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TrackerCommand::CloseIfCurrent {
                tool,
                session_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;

        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Closes and flushes every active session. Call once at shutdown.
    pub async fn stop_all_tracking(&self) -> Result<Vec<ClosedSession>, TrackerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TrackerCommand::StopAll {
                reason: CloseReason::Shutdown,
                respond_to: tx,
            })
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;

        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Read-only snapshot of the tool's active session.
    ///
    /// Returns `None` if there is no active session or if communication
    /// with the actor fails.
    pub async fn get_session_info(&self, tool: ToolName) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TrackerCommand::GetSessionInfo {
                tool,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Snapshots of every active session, ordered by tool name.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn active_sessions(&self) -> Vec<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(TrackerCommand::GetActiveSessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Sessions the process monitor should probe.
    pub async fn watch_list(&self) -> Vec<WatchTarget> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(TrackerCommand::GetWatchList { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribe to session events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
