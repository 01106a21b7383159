//! Usage-session tracking using the Actor pattern.
//!
//! The tracker owns the map of active usage sessions (at most one per tool).
//! Callers and the process monitor talk to it through a [`TrackerHandle`];
//! every request is a message on one mpsc channel, so all reads and writes
//! of the session map are serialized.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                          ┌──────────────────┐
//! │ Launcher / CLI  │──┐                   ┌──▶│ Broadcast Channel│
//! └─────────────────┘  │  TrackerCommand   │   └──────────────────┘
//!                      ├──(mpsc channel)──▶│ TrackerActor       │
//! ┌─────────────────┐  │                   │  HashMap<ToolName, │
//! │ ProcessMonitor  │──┘                   │   UsageSession>    │
//! └─────────────────┘                      └────────┬───────────┘
//!                                                   │ additive flush
//!                                                   ▼
//!                                           RegistryStore::update
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use toolshed_core::Clock;
use toolshed_store::RegistryStore;

mod actor;
mod commands;
mod handle;

pub use actor::TrackerActor;
pub use commands::{StartedSession, TrackerCommand, TrackerError, TrackerEvent, WatchTarget};
pub use handle::TrackerHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the tracker actor and return a handle for interaction.
///
/// The actor runs until every handle clone is dropped, then flushes any
/// sessions still open.
///
/// # Panics
///
/// Must be called from within a tokio runtime.
pub fn spawn_tracker(registry: Arc<dyn RegistryStore>, clock: Arc<dyn Clock>) -> TrackerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = TrackerActor::new(cmd_rx, event_tx.clone(), registry, clock);
    tokio::spawn(actor.run());

    TrackerHandle::new(cmd_tx, event_tx)
}
