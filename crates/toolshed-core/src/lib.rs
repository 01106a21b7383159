//! toolshed core - Shared domain types for tool lifecycle management
//!
//! This crate provides the domain types shared between the engine
//! (`toolshed-engine`), the persistent stores (`toolshed-store`) and the
//! command-line host:
//! - tools and their registry records
//! - shared runtime environments
//! - usage sessions and their close lifecycle
//! - deletion plans and commit summaries
//! - the capability traits the engine consumes (process and filesystem probes)
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod clock;
pub mod environment;
pub mod error;
pub mod plan;
pub mod probe;
pub mod session;
pub mod tool;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use environment::{Environment, EnvironmentKey};
pub use error::{DomainError, DomainResult};
pub use plan::{CommitSummary, DeletionPlan, ItemFailure, ItemSize, SavingsBreakdown};
pub use probe::{FilesystemProbe, Liveness, ProcessHandle, ProcessProbe, SizeReport};
pub use session::{
    CloseReason, ClosedSession, SessionId, SessionSnapshot, SessionState, UsageSession,
};
pub use tool::{ToolName, ToolRecord, ToolStatus};
