//! toolshed store - Persistent collaborators of the lifecycle engine
//!
//! This crate owns the on-disk files the engine reads and writes:
//! - `tools.json`: the tool registry ([`RegistryStore`], [`JsonRegistry`])
//! - `dependencies.json`: tool → environment edges ([`DependencyStore`],
//!   [`JsonDependencyStore`])
//!
//! In-memory variants of both stores are provided for tests and embedding.
//! Writes are serialized with an exclusive `fs2` lock and replace files
//! atomically.

pub mod dependencies;
pub mod error;
mod file;
pub mod registry;
pub mod version;

pub use dependencies::{
    DependencyConfig, DependencyStore, JsonDependencyStore, MemoryDependencyStore,
    DEPENDENCIES_FILE,
};
pub use error::{StoreError, StoreResult};
pub use registry::{JsonRegistry, MemoryRegistry, RegistryStore, REGISTRY_FILE};
pub use version::{FormatVersion, VersionError};
