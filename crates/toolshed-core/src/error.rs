//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Tool names must be non-empty and free of path separators
    #[error("Invalid tool name: {0:?}")]
    InvalidToolName(String),

    /// Environment keys must be non-empty and free of path separators
    #[error("Invalid environment key: {0:?}")]
    InvalidEnvironmentKey(String),

    /// Parse error for persisted data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Returns true if `value` can be used as a single path component.
///
/// Both tool names and environment keys end up joined onto install roots,
/// so anything that could escape the root is rejected.
pub(crate) fn is_safe_component(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed == value
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
}
