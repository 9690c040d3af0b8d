//! Error types for tools, registry, storage and analysis.
//!
//! Library-level failures are typed so callers can decide on retry and
//! reporting; the binary wraps them in `anyhow` at the edges.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Why a single tool invocation failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// The backing service or binary could not be reached.
    #[error("tool unavailable: {0}")]
    Unavailable(String),

    /// The invocation did not finish within its time limit.
    #[error("tool timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The entity value does not fit what the tool expects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backing service answered with an error.
    #[error("external error: {0}")]
    ExternalError(String),
}

impl ToolError {
    /// Only an unreachable backend is worth a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Unavailable(_))
    }
}

/// Registry construction failures. These are fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{0}' declares no supported entity types")]
    NoSupportedTypes(String),

    #[error("tool '{0}' is registered more than once")]
    DuplicateTool(String),

    #[error("tool '{name}' is misconfigured: {reason}")]
    InvalidTool { name: String, reason: String },
}

/// Failures of the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("entity not found: {0}")]
    EntityNotFound(Uuid),

    #[error("entity {0} is archived")]
    EntityArchived(Uuid),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Failures of the pattern analysis stage.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("reasoning service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("reasoning service timed out after {0}s")]
    Timeout(u64),

    #[error("could not parse analysis response: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures that prevent a run from starting at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("project {0} is archived")]
    ProjectArchived(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ToolError::Unavailable("down".into()).is_transient());
        assert!(!ToolError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ToolError::InvalidInput("bad".into()).is_transient());
        assert!(!ToolError::ExternalError("500".into()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = ToolError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "tool timed out after 1.5s");

        let err = RegistryError::NoSupportedTypes("WHOIS".into());
        assert!(err.to_string().contains("WHOIS"));
    }
}
