//! Error types for the collaborator layer.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by candidate providers, feature/tag sources and stores.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Source {source_id} unavailable: {reason}")]
    Unavailable { source_id: String, reason: String },

    #[error("Source {source_id} timed out after {after:?}")]
    Timeout { source_id: String, after: Duration },

    #[error("No candidates for seed {seed_id}")]
    NoCandidates { seed_id: String },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl SourceError {
    pub fn unavailable(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. } | SourceError::Timeout { .. })
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::PersistenceFailure(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::PersistenceFailure(err.to_string())
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, SourceError>;
