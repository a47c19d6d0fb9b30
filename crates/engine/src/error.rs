//! Error types for the engine crate.

use sources::SourceError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the recommendation service
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("No active session for user {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
