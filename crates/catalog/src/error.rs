//! Error types for the catalog crate.
//!
//! Catalog loading is the only place in the workspace where malformed input
//! is a hard error: a fixture that cannot be parsed is a configuration
//! mistake, not a degraded data source.

use thiserror::Error;

/// Errors that can occur while loading and validating a track catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    /// File could not be found or opened
    #[error("Failed to open catalog file: {path}")]
    FileNotFound { path: String },

    /// I/O error occurred while reading the file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The catalog document is not valid JSON for the expected shape
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A track field had an invalid value
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// The same track id appears twice
    #[error("Duplicate track id: {id}")]
    DuplicateTrack { id: String },

    /// Referenced entity doesn't exist (e.g. a similar-track entry for an unknown id)
    #[error("Missing reference: {entity} with id {id}")]
    MissingReference { entity: String, id: String },
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, CatalogError>;
