//! # Catalog Crate
//!
//! Domain types shared across the workspace, plus an offline JSON track
//! catalog used by the demo collaborators, the CLI and the tests.
//!
//! ## Main Components
//!
//! - **types**: Feature schema, fused vectors, tracks, swipes, preference state
//! - **parser**: Parse catalog JSON documents into track entries
//! - **index**: `TrackCatalog` with artist and tag lookups
//! - **error**: Error types for catalog loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use catalog::TrackCatalog;
//! use std::path::Path;
//!
//! let catalog = TrackCatalog::load_from_file(Path::new("data/catalog.json"))?;
//! let seed = catalog.stub("trk-001").unwrap();
//! let same_artist = catalog.tracks_by_artist(&seed.artist);
//! println!("{} has {} tracks", seed.artist, same_artist.len());
//! ```

pub mod error;
pub mod types;
pub mod parser;
pub mod index;

// Re-export commonly used types for convenience
pub use error::{CatalogError, Result};
pub use index::TrackCatalog;
pub use parser::{CatalogDocument, CatalogTrack, SimilarTrack};
pub use types::{
    // Type aliases
    SourceId,
    TrackId,
    UserId,
    // Feature schema
    DimensionValue,
    FeatureDimension,
    FeatureWeights,
    FusedFeatureVector,
    RawFeatureSample,
    SourceReliability,
    // Tracks and feedback
    SessionPhase,
    SwipeCounters,
    SwipeDirection,
    SwipeEvent,
    TrackCandidate,
    TrackStub,
    UserPreferenceState,
    // Helpers
    normalize_artist,
    normalize_tag,
    normalize_tags,
    song_key,
};
