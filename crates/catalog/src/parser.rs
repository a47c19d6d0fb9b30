//! Parser for JSON track catalogs.
//!
//! A catalog is the offline stand-in for the metadata, feature and tag
//! providers. Each track carries raw feature values per source, so the
//! fusion step sees the same partial, multi-source data a live system would.
//!
//! ```json
//! {
//!   "tracks": [
//!     {
//!       "id": "trk-001",
//!       "title": "Night Drive",
//!       "artist": "Neon Coast",
//!       "year": 2016,
//!       "popularity": 61,
//!       "tags": ["synthwave", "electronic"],
//!       "features": {
//!         "spotify": { "energy": 0.82, "tempo": 118.0, "duration_ms": 241000 },
//!         "deezer": { "energy": 0.78 }
//!       },
//!       "similar": [ { "id": "trk-002", "score": 0.74 } ]
//!     }
//!   ]
//! }
//! ```

use crate::error::{CatalogError, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Top-level catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub tracks: Vec<CatalogTrack>,
}

/// One track entry in a catalog document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogTrack {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default = "default_popularity")]
    pub popularity: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Raw feature values keyed by source id, then by dimension name
    #[serde(default)]
    pub features: BTreeMap<SourceId, BTreeMap<String, f64>>,
    /// Community "listeners also played" affinity list
    #[serde(default)]
    pub similar: Vec<SimilarTrack>,
}

/// Community affinity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarTrack {
    pub id: TrackId,
    pub score: f64,
}

fn default_popularity() -> u8 {
    50
}

impl CatalogTrack {
    /// Provider-level stub for this track (no community score attached)
    pub fn stub(&self) -> TrackStub {
        let mut stub = TrackStub::new(self.id.clone(), self.title.clone(), self.artist.clone())
            .with_popularity(self.popularity);
        stub.release_year = self.year;
        stub
    }

    /// Build the raw sample one source reported for this track.
    ///
    /// Returns `None` when the source has no entry. Unknown dimension names
    /// are skipped.
    pub fn raw_sample(&self, source: &str, reliability: f64) -> Option<RawFeatureSample> {
        let values = self.features.get(source)?;
        let mut sample = RawFeatureSample::new(source, reliability);
        for (name, &raw) in values {
            match FeatureDimension::from_name(name) {
                Some(dimension) => {
                    sample.values.insert(dimension, raw);
                }
                None => debug!("Skipping unknown feature '{}' from {} for {}", name, source, self.id),
            }
        }
        Some(sample)
    }

    /// Sources that reported features for this track
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(|s| s.as_str())
    }
}

/// Parse a catalog document from a JSON string
pub fn parse_catalog_str(content: &str) -> Result<Vec<CatalogTrack>> {
    let document: CatalogDocument = serde_json::from_str(content)?;
    for track in &document.tracks {
        validate_track(track)?;
    }
    Ok(document.tracks)
}

/// Parse a catalog document from a file
pub fn parse_catalog_file(path: &Path) -> Result<Vec<CatalogTrack>> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CatalogError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => CatalogError::IoError(e),
    })?;
    parse_catalog_str(&content)
}

fn validate_track(track: &CatalogTrack) -> Result<()> {
    if track.id.trim().is_empty() {
        return Err(CatalogError::InvalidValue {
            field: "id".to_string(),
            value: track.id.clone(),
        });
    }
    if track.artist.trim().is_empty() {
        return Err(CatalogError::InvalidValue {
            field: format!("artist ({})", track.id),
            value: track.artist.clone(),
        });
    }
    if track.popularity > 100 {
        return Err(CatalogError::InvalidValue {
            field: format!("popularity ({})", track.id),
            value: track.popularity.to_string(),
        });
    }
    if let Some(bad) = track.similar.iter().find(|s| !s.score.is_finite()) {
        return Err(CatalogError::InvalidValue {
            field: format!("similar score ({} -> {})", track.id, bad.id),
            value: bad.score.to_string(),
        });
    }
    Ok(())
}
