//! In-memory track catalog with secondary indices.
//!
//! Builds lookups by track id, by normalized artist and by tag, and checks
//! that community affinity lists only reference tracks that exist.

use crate::error::{CatalogError, Result};
use crate::parser::{self, CatalogTrack, SimilarTrack};
use crate::types::*;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Main catalog structure: all tracks plus the indices built over them.
#[derive(Debug, Default)]
pub struct TrackCatalog {
    pub(crate) tracks: HashMap<TrackId, CatalogTrack>,
    /// Insertion order, for deterministic iteration
    pub(crate) order: Vec<TrackId>,
    /// Track ids grouped by normalized artist
    pub(crate) artist_index: HashMap<String, Vec<TrackId>>,
    /// Track ids grouped by normalized tag
    pub(crate) tag_index: HashMap<String, Vec<TrackId>>,
}

impl TrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and index a catalog file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading track catalog from {:?}", path);
        let tracks = parser::parse_catalog_file(path)?;
        let catalog = Self::from_tracks(tracks)?;
        info!("Catalog loaded: {} tracks, {} artists", catalog.len(), catalog.artist_index.len());
        Ok(catalog)
    }

    /// Parse and index a catalog from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        Self::from_tracks(parser::parse_catalog_str(content)?)
    }

    /// Index a list of tracks and validate cross references
    pub fn from_tracks(tracks: Vec<CatalogTrack>) -> Result<Self> {
        let mut catalog = Self::new();
        for track in tracks {
            catalog.insert_track(track)?;
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Insert a track and update the secondary indices
    pub fn insert_track(&mut self, track: CatalogTrack) -> Result<()> {
        if self.tracks.contains_key(&track.id) {
            return Err(CatalogError::DuplicateTrack { id: track.id });
        }

        self.artist_index
            .entry(normalize_artist(&track.artist))
            .or_default()
            .push(track.id.clone());

        for tag in normalize_tags(&track.tags) {
            self.tag_index.entry(tag).or_default().push(track.id.clone());
        }

        self.order.push(track.id.clone());
        self.tracks.insert(track.id.clone(), track);
        Ok(())
    }

    /// Check that every similar-track entry points at a known track
    pub fn validate(&self) -> Result<()> {
        let missing = self
            .order
            .par_iter()
            .filter_map(|id| self.tracks.get(id))
            .flat_map_iter(|track| track.similar.iter())
            .find_any(|similar| !self.tracks.contains_key(&similar.id));

        match missing {
            Some(similar) => Err(CatalogError::MissingReference {
                entity: "similar track".to_string(),
                id: similar.id.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn get_track(&self, id: &str) -> Option<&CatalogTrack> {
        self.tracks.get(id)
    }

    /// Provider stub for a track
    pub fn stub(&self, id: &str) -> Option<TrackStub> {
        self.tracks.get(id).map(CatalogTrack::stub)
    }

    /// Community affinity list for a seed (empty if unknown)
    pub fn similar_to(&self, id: &str) -> &[SimilarTrack] {
        self.tracks
            .get(id)
            .map(|t| t.similar.as_slice())
            .unwrap_or(&[])
    }

    /// Track ids by the given artist (case-insensitive)
    pub fn tracks_by_artist(&self, artist: &str) -> &[TrackId] {
        self.artist_index
            .get(&normalize_artist(artist))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Track ids carrying the given tag (case-insensitive)
    pub fn tracks_with_tag(&self, tag: &str) -> &[TrackId] {
        normalize_tag(tag)
            .and_then(|t| self.tag_index.get(&t))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All track ids in insertion order
    pub fn track_ids(&self) -> &[TrackId] {
        &self.order
    }

    /// Case-insensitive title substring search, in catalog order
    pub fn search(&self, query: &str) -> Vec<&CatalogTrack> {
        let query = query.trim().to_lowercase();
        self.order
            .iter()
            .filter_map(|id| self.tracks.get(id))
            .filter(|t| {
                t.title.to_lowercase().contains(&query) || t.artist.to_lowercase().contains(&query)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, artist: &str, tags: &[&str]) -> CatalogTrack {
        CatalogTrack {
            id: id.to_string(),
            title: format!("Title {}", id),
            artist: artist.to_string(),
            year: Some(2000),
            popularity: 50,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            features: Default::default(),
            similar: Vec::new(),
        }
    }

    fn create_test_catalog() -> TrackCatalog {
        let mut seed = track("s", "Seed Artist", &["Rock", "indie"]);
        seed.similar.push(SimilarTrack {
            id: "a".to_string(),
            score: 0.9,
        });
        TrackCatalog::from_tracks(vec![
            seed,
            track("a", "Other", &["rock"]),
            track("b", "seed artist", &["pop"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_artist_index_is_case_insensitive() {
        let catalog = create_test_catalog();
        assert_eq!(catalog.tracks_by_artist("SEED ARTIST").len(), 2);
        assert_eq!(catalog.tracks_by_artist("nobody").len(), 0);
    }

    #[test]
    fn test_tag_index() {
        let catalog = create_test_catalog();
        let rock = catalog.tracks_with_tag("ROCK");
        assert_eq!(rock.len(), 2);
        assert!(catalog.tracks_with_tag("").is_empty());
    }

    #[test]
    fn test_similar_and_order() {
        let catalog = create_test_catalog();
        assert_eq!(catalog.similar_to("s").len(), 1);
        assert!(catalog.similar_to("zzz").is_empty());
        assert_eq!(catalog.track_ids(), &["s".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_duplicate_track_rejected() {
        let result = TrackCatalog::from_tracks(vec![track("a", "x", &[]), track("a", "y", &[])]);
        assert!(matches!(result, Err(CatalogError::DuplicateTrack { .. })));
    }

    #[test]
    fn test_missing_similar_reference_rejected() {
        let mut seed = track("s", "x", &[]);
        seed.similar.push(SimilarTrack {
            id: "ghost".to_string(),
            score: 0.5,
        });
        let result = TrackCatalog::from_tracks(vec![seed]);
        assert!(matches!(result, Err(CatalogError::MissingReference { .. })));
    }

    #[test]
    fn test_search_matches_title_or_artist() {
        let catalog = create_test_catalog();
        assert_eq!(catalog.search("title a").len(), 1);
        assert_eq!(catalog.search("seed").len(), 2);
    }
}
