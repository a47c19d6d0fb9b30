//! Core traits for the exclusion stage.
//!
//! Filters run on provider stubs before any enrichment happens, so an
//! excluded track never costs a feature or tag lookup.

use anyhow::Result;
use catalog::{TrackCandidate, TrackId, TrackStub, normalize_artist};
use std::collections::HashSet;

use crate::learner::PreferenceSnapshot;

/// Everything a filter may consult for one batch.
///
/// Built once per batch by the orchestrator from the session's served
/// history and the current preference snapshot.
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    pub seed_id: TrackId,
    pub seed_song_key: String,
    /// Tracks already served or queued this session
    pub served_ids: HashSet<TrackId>,
    /// Song keys (title + artist) already served or queued this session
    pub served_song_keys: HashSet<String>,
    /// Rejected tracks and other per-user exclusions
    pub excluded_tracks: HashSet<TrackId>,
    /// Normalized artist names banned for the session
    pub excluded_artists: HashSet<String>,
    /// Tracks the user accepted before
    pub liked_tracks: HashSet<TrackId>,
    /// Song keys of tracks the user accepted before
    pub liked_song_keys: HashSet<String>,
}

impl FilterContext {
    pub fn new(seed: &TrackCandidate) -> Self {
        Self {
            seed_id: seed.id.clone(),
            seed_song_key: seed.song_key(),
            ..Default::default()
        }
    }

    /// Mark tracks as already served
    pub fn with_served<'a, I>(mut self, served: I) -> Self
    where
        I: IntoIterator<Item = &'a TrackCandidate>,
    {
        for track in served {
            self.served_ids.insert(track.id.clone());
            self.served_song_keys.insert(track.song_key());
        }
        self
    }

    /// Take hard exclusions and liked tracks from a preference snapshot
    pub fn with_snapshot(mut self, snapshot: &PreferenceSnapshot) -> Self {
        self.excluded_tracks
            .extend(snapshot.hard_excluded_tracks.iter().cloned());
        self.excluded_artists
            .extend(snapshot.hard_excluded_artists.iter().map(|a| normalize_artist(a)));
        self.liked_tracks.extend(snapshot.liked_tracks.iter().cloned());
        self.liked_song_keys
            .extend(snapshot.liked_song_keys.iter().cloned());
        self
    }
}

/// Core trait for filtering provider stubs.
///
/// `Send + Sync` lets one pipeline be shared across sessions.
pub trait Filter: Send + Sync {
    /// Returns the name of this filter (for logging/debugging)
    fn name(&self) -> &str;

    /// Apply this filter to a set of stubs.
    ///
    /// # Arguments
    /// * `stubs` - The stubs to filter (takes ownership)
    /// * `context` - Seed, served history and exclusions for this batch
    fn apply(&self, stubs: Vec<TrackStub>, context: &FilterContext) -> Result<Vec<TrackStub>>;
}
