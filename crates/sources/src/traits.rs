//! Collaborator traits the engine consumes.
//!
//! Every trait is object safe through `async_trait` and is held as
//! `Arc<dyn ...>`, so tests can swap in delayed, failing or counting
//! doubles without touching the engine.

use async_trait::async_trait;
use catalog::{RawFeatureSample, SwipeEvent, TrackId, TrackStub, UserPreferenceState};
use std::collections::{BTreeSet, HashSet};

use crate::error::Result;

/// Supplies candidate stubs for a seed track.
#[async_trait]
pub trait CandidateProvider: Send + Sync {
    /// Provider identifier for logs
    fn name(&self) -> &str;

    /// Fetch up to `page_size` stubs related to `seed_id`.
    ///
    /// # Arguments
    /// * `seed_id` - The seed track
    /// * `exclude` - Ids already served or excluded this session
    /// * `page_size` - Maximum number of stubs to return
    ///
    /// # Returns
    /// * `Ok(Vec<TrackStub>)` - Possibly empty; an empty page is not an error
    /// * `Err(SourceError)` - The provider could not be reached
    async fn fetch_candidates(
        &self,
        seed_id: &str,
        exclude: &HashSet<TrackId>,
        page_size: usize,
    ) -> Result<Vec<TrackStub>>;

    /// Resolve a single track, used for the seed
    async fn lookup_track(&self, track_id: &str) -> Result<Option<TrackStub>>;
}

/// One audio-feature source (one analysis provider).
#[async_trait]
pub trait FeatureSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Raw values this source knows for the track
    async fn fetch_features(&self, track_id: &str) -> Result<RawFeatureSample>;
}

/// One tag source. An empty set is a valid answer.
#[async_trait]
pub trait TagSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_tags(&self, track_id: &str) -> Result<BTreeSet<String>>;
}

/// Persists preference state and the swipe log.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// `Ok(None)` when the user has no saved state yet
    async fn load_preference_state(&self, user_id: &str) -> Result<Option<UserPreferenceState>>;

    async fn save_preference_state(&self, user_id: &str, state: &UserPreferenceState) -> Result<()>;

    async fn append_swipe(&self, user_id: &str, event: &SwipeEvent) -> Result<()>;
}
