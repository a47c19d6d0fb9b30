//! Collaborators backed by the offline [`TrackCatalog`].
//!
//! The candidate provider gathers candidates in tiers, strongest signal
//! first:
//! 1. Community "listeners also played" tracks, carrying their affinity
//! 2. Other tracks by the seed's artist, at a fixed mid affinity
//! 3. When the first two tiers found too few, tracks sharing the seed's
//!    tags, ranked by how many tags they share, at a low fixed affinity
//!
//! The seed and every excluded id are skipped in all tiers.

use async_trait::async_trait;
use catalog::{
    normalize_tags, RawFeatureSample, SourceReliability, TrackCatalog, TrackId, TrackStub,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{Result, SourceError};
use crate::traits::{CandidateProvider, FeatureSource, TagSource};

/// Candidate provider over the catalog's affinity lists, artists and tags.
#[derive(Clone)]
pub struct CatalogCandidateProvider {
    catalog: Arc<TrackCatalog>,

    /// Affinity attached to same-artist candidates
    same_artist_affinity: f64,

    /// Affinity attached to tag-overlap candidates
    tag_fallback_affinity: f64,

    /// Tag fallback runs when the first two tiers found fewer than this
    fallback_threshold: usize,
}

impl CatalogCandidateProvider {
    pub fn new(catalog: Arc<TrackCatalog>) -> Self {
        Self {
            catalog,
            same_artist_affinity: 0.5,
            tag_fallback_affinity: 0.3,
            fallback_threshold: 20,
        }
    }

    /// Configure the same-artist affinity (default: 0.5)
    pub fn with_same_artist_affinity(mut self, affinity: f64) -> Self {
        self.same_artist_affinity = affinity;
        self
    }

    /// Configure the tag-overlap affinity (default: 0.3)
    pub fn with_tag_fallback_affinity(mut self, affinity: f64) -> Self {
        self.tag_fallback_affinity = affinity;
        self
    }

    /// Configure when the tag fallback kicks in (default: fewer than 20)
    pub fn with_fallback_threshold(mut self, threshold: usize) -> Self {
        self.fallback_threshold = threshold;
        self
    }

    /// Synchronous candidate gathering; the async trait method wraps this.
    pub fn gather(&self, seed_id: &str, exclude: &HashSet<TrackId>, page_size: usize) -> Vec<TrackStub> {
        let Some(seed) = self.catalog.get_track(seed_id) else {
            debug!("Seed {} not in catalog", seed_id);
            return Vec::new();
        };

        let mut seen: HashSet<TrackId> = HashSet::from([seed.id.clone()]);
        let mut stubs = Vec::new();

        let mut push = |stubs: &mut Vec<TrackStub>, id: &str, affinity: f64| {
            if exclude.contains(id) || !seen.insert(id.to_string()) {
                return;
            }
            if let Some(stub) = self.catalog.stub(id) {
                stubs.push(stub.with_community_score(affinity));
            }
        };

        // Step 1: community affinity, strongest first
        let mut similar: Vec<_> = self.catalog.similar_to(seed_id).iter().collect();
        similar.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        for entry in similar {
            push(&mut stubs, &entry.id, entry.score);
        }
        let community_count = stubs.len();

        // Step 2: same artist
        for id in self.catalog.tracks_by_artist(&seed.artist) {
            push(&mut stubs, id, self.same_artist_affinity);
        }
        let artist_count = stubs.len() - community_count;

        // Step 3: tag overlap fallback
        if stubs.len() < self.fallback_threshold {
            let mut overlap: HashMap<&str, usize> = HashMap::new();
            for tag in normalize_tags(&seed.tags) {
                for id in self.catalog.tracks_with_tag(&tag) {
                    *overlap.entry(id.as_str()).or_insert(0) += 1;
                }
            }
            let mut ranked: Vec<(&str, usize)> = overlap.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

            for (id, _) in ranked {
                push(&mut stubs, id, self.tag_fallback_affinity);
            }
        }

        debug!(
            "Gathered {} candidates for {} (community: {}, artist: {}, tags: {})",
            stubs.len(),
            seed_id,
            community_count,
            artist_count,
            stubs.len() - community_count - artist_count
        );

        stubs.truncate(page_size);
        stubs
    }
}

#[async_trait]
impl CandidateProvider for CatalogCandidateProvider {
    fn name(&self) -> &str {
        "catalog"
    }

    #[instrument(skip(self, exclude), fields(excluded = exclude.len()))]
    async fn fetch_candidates(
        &self,
        seed_id: &str,
        exclude: &HashSet<TrackId>,
        page_size: usize,
    ) -> Result<Vec<TrackStub>> {
        Ok(self.gather(seed_id, exclude, page_size))
    }

    async fn lookup_track(&self, track_id: &str) -> Result<Option<TrackStub>> {
        Ok(self.catalog.stub(track_id))
    }
}

/// Serves one source's raw feature values from the catalog.
pub struct CatalogFeatureSource {
    catalog: Arc<TrackCatalog>,
    source_id: String,
    reliability: f64,
}

impl CatalogFeatureSource {
    pub fn new(catalog: Arc<TrackCatalog>, source_id: impl Into<String>, reliability: f64) -> Self {
        Self {
            catalog,
            source_id: source_id.into(),
            reliability,
        }
    }

    /// One feature source per source id present anywhere in the catalog,
    /// weighted by the reliability table.
    pub fn all(catalog: Arc<TrackCatalog>, table: &SourceReliability) -> Vec<Arc<dyn FeatureSource>> {
        let ids: BTreeSet<String> = catalog
            .track_ids()
            .iter()
            .filter_map(|id| catalog.get_track(id))
            .flat_map(|track| track.source_ids().map(str::to_string))
            .collect();

        ids.into_iter()
            .map(|id| {
                let weight = table.weight_for(&id);
                Arc::new(Self::new(catalog.clone(), id, weight)) as Arc<dyn FeatureSource>
            })
            .collect()
    }
}

#[async_trait]
impl FeatureSource for CatalogFeatureSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_features(&self, track_id: &str) -> Result<RawFeatureSample> {
        self.catalog
            .get_track(track_id)
            .and_then(|track| track.raw_sample(&self.source_id, self.reliability))
            .ok_or_else(|| SourceError::unavailable(&self.source_id, format!("no features for {}", track_id)))
    }
}

/// Serves the catalog's tags for a track.
pub struct CatalogTagSource {
    catalog: Arc<TrackCatalog>,
}

impl CatalogTagSource {
    pub fn new(catalog: Arc<TrackCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TagSource for CatalogTagSource {
    fn source_id(&self) -> &str {
        "catalog-tags"
    }

    async fn fetch_tags(&self, track_id: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .catalog
            .get_track(track_id)
            .map(|track| normalize_tags(&track.tags))
            .unwrap_or_default())
    }
}
