//! Concurrent feature and tag enrichment of candidate stubs.
//!
//! ## Algorithm
//! For one stub, every feature source and every tag source is queried at
//! once (`join_all`), each call bounded by the per-source timeout. A source
//! that fails or times out simply contributes nothing; the surviving
//! samples go through fusion and the tag sets are unioned.
//!
//! Many stubs are enriched with bounded concurrency (`buffer_unordered`).
//! Output order is arbitrary; ranking happens later.

use catalog::{RawFeatureSample, TrackCandidate, TrackStub};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use pipeline::FeatureFusionEngine;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::traits::{FeatureSource, TagSource};

/// Fans enrichment out over all configured sources.
#[derive(Clone)]
pub struct Enricher {
    fusion: FeatureFusionEngine,
    feature_sources: Vec<Arc<dyn FeatureSource>>,
    tag_sources: Vec<Arc<dyn TagSource>>,
    source_timeout: Duration,
    concurrency: usize,
}

impl Enricher {
    pub fn new(fusion: FeatureFusionEngine) -> Self {
        Self {
            fusion,
            feature_sources: Vec::new(),
            tag_sources: Vec::new(),
            source_timeout: Duration::from_millis(800),
            concurrency: 8,
        }
    }

    pub fn with_feature_source(mut self, source: Arc<dyn FeatureSource>) -> Self {
        self.feature_sources.push(source);
        self
    }

    pub fn with_feature_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn FeatureSource>>) -> Self {
        self.feature_sources.extend(sources);
        self
    }

    pub fn with_tag_source(mut self, source: Arc<dyn TagSource>) -> Self {
        self.tag_sources.push(source);
        self
    }

    /// Configure the per-source call timeout (default: 800ms)
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Configure how many stubs are enriched at once (default: 8)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn fusion(&self) -> &FeatureFusionEngine {
        &self.fusion
    }

    /// Enrich one stub into a scored-ready candidate. Never fails.
    pub async fn enrich(&self, stub: TrackStub) -> TrackCandidate {
        let feature_calls = self
            .feature_sources
            .iter()
            .map(|source| self.fetch_features(source.as_ref(), &stub.id));
        let tag_calls = self
            .tag_sources
            .iter()
            .map(|source| self.fetch_tags(source.as_ref(), &stub.id));

        let (samples, tag_sets) = tokio::join!(join_all(feature_calls), join_all(tag_calls));

        let samples: Vec<RawFeatureSample> = samples.into_iter().flatten().collect();
        let tags: BTreeSet<String> = tag_sets.into_iter().flatten().flatten().collect();

        self.fusion.fuse_track(stub, &samples, tags)
    }

    /// Enrich many stubs with bounded concurrency.
    #[instrument(skip_all, fields(stubs = stubs.len()))]
    pub async fn enrich_all(&self, stubs: Vec<TrackStub>) -> Vec<TrackCandidate> {
        let candidates: Vec<TrackCandidate> = stream::iter(stubs)
            .map(|stub| self.enrich(stub))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        debug!("Enriched {} candidates", candidates.len());
        candidates
    }

    async fn fetch_features(&self, source: &dyn FeatureSource, track_id: &str) -> Option<RawFeatureSample> {
        match tokio::time::timeout(self.source_timeout, source.fetch_features(track_id)).await {
            Ok(Ok(sample)) => Some(sample),
            Ok(Err(e)) => {
                debug!("Feature source {} failed for {}: {}", source.source_id(), track_id, e);
                None
            }
            Err(_) => {
                debug!(
                    "Feature source {} timed out for {} after {:?}",
                    source.source_id(),
                    track_id,
                    self.source_timeout
                );
                None
            }
        }
    }

    async fn fetch_tags(&self, source: &dyn TagSource, track_id: &str) -> Option<BTreeSet<String>> {
        match tokio::time::timeout(self.source_timeout, source.fetch_tags(track_id)).await {
            Ok(Ok(tags)) => Some(tags),
            Ok(Err(e)) => {
                debug!("Tag source {} failed for {}: {}", source.source_id(), track_id, e);
                None
            }
            Err(_) => {
                debug!("Tag source {} timed out for {}", source.source_id(), track_id);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SourceError};
    use async_trait::async_trait;
    use catalog::FeatureDimension;

    struct FixedSource {
        id: &'static str,
        reliability: f64,
        energy: f64,
        delay: Duration,
    }

    #[async_trait]
    impl FeatureSource for FixedSource {
        fn source_id(&self) -> &str {
            self.id
        }

        async fn fetch_features(&self, _track_id: &str) -> Result<RawFeatureSample> {
            tokio::time::sleep(self.delay).await;
            Ok(RawFeatureSample::new(self.id, self.reliability).with_value(FeatureDimension::Energy, self.energy))
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl FeatureSource for BrokenSource {
        fn source_id(&self) -> &str {
            "broken"
        }

        async fn fetch_features(&self, _track_id: &str) -> Result<RawFeatureSample> {
            Err(SourceError::unavailable("broken", "connection refused"))
        }
    }

    struct FixedTags(&'static [&'static str]);

    #[async_trait]
    impl TagSource for FixedTags {
        fn source_id(&self) -> &str {
            "tags"
        }

        async fn fetch_tags(&self, _track_id: &str) -> Result<BTreeSet<String>> {
            Ok(self.0.iter().map(|t| t.to_string()).collect())
        }
    }

    fn fixed(id: &'static str, reliability: f64, energy: f64, delay_ms: u64) -> Arc<dyn FeatureSource> {
        Arc::new(FixedSource {
            id,
            reliability,
            energy,
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn test_failed_and_slow_sources_degrade_provenance_only() {
        let enricher = Enricher::new(FeatureFusionEngine::default())
            .with_feature_source(fixed("spotify", 1.0, 0.8, 0))
            .with_feature_source(Arc::new(BrokenSource))
            .with_feature_source(fixed("slow", 1.0, 0.0, 500))
            .with_tag_source(Arc::new(FixedTags(&["rock"])))
            .with_tag_source(Arc::new(FixedTags(&["indie"])))
            .with_source_timeout(Duration::from_millis(50));

        let candidate = enricher.enrich(TrackStub::new("t1", "Song", "Artist")).await;

        assert_eq!(candidate.features.provenance(FeatureDimension::Energy), 1);
        assert!((candidate.features.get(FeatureDimension::Energy) - 0.8).abs() < 1e-12);
        assert_eq!(candidate.tags.len(), 2, "tag sets are unioned");
    }

    #[tokio::test]
    async fn test_no_sources_gives_neutral_candidate() {
        let enricher = Enricher::new(FeatureFusionEngine::default());
        let candidate = enricher.enrich(TrackStub::new("t1", "Song", "Artist")).await;
        assert!(!candidate.features.has_audio_data());
        assert!(candidate.tags.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_all_keeps_every_stub() {
        let enricher = Enricher::new(FeatureFusionEngine::default())
            .with_feature_source(fixed("spotify", 1.0, 0.5, 5))
            .with_concurrency(2);

        let stubs: Vec<TrackStub> = (0..7)
            .map(|i| TrackStub::new(format!("t{}", i), "Song", "Artist"))
            .collect();
        let mut ids: Vec<String> = enricher
            .enrich_all(stubs)
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        ids.sort();

        assert_eq!(ids.len(), 7);
        assert_eq!(ids[0], "t0");
    }
}
