//! Feature fusion: many partial raw samples in, one canonical vector out.
//!
//! ## Algorithm
//! 1. Resolve each sample's reliability (clamped to [0,1]; non-finite values
//!    fall back to the reliability table entry for the source)
//! 2. Normalize every reported raw value into [0,1] with the dimension's domain;
//!    non-finite values are skipped as if unreported
//! 3. Per dimension, sort contributions by (source, weight, value) so the
//!    result does not depend on the order samples arrived in
//! 4. Confidence-weighted mean per dimension; dimensions nobody reported get
//!    the neutral default with zero provenance
//!
//! Fusion never fails and never drops a track: when every source failed the
//! result is simply the all-neutral vector.

use catalog::{
    FeatureDimension, FusedFeatureVector, RawFeatureSample, SourceReliability, TrackCandidate,
    TrackStub,
};
use tracing::debug;

use crate::config::FusionConfig;

/// One normalized contribution to a dimension
#[derive(Debug, Clone, Copy)]
struct Contribution<'a> {
    source: &'a str,
    weight: f64,
    value: f64,
}

/// Merges per-source feature samples into a [`FusedFeatureVector`].
#[derive(Debug, Clone, Default)]
pub struct FeatureFusionEngine {
    reliability: SourceReliability,
}

impl FeatureFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            reliability: config.reliability,
        }
    }

    /// Reliability table used to resolve sample weights
    pub fn reliability(&self) -> &SourceReliability {
        &self.reliability
    }

    /// Create an empty sample for `source` weighted by the reliability table
    pub fn sample_for(&self, source: &str) -> RawFeatureSample {
        RawFeatureSample::new(source, self.reliability.weight_for(source))
    }

    /// Fuse all samples reported for one track.
    pub fn fuse(&self, samples: &[RawFeatureSample]) -> FusedFeatureVector {
        let mut contributions: [Vec<Contribution<'_>>; FeatureDimension::COUNT] =
            std::array::from_fn(|_| Vec::new());

        for sample in samples {
            let weight = self.resolve_weight(sample);
            if weight <= 0.0 {
                debug!("Ignoring sample from {} with zero reliability", sample.source);
                continue;
            }
            for (&dimension, &raw) in &sample.values {
                match dimension.normalize(raw) {
                    Some(value) => contributions[dimension.index()].push(Contribution {
                        source: &sample.source,
                        weight,
                        value,
                    }),
                    None => debug!(
                        "Skipping non-finite {} from {}",
                        dimension, sample.source
                    ),
                }
            }
        }

        let mut values = [0.0; FeatureDimension::COUNT];
        let mut provenance = [0u32; FeatureDimension::COUNT];
        let mut confidence = [0.0; FeatureDimension::COUNT];

        for dimension in FeatureDimension::ALL {
            let i = dimension.index();
            let list = &mut contributions[i];
            if list.is_empty() {
                values[i] = dimension.neutral();
                continue;
            }

            list.sort_by(|a, b| {
                a.source
                    .cmp(b.source)
                    .then_with(|| a.weight.total_cmp(&b.weight))
                    .then_with(|| a.value.total_cmp(&b.value))
            });

            let (weighted_sum, weight_sum) = list
                .iter()
                .fold((0.0, 0.0), |(ws, w), c| (ws + c.value * c.weight, w + c.weight));

            values[i] = weighted_sum / weight_sum;
            provenance[i] = list.len() as u32;
            confidence[i] = weight_sum;
        }

        FusedFeatureVector::from_parts(values, provenance, confidence)
    }

    /// Fuse samples and attach them to a provider stub
    pub fn fuse_track<I, S>(&self, stub: TrackStub, samples: &[RawFeatureSample], tags: I) -> TrackCandidate
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let features = self.fuse(samples);
        if !features.has_audio_data() {
            debug!("No audio features for {}; using neutral vector", stub.id);
        }
        TrackCandidate::from_stub(stub, features, tags)
    }

    fn resolve_weight(&self, sample: &RawFeatureSample) -> f64 {
        if sample.reliability.is_finite() {
            sample.reliability.clamp(0.0, 1.0)
        } else {
            self.reliability.weight_for(&sample.source)
        }
    }
}
