//! Composite seed/candidate similarity.
//!
//! ## Algorithm
//! 1. Audio cluster: cosine, Euclidean and Manhattan similarity of the
//!    importance-weighted feature vectors (neutral 0.5 each when either side
//!    has no audio data at all)
//! 2. Tag overlap: Jaccard similarity of the lowercased tag sets
//! 3. Community affinity reported by the candidate provider
//! 4. Temporal similarity of release years within an era window
//! 5. Popularity bell peaking at a mid-range popularity
//! 6. Weighted mean of the components, clamped to [0,1]
//!
//! Scoring is pure: it never mutates its inputs, and batches are scored in
//! parallel with Rayon. Ordering is applied afterwards by [`rank`].

use catalog::{FeatureDimension, FeatureWeights, TrackCandidate};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use crate::config::ScoringConfig;

type Vector = [f64; FeatureDimension::COUNT];

/// Labeled components of one score, kept for explanations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub cosine: f64,
    pub euclidean: f64,
    pub manhattan: f64,
    pub tags: f64,
    pub community: f64,
    pub temporal: f64,
    pub popularity: f64,
    /// Audio components were replaced by the neutral value
    pub audio_neutral: bool,
    /// Composite similarity before personalization
    pub base: f64,
    /// Multiplier from soft artist rejects (1.0 when none)
    pub artist_penalty: f64,
    /// Additive preferred-tag bonus
    pub tag_bonus: f64,
    /// Final score in [0,1]
    pub total: f64,
}

impl ScoreBreakdown {
    /// One-line human readable explanation
    pub fn explain(&self) -> String {
        let mut text = format!(
            "score {:.3} = audio[cos {:.2}, euc {:.2}, man {:.2}{}] tags {:.2} community {:.2} era {:.2} popularity {:.2}",
            self.total,
            self.cosine,
            self.euclidean,
            self.manhattan,
            if self.audio_neutral { ", no data" } else { "" },
            self.tags,
            self.community,
            self.temporal,
            self.popularity,
        );
        if self.artist_penalty < 1.0 {
            text.push_str(&format!(" x artist penalty {:.2}", self.artist_penalty));
        }
        if self.tag_bonus > 0.0 {
            text.push_str(&format!(" + tag bonus {:.3}", self.tag_bonus));
        }
        text
    }
}

/// A candidate together with its score breakdown
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTrack {
    pub candidate: TrackCandidate,
    pub breakdown: ScoreBreakdown,
}

impl ScoredTrack {
    pub fn score(&self) -> f64 {
        self.breakdown.total
    }
}

/// Computes bounded composite similarity between a seed and candidates.
#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    config: ScoringConfig,
}

impl SimilarityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one candidate against the seed under the given feature weights.
    pub fn score(
        &self,
        seed: &TrackCandidate,
        candidate: &TrackCandidate,
        weights: &FeatureWeights,
    ) -> ScoreBreakdown {
        let category = &self.config.weights;
        let w = weights.as_array();

        let audio_neutral = !seed.features.has_audio_data() || !candidate.features.has_audio_data();
        let (cosine, euclidean, manhattan) = if audio_neutral {
            let n = self.config.neutral_audio;
            (n, n, n)
        } else {
            let a = seed.features.values();
            let b = candidate.features.values();
            (
                weighted_cosine(a, b, w),
                weighted_euclidean_similarity(a, b, w),
                weighted_manhattan_similarity(a, b, w),
            )
        };

        let tags = jaccard(&seed.tags, &candidate.tags);
        let community = candidate
            .community_score
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let temporal = temporal_similarity(
            seed.release_year,
            candidate.release_year,
            self.config.era_window_years,
        );
        let popularity = popularity_adjustment(
            candidate.popularity,
            self.config.popularity_peak,
            self.config.popularity_width,
        );

        let weighted = category.cosine * cosine
            + category.euclidean * euclidean
            + category.manhattan * manhattan
            + category.tags * tags
            + category.community * community
            + category.temporal * temporal
            + category.popularity * popularity;
        let total_weight = category.total();
        let base = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ScoreBreakdown {
            cosine,
            euclidean,
            manhattan,
            tags,
            community,
            temporal,
            popularity,
            audio_neutral,
            base,
            artist_penalty: 1.0,
            tag_bonus: 0.0,
            total: base,
        }
    }

    /// Score many candidates in parallel.
    ///
    /// Output order follows the input; call [`rank`] to sort.
    #[instrument(skip_all, fields(seed = %seed.id, candidates = candidates.len()))]
    pub fn score_all(
        &self,
        seed: &TrackCandidate,
        candidates: Vec<TrackCandidate>,
        weights: &FeatureWeights,
    ) -> Vec<ScoredTrack> {
        let scored: Vec<ScoredTrack> = candidates
            .into_par_iter()
            .map(|candidate| {
                let breakdown = self.score(seed, &candidate, weights);
                ScoredTrack { candidate, breakdown }
            })
            .collect();
        debug!("Scored {} candidates", scored.len());
        scored
    }
}

/// Sort scored tracks best first.
///
/// Ties on score fall back to community affinity, then popularity, then
/// track id so the order is total.
pub fn rank(tracks: &mut [ScoredTrack]) {
    tracks.sort_by(compare_ranked);
}

fn compare_ranked(a: &ScoredTrack, b: &ScoredTrack) -> Ordering {
    b.score()
        .partial_cmp(&a.score())
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let ca = a.candidate.community_score.unwrap_or(0.0);
            let cb = b.candidate.community_score.unwrap_or(0.0);
            cb.partial_cmp(&ca).unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.candidate.popularity.cmp(&a.candidate.popularity))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

// =============================================================================
// Similarity Metrics
// =============================================================================

/// Cosine similarity of importance-weighted vectors, clamped to [0,1].
///
/// Zero when either weighted vector has zero magnitude.
pub fn weighted_cosine(a: &Vector, b: &Vector, weights: &Vector) -> f64 {
    let (dot, norm_a, norm_b) = (0..FeatureDimension::COUNT).fold((0.0, 0.0, 0.0), |(dot, na, nb), i| {
        let wa = a[i] * weights[i];
        let wb = b[i] * weights[i];
        (dot + wa * wb, na + wa * wa, nb + wb * wb)
    });
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// 1 / (1 + weighted Euclidean distance)
pub fn weighted_euclidean_similarity(a: &Vector, b: &Vector, weights: &Vector) -> f64 {
    let squared: f64 = (0..FeatureDimension::COUNT)
        .map(|i| {
            let d = (a[i] - b[i]) * weights[i];
            d * d
        })
        .sum();
    1.0 / (1.0 + squared.sqrt())
}

/// 1 / (1 + weighted Manhattan distance)
pub fn weighted_manhattan_similarity(a: &Vector, b: &Vector, weights: &Vector) -> f64 {
    let distance: f64 = (0..FeatureDimension::COUNT)
        .map(|i| ((a[i] - b[i]) * weights[i]).abs())
        .sum();
    1.0 / (1.0 + distance)
}

/// Jaccard similarity of two normalized tag sets (0 when both are empty)
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// 1 - min(1, |gap| / window); neutral 0.5 when either year is unknown
pub fn temporal_similarity(a: Option<u16>, b: Option<u16>, era_window_years: f64) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if era_window_years > 0.0 => {
            let gap = (a as f64 - b as f64).abs();
            1.0 - (gap / era_window_years).min(1.0)
        }
        _ => 0.5,
    }
}

/// Gaussian bell over popularity, 1.0 at `peak`
pub fn popularity_adjustment(popularity: u8, peak: f64, width: f64) -> f64 {
    if width <= 0.0 {
        return 1.0;
    }
    let d = popularity.min(100) as f64 - peak;
    (-(d * d) / (2.0 * width * width)).exp()
}
