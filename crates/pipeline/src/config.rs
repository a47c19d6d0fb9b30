//! Tunable parameters for the pipeline components.
//!
//! Every struct deserializes with `#[serde(default)]`, so a config file only
//! needs to name the values it overrides. `validate` rejects settings the
//! components cannot work with.

use anyhow::{Result, ensure};
use catalog::SourceReliability;
use serde::{Deserialize, Serialize};

// =============================================================================
// Fusion
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub reliability: SourceReliability,
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.reliability.unknown.is_finite() && self.reliability.unknown >= 0.0,
            "unknown-source reliability must be non-negative"
        );
        for (source, weight) in &self.reliability.sources {
            ensure!(
                weight.is_finite() && *weight >= 0.0,
                "reliability for {} must be non-negative",
                source
            );
        }
        Ok(())
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Category weights of the composite similarity score.
///
/// The audio cluster is split across cosine, Euclidean and Manhattan
/// similarity. The final score divides by the total, so weights need not
/// sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub cosine: f64,
    pub euclidean: f64,
    pub manhattan: f64,
    pub community: f64,
    pub tags: f64,
    pub temporal: f64,
    pub popularity: f64,
}

impl CategoryWeights {
    /// Weight of the whole audio cluster
    pub fn audio(&self) -> f64 {
        self.cosine + self.euclidean + self.manhattan
    }

    pub fn total(&self) -> f64 {
        self.audio() + self.community + self.tags + self.temporal + self.popularity
    }

    fn all(&self) -> [(&'static str, f64); 7] {
        [
            ("cosine", self.cosine),
            ("euclidean", self.euclidean),
            ("manhattan", self.manhattan),
            ("community", self.community),
            ("tags", self.tags),
            ("temporal", self.temporal),
            ("popularity", self.popularity),
        ]
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            cosine: 0.27,
            euclidean: 0.11,
            manhattan: 0.07,
            community: 0.30,
            tags: 0.20,
            temporal: 0.025,
            popularity: 0.025,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: CategoryWeights,
    /// Release-year gap at which temporal similarity reaches zero
    pub era_window_years: f64,
    /// Popularity at which the popularity bell peaks
    pub popularity_peak: f64,
    /// Standard deviation of the popularity bell
    pub popularity_width: f64,
    /// Value used for each audio component when features are missing entirely
    pub neutral_audio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: CategoryWeights::default(),
            era_window_years: 50.0,
            popularity_peak: 55.0,
            popularity_width: 25.0,
            neutral_audio: 0.5,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in self.weights.all() {
            ensure!(
                weight.is_finite() && weight >= 0.0,
                "category weight {} must be non-negative, got {}",
                name,
                weight
            );
        }
        ensure!(self.weights.total() > 0.0, "category weights must not all be zero");
        ensure!(self.era_window_years > 0.0, "era window must be positive");
        ensure!(self.popularity_width > 0.0, "popularity width must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.neutral_audio),
            "neutral audio value must be within [0,1]"
        );
        Ok(())
    }
}

// =============================================================================
// Preference Learning
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Swipes between weight recomputes (K)
    pub recompute_interval: u32,
    /// Cumulative swipes beyond which the session is considered stable
    pub stable_threshold: u64,
    /// Multiplicative step while warming
    pub warming_step: f64,
    /// Multiplicative step once stable
    pub stable_step: f64,
    /// Lower clamp as a fraction of the default weight
    pub weight_floor_ratio: f64,
    /// Upper clamp as a multiple of the default weight
    pub weight_ceiling_ratio: f64,
    /// Variance ratio band treated as "no signal"
    pub variance_tolerance: f64,
    /// Accepted swipes needed in a window before weights move
    pub min_accepted: usize,
    pub preferred_tag_limit: usize,
    /// Consecutive rejects that ban an artist for the session
    pub hard_exclude_after: u32,
    /// Ranking penalty per soft reject of an artist
    pub soft_penalty_step: f64,
    /// Lowest multiplier the soft penalty can reach
    pub soft_penalty_floor: f64,
    /// Bonus for a candidate whose tags are all preferred
    pub preferred_tag_bonus: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            recompute_interval: 10,
            stable_threshold: 30,
            warming_step: 0.2,
            stable_step: 0.05,
            weight_floor_ratio: 0.5,
            weight_ceiling_ratio: 2.0,
            variance_tolerance: 0.1,
            min_accepted: 2,
            preferred_tag_limit: 10,
            hard_exclude_after: 3,
            soft_penalty_step: 0.1,
            soft_penalty_floor: 0.5,
            preferred_tag_bonus: 0.05,
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.recompute_interval > 0, "recompute interval must be at least 1");
        ensure!(
            (0.0..1.0).contains(&self.warming_step) && (0.0..1.0).contains(&self.stable_step),
            "learning steps must be within [0,1)"
        );
        ensure!(
            self.weight_floor_ratio > 0.0 && self.weight_floor_ratio <= self.weight_ceiling_ratio,
            "weight floor ratio must be positive and not exceed the ceiling ratio"
        );
        ensure!(self.hard_exclude_after > 0, "hard exclusion threshold must be at least 1");
        ensure!(
            (0.0..=1.0).contains(&self.soft_penalty_floor),
            "soft penalty floor must be within [0,1]"
        );
        ensure!(
            self.soft_penalty_step >= 0.0 && self.preferred_tag_bonus >= 0.0,
            "penalty step and tag bonus must be non-negative"
        );
        Ok(())
    }
}

// =============================================================================
// Diversity
// =============================================================================

/// One position in the familiarity/discovery interleave pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterleaveSlot {
    /// A track by the seed's artist
    Seed,
    /// A track by any other artist
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    /// Session-wide cap for the seed's artist
    pub seed_artist_cap: usize,
    /// Session-wide cap for every other artist
    pub other_artist_cap: usize,
    pub interleave_pattern: Vec<InterleaveSlot>,
    /// Most seed-artist tracks allowed in a row
    pub max_seed_run: usize,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            seed_artist_cap: 8,
            other_artist_cap: 3,
            interleave_pattern: vec![InterleaveSlot::Seed, InterleaveSlot::Seed, InterleaveSlot::Other],
            max_seed_run: 2,
        }
    }
}

impl DiversityConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.seed_artist_cap > 0 && self.other_artist_cap > 0,
            "artist caps must be at least 1"
        );
        ensure!(!self.interleave_pattern.is_empty(), "interleave pattern must not be empty");
        ensure!(self.max_seed_run > 0, "max_seed_run must be at least 1");
        Ok(())
    }
}
