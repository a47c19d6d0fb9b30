//! Scoring pipeline for seed-track recommendations.
//!
//! This crate provides:
//! - FeatureFusionEngine for merging per-source audio features
//! - SimilarityScorer for composite seed/candidate similarity
//! - PreferenceLearner for online weight adaptation from swipes
//! - DiversityFilter for artist caps and interleaving
//! - Filter trait and FilterPipeline for stub-level exclusions
//!
//! ## Architecture
//! A batch passes through the pipeline in stages:
//! 1. Filters drop the seed, served tracks and banned artists from provider stubs
//! 2. Surviving stubs are enriched and fused into `TrackCandidate`s
//! 3. SimilarityScorer scores them under the learner's current weights
//! 4. The preference snapshot applies soft penalties and tag bonuses
//! 5. DiversityFilter caps artists and interleaves the ranked list
//!
//! ## Example Usage
//! ```ignore
//! use pipeline::{DiversityFilter, FilterPipeline, PreferenceLearner, SimilarityScorer, rank};
//!
//! let kept = FilterPipeline::standard().apply(stubs, &context)?;
//! // ... enrich and fuse `kept` into candidates ...
//! let snapshot = learner.snapshot();
//! let mut scored = scorer.score_all(&seed, candidates, &snapshot.weights);
//! snapshot.personalize_all(&mut scored);
//! rank(&mut scored);
//! let outcome = diversity.apply(scored, &seed.artist, &served_counts);
//! ```

pub mod config;
pub mod diversity;
pub mod filter_pipeline;
pub mod filters;
pub mod fusion;
pub mod learner;
pub mod scoring;
pub mod traits;

// Re-export main types
pub use config::{
    CategoryWeights, DiversityConfig, FusionConfig, InterleaveSlot, LearnerConfig, ScoringConfig,
};
pub use diversity::{ArtistCounts, DiversityFilter, DiversityOutcome};
pub use filter_pipeline::FilterPipeline;
pub use fusion::FeatureFusionEngine;
pub use learner::{PreferenceLearner, PreferenceSnapshot, SwipeOutcome};
pub use scoring::{ScoreBreakdown, ScoredTrack, SimilarityScorer, rank};
pub use traits::{Filter, FilterContext};
