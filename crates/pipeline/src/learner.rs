//! Online preference learning from binary swipe feedback.
//!
//! ## Algorithm
//! `consume` is cheap: it appends the event to the current window, bumps
//! counters and applies reject bookkeeping (soft artist penalty, rejected
//! track exclusion, artist ban after a streak of rejects).
//!
//! Every K swipes `recompute_if_due` does the heavier work:
//! 1. Mean fused vector of the accepted swipes in the window (the centroid)
//! 2. Per dimension, compare accepted variance against rejected variance
//!    (or the variance of a uniform distribution when there are fewer than
//!    two rejects). A dimension the user is consistent about gets a larger
//!    weight; one they are scattered on gets a smaller one. Weights stay
//!    within [floor, ceiling] x default.
//! 3. Preferred tags: the most frequent tags on accepted tracks
//! 4. Phase: cold_start -> warming on the first recompute, stable once the
//!    cumulative swipe count passes the stable threshold (smaller step)
//!
//! Readers never see a half-updated profile: each recompute publishes a
//! new immutable [`PreferenceSnapshot`] through an `ArcSwap`.

use arc_swap::ArcSwap;
use catalog::{
    FeatureDimension, FeatureWeights, SessionPhase, SwipeDirection, SwipeEvent, TrackId,
    UserPreferenceState, normalize_artist, normalize_tag,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument};

use crate::config::LearnerConfig;
use crate::scoring::ScoredTrack;

/// Variance of a uniform distribution over [0,1]
const UNIFORM_VARIANCE: f64 = 1.0 / 12.0;

/// Keeps the variance ratio finite when a dimension is perfectly consistent
const VARIANCE_EPSILON: f64 = 1e-4;

/// Immutable view of the preference state used for ranking and exclusion.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceSnapshot {
    /// Increments on every publish
    pub version: u64,
    pub phase: SessionPhase,
    pub weights: FeatureWeights,
    pub preferred_tags: BTreeSet<String>,
    /// Soft reject count per normalized artist
    pub soft_rejects: HashMap<String, u32>,
    pub hard_excluded_artists: HashSet<String>,
    pub hard_excluded_tracks: HashSet<TrackId>,
    /// Tracks accepted in earlier sessions, and this one as of the last publish
    pub liked_tracks: HashSet<TrackId>,
    pub liked_song_keys: HashSet<String>,
    soft_penalty_step: f64,
    soft_penalty_floor: f64,
    preferred_tag_bonus: f64,
}

impl PreferenceSnapshot {
    fn capture(state: &UserPreferenceState, config: &LearnerConfig, version: u64) -> Self {
        Self {
            version,
            phase: state.phase,
            weights: state.weights.clone(),
            preferred_tags: state.preferred_tags.iter().cloned().collect(),
            soft_rejects: state.soft_rejects.clone(),
            hard_excluded_artists: state.hard_excluded_artists.clone(),
            hard_excluded_tracks: state.hard_excluded_tracks.clone(),
            liked_tracks: state.liked_tracks.clone(),
            liked_song_keys: state.liked_song_keys.clone(),
            soft_penalty_step: config.soft_penalty_step,
            soft_penalty_floor: config.soft_penalty_floor,
            preferred_tag_bonus: config.preferred_tag_bonus,
        }
    }

    /// Snapshot of a fresh state under default configuration
    pub fn initial() -> Self {
        Self::capture(&UserPreferenceState::new(""), &LearnerConfig::default(), 0)
    }

    /// Ranking multiplier for an artist: 1.0 without rejects, never below the floor
    pub fn artist_penalty(&self, artist_key: &str) -> f64 {
        let rejects = self.soft_rejects.get(artist_key).copied().unwrap_or(0);
        (1.0 - self.soft_penalty_step * rejects as f64).max(self.soft_penalty_floor)
    }

    /// Bonus proportional to the share of `tags` the user prefers
    pub fn tag_bonus(&self, tags: &BTreeSet<String>) -> f64 {
        if self.preferred_tags.is_empty() || tags.is_empty() {
            return 0.0;
        }
        let matching = tags.iter().filter(|t| self.preferred_tags.contains(*t)).count();
        self.preferred_tag_bonus * matching as f64 / tags.len() as f64
    }

    pub fn is_excluded(&self, track_id: &str, artist_key: &str) -> bool {
        self.hard_excluded_tracks.contains(track_id) || self.hard_excluded_artists.contains(artist_key)
    }

    /// Apply soft penalties and tag bonus to a scored track
    pub fn personalize(&self, track: &mut ScoredTrack) {
        let penalty = self.artist_penalty(&track.candidate.artist_key());
        let bonus = self.tag_bonus(&track.candidate.tags);
        let breakdown = &mut track.breakdown;
        breakdown.artist_penalty = penalty;
        breakdown.tag_bonus = bonus;
        breakdown.total = (breakdown.base * penalty + bonus).clamp(0.0, 1.0);
    }

    pub fn personalize_all(&self, tracks: &mut [ScoredTrack]) {
        for track in tracks {
            self.personalize(track);
        }
    }
}

/// What a single `consume` call changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwipeOutcome {
    /// Artist banned for the session by this swipe
    pub newly_excluded_artist: Option<String>,
    /// A recompute is due
    pub recompute_due: bool,
}

/// Per-session preference learner.
///
/// The mutable state sits behind a mutex that is only held for the
/// duration of a consume or recompute; readers go through the snapshot.
pub struct PreferenceLearner {
    config: LearnerConfig,
    state: Mutex<UserPreferenceState>,
    snapshot: ArcSwap<PreferenceSnapshot>,
}

impl PreferenceLearner {
    pub fn new(config: LearnerConfig, state: UserPreferenceState) -> Self {
        let snapshot = PreferenceSnapshot::capture(&state, &config, 0);
        Self {
            config,
            state: Mutex::new(state),
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Current published snapshot
    pub fn snapshot(&self) -> Arc<PreferenceSnapshot> {
        self.snapshot.load_full()
    }

    /// Copy of the full mutable state, for persistence
    pub fn state(&self) -> UserPreferenceState {
        self.lock().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Record one swipe. Never recomputes weights.
    #[instrument(skip(self, event), fields(track = %event.track_id, direction = ?event.direction))]
    pub fn consume(&self, event: SwipeEvent) -> SwipeOutcome {
        let mut state = self.lock();
        let artist = normalize_artist(&event.artist);
        let mut outcome = SwipeOutcome::default();

        state.counters.total += 1;
        state.counters.since_recompute += 1;

        match event.direction {
            SwipeDirection::Accept => {
                state.counters.accepted += 1;
                state.consecutive_rejects.remove(&artist);
                state.liked_tracks.insert(event.track_id.clone());
                if let Some(key) = event.song_key() {
                    state.liked_song_keys.insert(key);
                }
                for tag in event.tags.iter().filter_map(|t| normalize_tag(t)) {
                    *state.tag_counts.entry(tag).or_insert(0) += 1;
                }
            }
            SwipeDirection::Reject => {
                state.counters.rejected += 1;
                *state.soft_rejects.entry(artist.clone()).or_insert(0) += 1;
                state.hard_excluded_tracks.insert(event.track_id.clone());

                let streak = {
                    let entry = state.consecutive_rejects.entry(artist.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if streak >= self.config.hard_exclude_after
                    && state.hard_excluded_artists.insert(artist.clone())
                {
                    info!("Artist '{}' excluded after {} consecutive rejects", artist, streak);
                    outcome.newly_excluded_artist = Some(artist);
                }
            }
        }

        let is_reject = !event.is_accept();
        state.window.push(event);
        outcome.recompute_due = state.counters.since_recompute >= self.config.recompute_interval;

        // Exclusions and penalties must be visible to the next ranking pass
        if is_reject {
            self.publish(&state);
        }

        outcome
    }

    /// Recompute weights and tags if K swipes have accumulated.
    ///
    /// Returns the newly published snapshot, or `None` when nothing was due.
    #[instrument(skip(self))]
    pub fn recompute_if_due(&self) -> Option<Arc<PreferenceSnapshot>> {
        let mut state = self.lock();
        if state.counters.since_recompute < self.config.recompute_interval {
            return None;
        }

        let window = std::mem::take(&mut state.window);
        let step = match state.phase {
            SessionPhase::Stable => self.config.stable_step,
            SessionPhase::ColdStart | SessionPhase::Warming => self.config.warming_step,
        };

        let accepted: Vec<&SwipeEvent> = window.iter().filter(|e| e.is_accept()).collect();
        let rejected: Vec<&SwipeEvent> = window.iter().filter(|e| !e.is_accept()).collect();

        // Step 1: centroid of accepted swipes
        if !accepted.is_empty() {
            let mut centroid = [0.0; FeatureDimension::COUNT];
            for event in &accepted {
                for dim in FeatureDimension::ALL {
                    centroid[dim.index()] += event.features.get(dim);
                }
            }
            for value in &mut centroid {
                *value /= accepted.len() as f64;
            }
            state.preference_centroid = Some(centroid);
        }

        // Step 2: variance-driven weight adjustment
        if accepted.len() >= self.config.min_accepted {
            let weights = adjust_weights(&state.weights, &accepted, &rejected, step, &self.config);
            state.weights = weights;
        } else {
            debug!(
                "Only {} accepted swipes in window; weights unchanged",
                accepted.len()
            );
        }

        // Step 3: preferred tags
        state.preferred_tags = top_tags(&state.tag_counts, self.config.preferred_tag_limit);

        // Step 4: phase transition
        state.phase = if state.counters.total > self.config.stable_threshold {
            SessionPhase::Stable
        } else {
            SessionPhase::Warming
        };
        state.counters.since_recompute = 0;
        state.counters.recomputes += 1;

        info!(
            "Recomputed preferences: phase={}, window={} ({} accepted), total swipes={}",
            state.phase,
            window.len(),
            accepted.len(),
            state.counters.total
        );

        Some(self.publish(&state))
    }

    fn publish(&self, state: &UserPreferenceState) -> Arc<PreferenceSnapshot> {
        let version = self.snapshot.load().version + 1;
        let snapshot = Arc::new(PreferenceSnapshot::capture(state, &self.config, version));
        self.snapshot.store(Arc::clone(&snapshot));
        snapshot
    }

    fn lock(&self) -> MutexGuard<'_, UserPreferenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scale each weight up or down by `step` depending on how consistent the
/// accepted swipes are compared with the rejected ones.
fn adjust_weights(
    current: &FeatureWeights,
    accepted: &[&SwipeEvent],
    rejected: &[&SwipeEvent],
    step: f64,
    config: &LearnerConfig,
) -> FeatureWeights {
    let mut weights = current.clone();

    for dim in FeatureDimension::ALL {
        // Only observed values carry signal; neutral fill-ins would look consistent
        let accepted_values = observed(accepted, dim);
        let Some(accepted_var) = variance(&accepted_values) else {
            continue;
        };
        if accepted_values.len() < config.min_accepted {
            continue;
        }
        let rejected_values = observed(rejected, dim);
        let reference_var = if rejected_values.len() >= 2 {
            variance(&rejected_values).unwrap_or(UNIFORM_VARIANCE)
        } else {
            UNIFORM_VARIANCE
        };

        let ratio = (reference_var + VARIANCE_EPSILON) / (accepted_var + VARIANCE_EPSILON);
        let factor = if ratio > 1.0 + config.variance_tolerance {
            1.0 + step
        } else if ratio < 1.0 - config.variance_tolerance {
            1.0 - step
        } else {
            1.0
        };

        let default = dim.default_importance();
        let adjusted = (current.get(dim) * factor).clamp(
            default * config.weight_floor_ratio,
            default * config.weight_ceiling_ratio,
        );
        debug!(
            "{}: accepted var {:.4}, reference var {:.4}, weight {:.3} -> {:.3}",
            dim,
            accepted_var,
            reference_var,
            current.get(dim),
            adjusted
        );
        weights.set(dim, adjusted);
    }

    weights
}

fn observed(events: &[&SwipeEvent], dim: FeatureDimension) -> Vec<f64> {
    events
        .iter()
        .filter(|e| e.features.dimension(dim).is_present())
        .map(|e| e.features.get(dim))
        .collect()
}

/// Population variance; `None` for an empty slice
fn variance(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n)
}

/// Most frequent tags, ties broken alphabetically
fn top_tags(counts: &BTreeMap<String, u32>, limit: usize) -> Vec<String> {
    let mut tags: Vec<(&String, &u32)> = counts.iter().collect();
    tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    tags.into_iter().take(limit).map(|(tag, _)| tag.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::FusedFeatureVector;

    fn event(track: &str, artist: &str, direction: SwipeDirection, energy: f64, tags: &[&str]) -> SwipeEvent {
        let mut values = [0.5; FeatureDimension::COUNT];
        values[FeatureDimension::Energy.index()] = energy;
        SwipeEvent {
            track_id: track.to_string(),
            title: format!("Song {}", track),
            artist: artist.to_string(),
            direction,
            features: FusedFeatureVector::from_normalized(values),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            timestamp_ms: 0,
        }
    }

    fn learner() -> PreferenceLearner {
        PreferenceLearner::new(LearnerConfig::default(), UserPreferenceState::new("u1"))
    }

    #[test]
    fn test_consume_does_not_recompute() {
        let learner = learner();
        let before = learner.snapshot();

        let outcome = learner.consume(event("t1", "A", SwipeDirection::Accept, 0.9, &[]));

        assert!(!outcome.recompute_due);
        assert_eq!(learner.snapshot().weights, before.weights);
        assert_eq!(learner.state().counters.total, 1);
        assert_eq!(learner.phase(), SessionPhase::ColdStart);
    }

    #[test]
    fn test_recompute_not_due_before_interval() {
        let learner = learner();
        for i in 0..9 {
            learner.consume(event(&format!("t{}", i), "A", SwipeDirection::Accept, 0.9, &[]));
        }
        assert!(learner.recompute_if_due().is_none());
    }

    #[test]
    fn test_reject_bookkeeping_and_artist_ban() {
        let learner = learner();
        learner.consume(event("t1", "Band", SwipeDirection::Reject, 0.5, &[]));
        learner.consume(event("t2", "Band", SwipeDirection::Reject, 0.5, &[]));
        let outcome = learner.consume(event("t3", "BAND ", SwipeDirection::Reject, 0.5, &[]));

        assert_eq!(outcome.newly_excluded_artist.as_deref(), Some("band"));
        let snapshot = learner.snapshot();
        assert!(snapshot.hard_excluded_artists.contains("band"));
        assert!(snapshot.hard_excluded_tracks.contains("t1"));
        assert_eq!(snapshot.soft_rejects.get("band"), Some(&3));
        assert!(snapshot.is_excluded("other", "band"));
    }

    #[test]
    fn test_accepted_tracks_are_remembered() {
        let learner = learner();
        learner.consume(event("t1", "Band", SwipeDirection::Accept, 0.5, &[]));
        learner.consume(event("t2", "Band", SwipeDirection::Reject, 0.5, &[]));

        let state = learner.state();
        assert!(state.liked_tracks.contains("t1"));
        assert!(!state.liked_tracks.contains("t2"));
        assert!(state.liked_song_keys.contains(&catalog::song_key("Song t1", "band")));

        let restored = PreferenceLearner::new(LearnerConfig::default(), state).snapshot();
        assert!(restored.liked_tracks.contains("t1"));
        assert_eq!(restored.liked_song_keys.len(), 1);
    }

    #[test]
    fn test_accept_resets_reject_streak() {
        let learner = learner();
        learner.consume(event("t1", "Band", SwipeDirection::Reject, 0.5, &[]));
        learner.consume(event("t2", "Band", SwipeDirection::Reject, 0.5, &[]));
        learner.consume(event("t3", "Band", SwipeDirection::Accept, 0.5, &[]));
        let outcome = learner.consume(event("t4", "Band", SwipeDirection::Reject, 0.5, &[]));

        assert!(outcome.newly_excluded_artist.is_none());
        assert!(!learner.snapshot().hard_excluded_artists.contains("band"));
    }

    #[test]
    fn test_soft_penalty_has_floor() {
        let learner = learner();
        for i in 0..8 {
            // Interleave accepts so the artist is never hard-banned
            learner.consume(event(&format!("r{}", i), "Band", SwipeDirection::Reject, 0.5, &[]));
            learner.consume(event(&format!("a{}", i), "Band", SwipeDirection::Accept, 0.5, &[]));
        }
        let snapshot = learner.snapshot();
        assert_eq!(snapshot.artist_penalty("band"), 0.5);
        assert_eq!(snapshot.artist_penalty("someone else"), 1.0);
    }

    #[test]
    fn test_consistent_dimension_gains_weight() {
        let learner = learner();
        let accepted_energy = [0.88, 0.9, 0.92, 0.89, 0.91, 0.9, 0.87, 0.93];
        for (i, energy) in accepted_energy.iter().enumerate() {
            learner.consume(event(&format!("a{}", i), &format!("A{}", i), SwipeDirection::Accept, *energy, &[]));
        }
        learner.consume(event("r1", "R1", SwipeDirection::Reject, 0.1, &[]));
        learner.consume(event("r2", "R2", SwipeDirection::Reject, 0.95, &[]));

        let snapshot = learner.recompute_if_due().expect("recompute should be due");

        let energy = snapshot.weights.get(FeatureDimension::Energy);
        assert!((energy - 1.5 * 1.2).abs() < 1e-9, "energy weight {}", energy);
        // Dimensions with no spread on either side keep their weight
        assert_eq!(snapshot.weights.get(FeatureDimension::Key), 0.6);
        assert_eq!(snapshot.phase, SessionPhase::Warming);
    }

    #[test]
    fn test_scattered_dimension_loses_weight() {
        let learner = learner();
        let accepted_energy = [0.0, 1.0, 0.05, 0.95, 0.1, 0.9, 0.0, 1.0, 0.5, 0.5];
        for (i, energy) in accepted_energy.iter().enumerate() {
            learner.consume(event(&format!("a{}", i), &format!("A{}", i), SwipeDirection::Accept, *energy, &[]));
        }

        let snapshot = learner.recompute_if_due().expect("recompute should be due");
        let energy = snapshot.weights.get(FeatureDimension::Energy);
        assert!((energy - 1.5 * 0.8).abs() < 1e-9, "energy weight {}", energy);
    }

    #[test]
    fn test_weights_stay_within_clamp() {
        let learner = learner();
        for round in 0..12 {
            for i in 0..10 {
                learner.consume(event(&format!("t{}-{}", round, i), &format!("A{}", i), SwipeDirection::Accept, 0.9, &[]));
            }
            learner.recompute_if_due();
        }
        let weight = learner.snapshot().weights.get(FeatureDimension::Energy);
        assert!(weight <= 1.5 * 2.0 + 1e-9);
        assert!(weight >= 1.5 * 0.5 - 1e-9);
        assert!((weight - 3.0).abs() < 1e-9, "consistent signal saturates at the ceiling");
    }

    #[test]
    fn test_phase_progression_and_stable_step() {
        let learner = learner();
        let mut phases = Vec::new();
        for round in 0..4 {
            for i in 0..10 {
                learner.consume(event(&format!("t{}-{}", round, i), &format!("A{}", i), SwipeDirection::Accept, 0.9, &[]));
            }
            let snapshot = learner.recompute_if_due().unwrap();
            phases.push(snapshot.phase);
        }
        assert_eq!(
            phases,
            vec![SessionPhase::Warming, SessionPhase::Warming, SessionPhase::Warming, SessionPhase::Stable]
        );
    }

    #[test]
    fn test_preferred_tags_ranked_by_frequency() {
        let config = LearnerConfig {
            preferred_tag_limit: 2,
            ..LearnerConfig::default()
        };
        let learner = PreferenceLearner::new(config, UserPreferenceState::new("u1"));
        for i in 0..10 {
            let tags: &[&str] = match i % 3 {
                0 => &["Rock", "indie"],
                1 => &["rock"],
                _ => &["jazz"],
            };
            learner.consume(event(&format!("t{}", i), "A", SwipeDirection::Accept, 0.5, tags));
        }
        learner.recompute_if_due().unwrap();

        let state = learner.state();
        assert_eq!(state.preferred_tags, vec!["rock".to_string(), "indie".to_string()]);
    }

    #[test]
    fn test_personalize_applies_penalty_and_bonus() {
        use crate::scoring::SimilarityScorer;
        use catalog::{TrackCandidate, TrackStub};

        let mut state = UserPreferenceState::new("u1");
        state.soft_rejects.insert("band".to_string(), 2);
        state.preferred_tags = vec!["rock".to_string()];
        let learner = PreferenceLearner::new(LearnerConfig::default(), state);
        let snapshot = learner.snapshot();

        let seed = TrackCandidate::from_stub(
            TrackStub::new("s", "Seed", "Seed Artist"),
            FusedFeatureVector::from_normalized([0.5; FeatureDimension::COUNT]),
            ["rock"],
        );
        let candidate = TrackCandidate::from_stub(
            TrackStub::new("c", "Song", "Band"),
            FusedFeatureVector::from_normalized([0.5; FeatureDimension::COUNT]),
            ["rock", "pop"],
        );
        let scorer = SimilarityScorer::default();
        let breakdown = scorer.score(&seed, &candidate, &snapshot.weights);
        let mut track = ScoredTrack { candidate, breakdown };

        snapshot.personalize(&mut track);

        assert!((track.breakdown.artist_penalty - 0.8).abs() < 1e-12);
        assert!((track.breakdown.tag_bonus - 0.025).abs() < 1e-12);
        let expected = (track.breakdown.base * 0.8 + 0.025).clamp(0.0, 1.0);
        assert!((track.score() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_versions_increase() {
        let learner = learner();
        let v0 = learner.snapshot().version;
        learner.consume(event("t1", "A", SwipeDirection::Reject, 0.5, &[]));
        let v1 = learner.snapshot().version;
        assert!(v1 > v0);
    }
}
