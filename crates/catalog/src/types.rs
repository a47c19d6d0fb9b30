//! Core domain types for the recommendation engine.
//!
//! This module defines the data structures shared by every other crate:
//! - Type aliases for identifiers (TrackId, UserId, SourceId)
//! - `FeatureDimension`, the fixed schema of audio features with their domains
//! - Raw per-source samples and the fused, normalized feature vector
//! - Track stubs, enriched candidates, swipes and per-user preference state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::Index;

// =============================================================================
// Type Aliases
// =============================================================================

/// Unique identifier for a track (provider-specific opaque string)
pub type TrackId = String;

/// Unique identifier for a user
pub type UserId = String;

/// Identifier of a feature or tag source (e.g. "spotify", "librosa")
pub type SourceId = String;

/// Normalize an artist name for identity comparisons.
pub fn normalize_artist(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Normalize a tag for case-insensitive set comparisons.
///
/// Returns `None` for tags that are empty after trimming.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() { None } else { Some(tag) }
}

/// Normalize a whole tag collection into a sorted set.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|t| normalize_tag(t.as_ref()))
        .collect()
}

/// Key used to recognise the same song across releases ("title|artist").
pub fn song_key(title: &str, artist: &str) -> String {
    format!("{}|{}", title.trim().to_lowercase(), normalize_artist(artist))
}

// =============================================================================
// Feature Dimensions
// =============================================================================

/// The fixed set of audio feature dimensions every fused vector carries.
///
/// The discriminant doubles as the index into fixed-size feature arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDimension {
    Energy,
    Valence,
    Danceability,
    Tempo,
    Acousticness,
    Instrumentalness,
    Speechiness,
    Liveness,
    Loudness,
    Key,
    Duration,
}

impl FeatureDimension {
    /// Number of dimensions in the schema
    pub const COUNT: usize = 11;

    /// All dimensions in index order
    pub const ALL: [FeatureDimension; Self::COUNT] = [
        FeatureDimension::Energy,
        FeatureDimension::Valence,
        FeatureDimension::Danceability,
        FeatureDimension::Tempo,
        FeatureDimension::Acousticness,
        FeatureDimension::Instrumentalness,
        FeatureDimension::Speechiness,
        FeatureDimension::Liveness,
        FeatureDimension::Loudness,
        FeatureDimension::Key,
        FeatureDimension::Duration,
    ];

    /// Position of this dimension in fixed-size feature arrays
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureDimension::Energy => "energy",
            FeatureDimension::Valence => "valence",
            FeatureDimension::Danceability => "danceability",
            FeatureDimension::Tempo => "tempo",
            FeatureDimension::Acousticness => "acousticness",
            FeatureDimension::Instrumentalness => "instrumentalness",
            FeatureDimension::Speechiness => "speechiness",
            FeatureDimension::Liveness => "liveness",
            FeatureDimension::Loudness => "loudness",
            FeatureDimension::Key => "key",
            FeatureDimension::Duration => "duration",
        }
    }

    /// Parse a dimension name as used by feature providers.
    ///
    /// Accepts the canonical names plus `duration_ms`, which several
    /// providers use for the duration field.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        if name == "duration_ms" {
            return Some(FeatureDimension::Duration);
        }
        Self::ALL.iter().copied().find(|d| d.name() == name)
    }

    /// Raw domain bounds `(low, high)` used for normalization into [0,1].
    ///
    /// Ratio-valued features already live in [0,1]; tempo is BPM, loudness
    /// is dB, key is a pitch class and duration is milliseconds.
    pub fn domain(self) -> (f64, f64) {
        match self {
            FeatureDimension::Tempo => (40.0, 200.0),
            FeatureDimension::Loudness => (-60.0, 0.0),
            FeatureDimension::Key => (0.0, 11.0),
            FeatureDimension::Duration => (30_000.0, 600_000.0),
            _ => (0.0, 1.0),
        }
    }

    /// Raw value substituted when no source reports this dimension
    pub fn neutral_raw(self) -> f64 {
        match self {
            FeatureDimension::Liveness => 0.1,
            FeatureDimension::Speechiness => 0.1,
            FeatureDimension::Loudness => -10.0,
            FeatureDimension::Tempo => 120.0,
            FeatureDimension::Duration => 200_000.0,
            FeatureDimension::Key => 0.0,
            _ => 0.5,
        }
    }

    /// Normalized neutral value (always within [0,1])
    pub fn neutral(self) -> f64 {
        self.normalize(self.neutral_raw()).unwrap_or(0.5)
    }

    /// Default importance weight of this dimension in similarity scoring
    pub fn default_importance(self) -> f64 {
        match self {
            FeatureDimension::Energy => 1.5,
            FeatureDimension::Valence => 1.5,
            FeatureDimension::Danceability => 1.3,
            FeatureDimension::Tempo => 1.2,
            FeatureDimension::Acousticness => 1.0,
            FeatureDimension::Instrumentalness => 0.9,
            FeatureDimension::Speechiness => 0.8,
            FeatureDimension::Liveness => 0.7,
            FeatureDimension::Loudness => 1.0,
            FeatureDimension::Key => 0.6,
            FeatureDimension::Duration => 0.5,
        }
    }

    /// Map a raw value into [0,1] using this dimension's domain.
    ///
    /// Out-of-range values are clamped. Non-finite values return `None`
    /// so callers can treat them as unreported.
    pub fn normalize(self, raw: f64) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }
        let (low, high) = self.domain();
        Some(((raw - low) / (high - low)).clamp(0.0, 1.0))
    }

    /// Map a normalized value back into the raw domain (for display)
    pub fn denormalize(self, value: f64) -> f64 {
        let (low, high) = self.domain();
        low + value.clamp(0.0, 1.0) * (high - low)
    }
}

impl fmt::Display for FeatureDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Source Reliability
// =============================================================================

/// Static per-source reliability coefficients used as fusion weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceReliability {
    /// Coefficient per known source id (lowercase)
    pub sources: BTreeMap<SourceId, f64>,
    /// Coefficient for sources missing from the table
    pub unknown: f64,
}

impl SourceReliability {
    /// Reliability weight for a source, clamped to [0,1]
    pub fn weight_for(&self, source: &str) -> f64 {
        let weight = self
            .sources
            .get(&source.trim().to_lowercase())
            .copied()
            .unwrap_or(self.unknown);
        if weight.is_finite() { weight.clamp(0.0, 1.0) } else { self.unknown.clamp(0.0, 1.0) }
    }
}

impl Default for SourceReliability {
    fn default() -> Self {
        let sources = [
            ("spotify", 1.0),
            ("librosa", 0.9),
            ("essentia", 0.85),
            ("acousticbrainz", 0.8),
            ("deezer", 0.6),
        ]
        .into_iter()
        .map(|(name, weight)| (name.to_string(), weight))
        .collect();
        Self { sources, unknown: 0.5 }
    }
}

// =============================================================================
// Feature Samples and Vectors
// =============================================================================

/// One source's partial report of raw feature values for a track.
///
/// Produced per fetch and consumed by fusion; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatureSample {
    pub source: SourceId,
    /// Raw (un-normalized) values for the dimensions this source reported
    pub values: BTreeMap<FeatureDimension, f64>,
    /// Reliability weight of the source, expected in [0,1]
    pub reliability: f64,
}

impl RawFeatureSample {
    pub fn new(source: impl Into<SourceId>, reliability: f64) -> Self {
        Self {
            source: source.into(),
            values: BTreeMap::new(),
            reliability,
        }
    }

    /// Add a raw value for one dimension (builder pattern)
    pub fn with_value(mut self, dimension: FeatureDimension, raw: f64) -> Self {
        self.values.insert(dimension, raw);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Presence-aware view of one fused dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DimensionValue {
    /// At least one source reported the dimension
    Present {
        value: f64,
        provenance: u32,
        confidence: f64,
    },
    /// No source reported it; `neutral` was substituted
    Absent { neutral: f64 },
}

impl DimensionValue {
    pub fn value(&self) -> f64 {
        match *self {
            DimensionValue::Present { value, .. } => value,
            DimensionValue::Absent { neutral } => neutral,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, DimensionValue::Present { .. })
    }
}

/// Canonical normalized feature vector for one track.
///
/// Values are always within [0,1]. Each dimension also records how many
/// sources contributed (provenance) and their summed reliability
/// (confidence). Fields are private: a vector is immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedFeatureVector {
    values: [f64; FeatureDimension::COUNT],
    provenance: [u32; FeatureDimension::COUNT],
    confidence: [f64; FeatureDimension::COUNT],
}

impl FusedFeatureVector {
    /// All-neutral vector with zero provenance
    pub fn neutral() -> Self {
        let mut values = [0.0; FeatureDimension::COUNT];
        for dim in FeatureDimension::ALL {
            values[dim.index()] = dim.neutral();
        }
        Self {
            values,
            provenance: [0; FeatureDimension::COUNT],
            confidence: [0.0; FeatureDimension::COUNT],
        }
    }

    /// Build a vector from already-normalized parts.
    ///
    /// Values are clamped into [0,1]; non-finite values and dimensions with
    /// zero provenance fall back to the neutral default.
    pub fn from_parts(
        values: [f64; FeatureDimension::COUNT],
        provenance: [u32; FeatureDimension::COUNT],
        confidence: [f64; FeatureDimension::COUNT],
    ) -> Self {
        let mut clean = [0.0; FeatureDimension::COUNT];
        let mut conf = [0.0; FeatureDimension::COUNT];
        for dim in FeatureDimension::ALL {
            let i = dim.index();
            let value = values[i];
            clean[i] = if provenance[i] == 0 || !value.is_finite() {
                dim.neutral()
            } else {
                value.clamp(0.0, 1.0)
            };
            conf[i] = if confidence[i].is_finite() { confidence[i].max(0.0) } else { 0.0 };
        }
        Self {
            values: clean,
            provenance,
            confidence: conf,
        }
    }

    /// Fully-observed vector from normalized values (one source, full confidence)
    pub fn from_normalized(values: [f64; FeatureDimension::COUNT]) -> Self {
        Self::from_parts(
            values,
            [1; FeatureDimension::COUNT],
            [1.0; FeatureDimension::COUNT],
        )
    }

    pub fn get(&self, dimension: FeatureDimension) -> f64 {
        self.values[dimension.index()]
    }

    pub fn provenance(&self, dimension: FeatureDimension) -> u32 {
        self.provenance[dimension.index()]
    }

    pub fn confidence(&self, dimension: FeatureDimension) -> f64 {
        self.confidence[dimension.index()]
    }

    /// Presence-aware access to one dimension
    pub fn dimension(&self, dimension: FeatureDimension) -> DimensionValue {
        let i = dimension.index();
        if self.provenance[i] == 0 {
            DimensionValue::Absent {
                neutral: self.values[i],
            }
        } else {
            DimensionValue::Present {
                value: self.values[i],
                provenance: self.provenance[i],
                confidence: self.confidence[i],
            }
        }
    }

    /// Sum of provenance counts over all dimensions
    pub fn total_provenance(&self) -> u32 {
        self.provenance.iter().sum()
    }

    /// True when at least one source contributed any dimension
    pub fn has_audio_data(&self) -> bool {
        self.total_provenance() > 0
    }

    pub fn values(&self) -> &[f64; FeatureDimension::COUNT] {
        &self.values
    }
}

impl Default for FusedFeatureVector {
    fn default() -> Self {
        Self::neutral()
    }
}

// =============================================================================
// Feature Weights
// =============================================================================

/// Per-dimension feature-importance weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights([f64; FeatureDimension::COUNT]);

impl FeatureWeights {
    /// Default importance weights
    pub fn defaults() -> Self {
        let mut weights = [0.0; FeatureDimension::COUNT];
        for dim in FeatureDimension::ALL {
            weights[dim.index()] = dim.default_importance();
        }
        Self(weights)
    }

    pub fn get(&self, dimension: FeatureDimension) -> f64 {
        self.0[dimension.index()]
    }

    /// Set a weight; negative or non-finite input is stored as zero
    pub fn set(&mut self, dimension: FeatureDimension, weight: f64) {
        self.0[dimension.index()] = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
    }

    pub fn as_array(&self) -> &[f64; FeatureDimension::COUNT] {
        &self.0
    }
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Index<FeatureDimension> for FeatureWeights {
    type Output = f64;

    fn index(&self, dimension: FeatureDimension) -> &f64 {
        &self.0[dimension.index()]
    }
}

// =============================================================================
// Tracks
// =============================================================================

/// Lightweight track record returned by a candidate provider, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStub {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub release_year: Option<u16>,
    /// Popularity in [0,100]
    pub popularity: u8,
    /// Community affinity with the seed in [0,1], when the provider knows it
    pub community_score: Option<f64>,
}

impl TrackStub {
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            release_year: None,
            popularity: 50,
            community_score: None,
        }
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.release_year = Some(year);
        self
    }

    pub fn with_popularity(mut self, popularity: u8) -> Self {
        self.popularity = popularity.min(100);
        self
    }

    pub fn with_community_score(mut self, score: f64) -> Self {
        self.community_score = Some(if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 });
        self
    }

    pub fn artist_key(&self) -> String {
        normalize_artist(&self.artist)
    }

    pub fn song_key(&self) -> String {
        song_key(&self.title, &self.artist)
    }
}

/// A fully enriched track ready for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub release_year: Option<u16>,
    pub features: FusedFeatureVector,
    /// Lowercased tag set
    pub tags: BTreeSet<String>,
    pub community_score: Option<f64>,
    /// Popularity in [0,100]
    pub popularity: u8,
}

impl TrackCandidate {
    /// Combine a provider stub with its fused features and tags
    pub fn from_stub<I, S>(stub: TrackStub, features: FusedFeatureVector, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: stub.id,
            title: stub.title,
            artist: stub.artist,
            release_year: stub.release_year,
            features,
            tags: normalize_tags(tags),
            community_score: stub.community_score,
            popularity: stub.popularity.min(100),
        }
    }

    pub fn artist_key(&self) -> String {
        normalize_artist(&self.artist)
    }

    pub fn song_key(&self) -> String {
        song_key(&self.title, &self.artist)
    }
}

// =============================================================================
// Feedback
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Accept,
    Reject,
}

/// One binary feedback event. Append-only and immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwipeEvent {
    pub track_id: TrackId,
    #[serde(default)]
    pub title: String,
    pub artist: String,
    pub direction: SwipeDirection,
    /// Snapshot of the track's fused features at swipe time
    pub features: FusedFeatureVector,
    /// Snapshot of the track's tags at swipe time
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl SwipeEvent {
    /// Snapshot a candidate into a swipe event
    pub fn from_candidate(candidate: &TrackCandidate, direction: SwipeDirection, timestamp_ms: i64) -> Self {
        Self {
            track_id: candidate.id.clone(),
            title: candidate.title.clone(),
            artist: candidate.artist.clone(),
            direction,
            features: candidate.features.clone(),
            tags: candidate.tags.clone(),
            timestamp_ms,
        }
    }

    pub fn is_accept(&self) -> bool {
        self.direction == SwipeDirection::Accept
    }

    /// Song key of the swiped track, if the event carries a title
    pub fn song_key(&self) -> Option<String> {
        (!self.title.trim().is_empty()).then(|| song_key(&self.title, &self.artist))
    }
}

// =============================================================================
// Preference State
// =============================================================================

/// Learning phase of a user's preference state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    ColdStart,
    Warming,
    Stable,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::ColdStart => "cold_start",
            SessionPhase::Warming => "warming",
            SessionPhase::Stable => "stable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwipeCounters {
    pub total: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Swipes consumed since the last recompute
    pub since_recompute: u32,
    pub recomputes: u32,
}

/// Adaptive per-user state mutated by the preference learner.
///
/// Artist keys are normalized with [`normalize_artist`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferenceState {
    pub user_id: UserId,
    pub weights: FeatureWeights,
    /// Most frequent tags on accepted tracks, most frequent first
    #[serde(default)]
    pub preferred_tags: Vec<String>,
    /// Cumulative tag frequencies over accepted tracks
    #[serde(default)]
    pub tag_counts: BTreeMap<String, u32>,
    /// Mean fused vector of the accepted swipes in the last recompute window
    #[serde(default)]
    pub preference_centroid: Option<[f64; FeatureDimension::COUNT]>,
    #[serde(default)]
    pub soft_rejects: HashMap<String, u32>,
    #[serde(default)]
    pub consecutive_rejects: HashMap<String, u32>,
    #[serde(default)]
    pub hard_excluded_artists: HashSet<String>,
    #[serde(default)]
    pub hard_excluded_tracks: HashSet<TrackId>,
    /// Accepted tracks, never recommended again
    #[serde(default)]
    pub liked_tracks: HashSet<TrackId>,
    /// Song keys of accepted tracks, so other releases of a liked song stay out
    #[serde(default)]
    pub liked_song_keys: HashSet<String>,
    #[serde(default)]
    pub counters: SwipeCounters,
    #[serde(default)]
    pub phase: SessionPhase,
    /// Events consumed since the last recompute
    #[serde(default)]
    pub window: Vec<SwipeEvent>,
}

impl UserPreferenceState {
    /// Fresh state with default weights
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            weights: FeatureWeights::defaults(),
            preferred_tags: Vec::new(),
            tag_counts: BTreeMap::new(),
            preference_centroid: None,
            soft_rejects: HashMap::new(),
            consecutive_rejects: HashMap::new(),
            hard_excluded_artists: HashSet::new(),
            hard_excluded_tracks: HashSet::new(),
            liked_tracks: HashSet::new(),
            liked_song_keys: HashSet::new(),
            counters: SwipeCounters::default(),
            phase: SessionPhase::ColdStart,
            window: Vec::new(),
        }
    }

    /// Reset the state that only lives for one session.
    ///
    /// Learned weights, tags, soft reject counts, rejected and liked tracks
    /// carry over; artist bans and consecutive reject streaks do not.
    pub fn begin_session(&mut self) {
        self.hard_excluded_artists.clear();
        self.consecutive_rejects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_index_matches_all_order() {
        for (i, dim) in FeatureDimension::ALL.iter().enumerate() {
            assert_eq!(dim.index(), i);
        }
    }

    #[test]
    fn test_normalize_domains() {
        assert_eq!(FeatureDimension::Tempo.normalize(40.0), Some(0.0));
        assert_eq!(FeatureDimension::Tempo.normalize(200.0), Some(1.0));
        assert_eq!(FeatureDimension::Tempo.normalize(120.0), Some(0.5));
        assert_eq!(FeatureDimension::Loudness.normalize(-30.0), Some(0.5));
        assert_eq!(FeatureDimension::Key.normalize(11.0), Some(1.0));
        assert_eq!(FeatureDimension::Duration.normalize(30_000.0), Some(0.0));
    }

    #[test]
    fn test_normalize_clamps_and_rejects_non_finite() {
        assert_eq!(FeatureDimension::Energy.normalize(1.7), Some(1.0));
        assert_eq!(FeatureDimension::Energy.normalize(-0.2), Some(0.0));
        assert_eq!(FeatureDimension::Key.normalize(-1.0), Some(0.0));
        assert_eq!(FeatureDimension::Energy.normalize(f64::NAN), None);
        assert_eq!(FeatureDimension::Tempo.normalize(f64::INFINITY), None);
    }

    #[test]
    fn test_neutral_defaults_are_normalized() {
        let tempo = FeatureDimension::Tempo.neutral();
        assert!((tempo - 0.5).abs() < 1e-12);

        let loudness = FeatureDimension::Loudness.neutral();
        assert!((loudness - 50.0 / 60.0).abs() < 1e-12);

        for dim in FeatureDimension::ALL {
            let value = dim.neutral();
            assert!((0.0..=1.0).contains(&value), "{} neutral out of range", dim);
        }
    }

    #[test]
    fn test_from_name_aliases() {
        assert_eq!(FeatureDimension::from_name("Energy"), Some(FeatureDimension::Energy));
        assert_eq!(FeatureDimension::from_name("duration_ms"), Some(FeatureDimension::Duration));
        assert_eq!(FeatureDimension::from_name("mode"), None);
    }

    #[test]
    fn test_source_reliability_table() {
        let table = SourceReliability::default();
        assert_eq!(table.weight_for("spotify"), 1.0);
        assert_eq!(table.weight_for("Deezer"), 0.6);
        assert_eq!(table.weight_for("somewhere-else"), 0.5);
    }

    #[test]
    fn test_neutral_vector_has_no_provenance() {
        let vector = FusedFeatureVector::neutral();
        assert_eq!(vector.total_provenance(), 0);
        assert!(!vector.has_audio_data());
        assert!(!vector.dimension(FeatureDimension::Energy).is_present());
    }

    #[test]
    fn test_from_parts_clamps_values() {
        let mut values = [0.5; FeatureDimension::COUNT];
        values[0] = 3.0;
        values[1] = f64::NAN;
        let vector = FusedFeatureVector::from_parts(
            values,
            [1; FeatureDimension::COUNT],
            [1.0; FeatureDimension::COUNT],
        );
        assert_eq!(vector.get(FeatureDimension::Energy), 1.0);
        assert_eq!(vector.get(FeatureDimension::Valence), FeatureDimension::Valence.neutral());
    }

    #[test]
    fn test_feature_weights_set_rejects_negative() {
        let mut weights = FeatureWeights::defaults();
        weights.set(FeatureDimension::Energy, -1.0);
        assert_eq!(weights[FeatureDimension::Energy], 0.0);
        assert_eq!(weights[FeatureDimension::Valence], 1.5);
    }

    #[test]
    fn test_candidate_tags_are_normalized() {
        let stub = TrackStub::new("t1", "Song", "Artist");
        let candidate = TrackCandidate::from_stub(stub, FusedFeatureVector::neutral(), ["Rock", " rock ", "", "Indie"]);
        assert_eq!(candidate.tags.len(), 2);
        assert!(candidate.tags.contains("rock"));
        assert!(candidate.tags.contains("indie"));
    }

    #[test]
    fn test_song_key_ignores_case() {
        let a = TrackStub::new("1", "Hey Jude ", "The Beatles");
        let b = TrackStub::new("2", "hey jude", "the beatles");
        assert_eq!(a.song_key(), b.song_key());
    }

    #[test]
    fn test_begin_session_keeps_learned_state() {
        let mut state = UserPreferenceState::new("u1");
        state.preferred_tags.push("rock".to_string());
        state.hard_excluded_artists.insert("band".to_string());
        state.consecutive_rejects.insert("band".to_string(), 3);
        state.hard_excluded_tracks.insert("t1".to_string());
        state.liked_tracks.insert("t2".to_string());

        state.begin_session();

        assert!(state.hard_excluded_artists.is_empty());
        assert!(state.consecutive_rejects.is_empty());
        assert_eq!(state.preferred_tags, vec!["rock".to_string()]);
        assert!(state.hard_excluded_tracks.contains("t1"));
        assert!(state.liked_tracks.contains("t2"));
    }

    #[test]
    fn test_state_without_liked_fields_still_loads() {
        let mut value = serde_json::to_value(UserPreferenceState::new("u1")).unwrap();
        let fields = value.as_object_mut().unwrap();
        fields.remove("liked_tracks");
        fields.remove("liked_song_keys");

        let state: UserPreferenceState = serde_json::from_value(value).unwrap();

        assert!(state.liked_tracks.is_empty());
        assert!(state.liked_song_keys.is_empty());
    }
}
