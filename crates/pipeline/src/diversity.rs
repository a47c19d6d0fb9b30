//! Per-artist caps and familiarity/discovery interleaving.
//!
//! ## Algorithm
//! 1. Walk the score-descending list once. A candidate whose artist has
//!    reached its cap (session counts plus what this pass already admitted)
//!    is deferred, not dropped. The seed's artist has its own, larger cap.
//! 2. Split the admitted list into seed-artist and other-artist queues,
//!    keeping score order inside each.
//! 3. Re-sequence following the interleave pattern (default: two seed-artist
//!    tracks, then one other). When one queue runs dry the other keeps
//!    filling, but never past `max_seed_run` seed-artist tracks in a row.
//!    Seed-artist tracks that would extend such a run are held back with
//!    the deferred ones; nothing is ever invented to fill a slot.

use catalog::normalize_artist;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::config::{DiversityConfig, InterleaveSlot};
use crate::scoring::ScoredTrack;

/// Served tracks per normalized artist
pub type ArtistCounts = HashMap<String, usize>;

/// Result of one diversity pass
#[derive(Debug, Clone, Default)]
pub struct DiversityOutcome {
    /// Admitted tracks in interleaved order
    pub admitted: Vec<ScoredTrack>,
    /// Tracks skipped because their artist was at its cap (score order),
    /// then seed-artist tracks held back to keep runs short
    pub deferred: Vec<ScoredTrack>,
}

#[derive(Debug, Clone, Default)]
pub struct DiversityFilter {
    config: DiversityConfig,
}

impl DiversityFilter {
    pub fn new(config: DiversityConfig) -> Self {
        Self { config }
    }

    /// Cap that applies to `artist_key` given the seed's artist
    pub fn cap_for(&self, artist_key: &str, seed_artist_key: &str) -> usize {
        if artist_key == seed_artist_key {
            self.config.seed_artist_cap
        } else {
            self.config.other_artist_cap
        }
    }

    /// Whether `artist_key` can take another track given running counts
    pub fn has_room(&self, artist_key: &str, seed_artist_key: &str, counts: &ArtistCounts) -> bool {
        counts.get(artist_key).copied().unwrap_or(0) < self.cap_for(artist_key, seed_artist_key)
    }

    /// Cap and interleave a score-descending candidate list.
    ///
    /// # Arguments
    /// * `candidates` - Candidates sorted best first
    /// * `seed_artist` - Artist of the seed track
    /// * `served` - Per-artist counts already served this session
    pub fn apply(
        &self,
        candidates: Vec<ScoredTrack>,
        seed_artist: &str,
        served: &ArtistCounts,
    ) -> DiversityOutcome {
        self.apply_continuing(candidates, seed_artist, served, 0)
    }

    /// Like [`apply`](Self::apply), for a list appended after
    /// `trailing_seed_run` seed-artist tracks already in a row.
    pub fn apply_continuing(
        &self,
        candidates: Vec<ScoredTrack>,
        seed_artist: &str,
        served: &ArtistCounts,
        trailing_seed_run: usize,
    ) -> DiversityOutcome {
        let seed_key = normalize_artist(seed_artist);
        let mut pass_counts: ArtistCounts = HashMap::new();
        let mut admitted = Vec::with_capacity(candidates.len());
        let mut deferred = Vec::new();

        for track in candidates {
            let artist = track.candidate.artist_key();
            let already = served.get(&artist).copied().unwrap_or(0)
                + pass_counts.get(&artist).copied().unwrap_or(0);

            if already >= self.cap_for(&artist, &seed_key) {
                deferred.push(track);
            } else {
                *pass_counts.entry(artist).or_insert(0) += 1;
                admitted.push(track);
            }
        }

        debug!(
            "Diversity pass: {} admitted, {} deferred",
            admitted.len(),
            deferred.len()
        );

        let (admitted, held_back) = self.interleave(admitted, &seed_key, trailing_seed_run);
        if !held_back.is_empty() {
            debug!("Held back {} seed-artist tracks to break a run", held_back.len());
        }
        deferred.extend(held_back);

        DiversityOutcome { admitted, deferred }
    }

    /// Re-sequence admitted tracks following the interleave pattern.
    ///
    /// Returns the sequence and the seed-artist tracks that could not be
    /// placed without exceeding `max_seed_run`.
    pub fn interleave(
        &self,
        tracks: Vec<ScoredTrack>,
        seed_artist_key: &str,
        trailing_seed_run: usize,
    ) -> (Vec<ScoredTrack>, Vec<ScoredTrack>) {
        let total = tracks.len();
        let (mut seed, mut other): (VecDeque<ScoredTrack>, VecDeque<ScoredTrack>) = tracks
            .into_iter()
            .partition(|t| t.candidate.artist_key() == seed_artist_key);

        let pattern = if self.config.interleave_pattern.is_empty() {
            &[InterleaveSlot::Other][..]
        } else {
            &self.config.interleave_pattern[..]
        };
        let max_run = self.config.max_seed_run.max(1);

        let mut sequenced = Vec::with_capacity(total);
        let mut run = trailing_seed_run;
        let mut slot = 0;
        loop {
            let seed_allowed = run < max_run;
            let next = match pattern[slot % pattern.len()] {
                InterleaveSlot::Seed if seed_allowed => seed
                    .pop_front()
                    .map(|t| (t, true))
                    .or_else(|| other.pop_front().map(|t| (t, false))),
                _ => other.pop_front().map(|t| (t, false)).or_else(|| {
                    if seed_allowed {
                        seed.pop_front().map(|t| (t, true))
                    } else {
                        None
                    }
                }),
            };
            let Some((track, is_seed)) = next else {
                break;
            };
            run = if is_seed { run + 1 } else { 0 };
            sequenced.push(track);
            slot += 1;
        }
        (sequenced, seed.into_iter().collect())
    }

    /// Add served tracks to the running per-artist counts
    pub fn record_served(counts: &mut ArtistCounts, tracks: &[ScoredTrack]) {
        for track in tracks {
            *counts.entry(track.candidate.artist_key()).or_insert(0) += 1;
        }
    }
}
