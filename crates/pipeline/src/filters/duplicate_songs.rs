//! Filter to collapse alternate versions of the same song.
//!
//! Providers often return remasters, live cuts and compilation copies
//! under different ids. They share a song key (normalized title plus
//! artist), and only the first occurrence survives.

use crate::traits::{Filter, FilterContext};
use anyhow::Result;
use catalog::TrackStub;
use std::collections::HashSet;

/// Removes stubs whose song key matches the seed, a served or liked track,
/// or an earlier stub in the same batch.
pub struct DuplicateSongFilter;

impl Filter for DuplicateSongFilter {
    fn name(&self) -> &str {
        "DuplicateSongFilter"
    }

    fn apply(&self, stubs: Vec<TrackStub>, context: &FilterContext) -> Result<Vec<TrackStub>> {
        let mut seen: HashSet<String> = HashSet::with_capacity(stubs.len());
        let filtered = stubs
            .into_iter()
            .filter(|stub| {
                let key = stub.song_key();
                key != context.seed_song_key
                    && !context.served_song_keys.contains(&key)
                    && !context.liked_song_keys.contains(&key)
                    && seen.insert(key)
            })
            .collect();
        Ok(filtered)
    }
}
