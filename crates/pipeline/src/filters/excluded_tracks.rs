//! Filter to remove the seed, served, rejected and liked tracks.
//!
//! This is the first filter in the standard chain: nothing that was
//! already shown this session, or swiped in an earlier one, may be shown
//! again.

use crate::traits::{Filter, FilterContext};
use anyhow::Result;
use catalog::TrackStub;

/// Removes stubs whose id is the seed, already served, excluded or liked.
///
/// ## Algorithm
/// Four HashSet lookups per stub, O(1) each.
pub struct ExcludedTrackFilter;

impl Filter for ExcludedTrackFilter {
    fn name(&self) -> &str {
        "ExcludedTrackFilter"
    }

    fn apply(&self, stubs: Vec<TrackStub>, context: &FilterContext) -> Result<Vec<TrackStub>> {
        let filtered: Vec<TrackStub> = stubs
            .into_iter()
            .filter(|stub| {
                stub.id != context.seed_id
                    && !context.served_ids.contains(&stub.id)
                    && !context.excluded_tracks.contains(&stub.id)
                    && !context.liked_tracks.contains(&stub.id)
            })
            .collect();
        Ok(filtered)
    }
}
