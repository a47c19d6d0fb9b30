//! Filter to remove artists banned for the session.

use crate::traits::{Filter, FilterContext};
use anyhow::Result;
use catalog::TrackStub;

/// Removes stubs by artists the user rejected too many times in a row.
///
/// Artist names are compared trimmed and lowercased.
pub struct ExcludedArtistFilter;

impl Filter for ExcludedArtistFilter {
    fn name(&self) -> &str {
        "ExcludedArtistFilter"
    }

    fn apply(&self, stubs: Vec<TrackStub>, context: &FilterContext) -> Result<Vec<TrackStub>> {
        if context.excluded_artists.is_empty() {
            return Ok(stubs);
        }
        Ok(stubs
            .into_iter()
            .filter(|stub| !context.excluded_artists.contains(&stub.artist_key()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banned_artist_removed_case_insensitively() {
        let mut context = FilterContext::default();
        context.excluded_artists.insert("the band".to_string());

        let stubs = vec![
            TrackStub::new("1", "One", "The Band"),
            TrackStub::new("2", "Two", "  THE BAND "),
            TrackStub::new("3", "Three", "Other Band"),
        ];

        let filtered = ExcludedArtistFilter.apply(stubs, &context).unwrap();

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "3");
    }
}
