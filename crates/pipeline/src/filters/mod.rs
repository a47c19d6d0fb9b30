//! Exclusion filters applied to provider stubs.
//!
//! Each filter is a unit struct; the data it consults lives in
//! [`FilterContext`](crate::traits::FilterContext).

pub mod duplicate_songs;
pub mod excluded_artists;
pub mod excluded_tracks;

// Re-export for convenience
pub use duplicate_songs::DuplicateSongFilter;
pub use excluded_artists::ExcludedArtistFilter;
pub use excluded_tracks::ExcludedTrackFilter;
