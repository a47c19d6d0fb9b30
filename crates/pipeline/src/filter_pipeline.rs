//! The FilterPipeline orchestrates multiple filters.
//!
//! Filters are chained with the builder pattern and applied in the order
//! they were added.

use crate::traits::{Filter, FilterContext};
use anyhow::Result;
use catalog::TrackStub;

/// Chains multiple filters together into a processing pipeline.
///
/// ## Usage
/// ```ignore
/// let pipeline = FilterPipeline::new()
///     .add_filter(ExcludedTrackFilter)
///     .add_filter(ExcludedArtistFilter)
///     .add_filter(DuplicateSongFilter);
///
/// let kept = pipeline.apply(stubs, &context)?;
/// ```
pub struct FilterPipeline {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterPipeline {
    /// Create a new empty FilterPipeline.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// The standard exclusion chain used by the orchestrator
    pub fn standard() -> Self {
        Self::new()
            .add_filter(crate::filters::ExcludedTrackFilter)
            .add_filter(crate::filters::ExcludedArtistFilter)
            .add_filter(crate::filters::DuplicateSongFilter)
    }

    /// Add a filter to the pipeline (builder pattern).
    pub fn add_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply all filters in sequence to the stubs.
    ///
    /// # Returns
    /// * `Ok(Vec<TrackStub>)` - The stubs that survived every filter
    /// * `Err` - If any filter fails
    pub fn apply(&self, stubs: Vec<TrackStub>, context: &FilterContext) -> Result<Vec<TrackStub>> {
        let mut current = stubs;
        for filter in &self.filters {
            tracing::debug!(
                "Applying filter: {} (input count: {})",
                filter.name(),
                current.len()
            );
            current = filter.apply(current, context)?;
            tracing::debug!(
                "Filter applied: {} (output count: {})",
                filter.name(),
                current.len()
            );
        }
        Ok(current)
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::ExcludedTrackFilter;

    fn stubs() -> Vec<TrackStub> {
        vec![
            TrackStub::new("1", "One", "Alpha"),
            TrackStub::new("2", "Two", "Beta"),
            TrackStub::new("3", "Three", "Alpha"),
        ]
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = FilterPipeline::new();
        let context = FilterContext::default();

        let filtered = pipeline.apply(stubs(), &context).unwrap();
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_single_filter() {
        let mut context = FilterContext::default();
        context.excluded_tracks.insert("1".to_string());

        let pipeline = FilterPipeline::new().add_filter(ExcludedTrackFilter);

        let filtered = pipeline.apply(stubs(), &context).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, "2");
    }

    #[test]
    fn test_standard_chain() {
        let mut context = FilterContext::default();
        context.seed_id = "2".to_string();
        context.excluded_artists.insert("alpha".to_string());

        let pipeline = FilterPipeline::standard();
        assert_eq!(pipeline.len(), 3);

        let filtered = pipeline.apply(stubs(), &context).unwrap();
        assert!(filtered.is_empty(), "seed and banned artist removed: {:?}", filtered);
    }
}
