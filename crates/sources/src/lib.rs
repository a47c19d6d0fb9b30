//! # Sources Crate
//!
//! The collaborator layer between the engine and the outside world.
//!
//! ## Components
//!
//! ### Traits
//! - `CandidateProvider`: candidate stubs for a seed, plus seed lookup
//! - `FeatureSource`: one analysis provider's raw audio features
//! - `TagSource`: descriptive tags
//! - `PreferenceStore`: preference state and swipe log persistence
//!
//! ### Catalog-backed implementations
//! Offline collaborators over a `TrackCatalog`, used by the CLI, the
//! harness binary and the tests.
//!
//! ### Enrichment
//! `Enricher` fans feature and tag lookups out concurrently with a timeout
//! per source and fuses the results into `TrackCandidate`s.
//!
//! ## Example Usage
//!
//! ```ignore
//! use sources::{CatalogCandidateProvider, CatalogFeatureSource, CatalogTagSource, Enricher};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(TrackCatalog::load_from_file(path)?);
//! let provider = CatalogCandidateProvider::new(catalog.clone());
//! let enricher = Enricher::new(fusion)
//!     .with_feature_sources(CatalogFeatureSource::all(catalog.clone(), &reliability))
//!     .with_tag_source(Arc::new(CatalogTagSource::new(catalog)));
//!
//! let stubs = provider.fetch_candidates("trk-001", &HashSet::new(), 40).await?;
//! let candidates = enricher.enrich_all(stubs).await;
//! ```

pub mod catalog_sources;
pub mod enrichment;
pub mod error;
pub mod store;
pub mod traits;

// Re-export commonly used types
pub use catalog_sources::{CatalogCandidateProvider, CatalogFeatureSource, CatalogTagSource};
pub use enrichment::Enricher;
pub use error::{Result, SourceError};
pub use store::{InMemoryPreferenceStore, JsonFilePreferenceStore};
pub use traits::{CandidateProvider, FeatureSource, PreferenceStore, TagSource};
