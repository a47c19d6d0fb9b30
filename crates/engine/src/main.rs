//! Test harness for the recommendation service.
//!
//! Loads the sample catalog, starts a session for one seed and swipes
//! through it with a fixed policy, logging what the engine serves.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use catalog::{FeatureDimension, SwipeDirection, SwipeEvent, TrackCatalog};
use engine::{Collaborators, EngineConfig, NextItem, RecommendationService};
use sources::{
    CatalogCandidateProvider, CatalogFeatureSource, CatalogTagSource, InMemoryPreferenceStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,engine=debug,pipeline=debug")),
        )
        .init();

    info!("Starting recommendation engine test harness");

    let catalog = Arc::new(
        TrackCatalog::load_from_file(Path::new("data/catalog.json"))
            .context("Failed to load data/catalog.json")?,
    );
    info!("Catalog loaded: {} tracks", catalog.len());

    let config_path = Path::new("config/engine.toml");
    let config = if config_path.exists() {
        EngineConfig::load(config_path)?
    } else {
        EngineConfig::default()
    };

    let collaborators = Collaborators {
        provider: Arc::new(CatalogCandidateProvider::new(catalog.clone())),
        feature_sources: CatalogFeatureSource::all(catalog.clone(), &config.fusion.reliability),
        tag_sources: vec![Arc::new(CatalogTagSource::new(catalog.clone()))],
        store: Arc::new(InMemoryPreferenceStore::new()),
    };
    let service = RecommendationService::new(config, collaborators);

    let seed_id = catalog
        .track_ids()
        .first()
        .cloned()
        .context("Catalog is empty")?;
    let user_id = "harness";

    let batch = service.request_next_batch(&seed_id, user_id).await?;
    info!("Initial batch ({} tracks):", batch.tracks.len());
    for (i, track) in batch.tracks.iter().enumerate() {
        info!(
            "{}. {} - {} [{:.3}]",
            i + 1,
            track.candidate.title,
            track.candidate.artist,
            track.score()
        );
    }

    // Accept energetic tracks, reject the rest
    for step in 0..40 {
        match service.next(user_id).await? {
            NextItem::Ready(track) => {
                let energy = track.candidate.features.get(FeatureDimension::Energy);
                let direction = if energy >= 0.6 {
                    SwipeDirection::Accept
                } else {
                    SwipeDirection::Reject
                };
                info!("{:?} '{}' (energy {:.2})", direction, track.candidate.title, energy);
                let event = SwipeEvent::from_candidate(&track.candidate, direction, step);
                let result = service.record_swipe(user_id, event).await?;
                if let Some(snapshot) = result.recomputed {
                    info!(
                        "Recomputed v{}: phase {:?}, tags {:?}",
                        snapshot.version, snapshot.phase, snapshot.preferred_tags
                    );
                }
            }
            NextItem::Pending => {
                service.wait_for_update(user_id, Duration::from_secs(2)).await?;
            }
            NextItem::Exhausted(reason) => {
                info!("Session exhausted: {}", reason);
                break;
            }
        }
    }

    service.end_session(user_id).await?;
    info!("Harness finished");

    Ok(())
}
