//! # Recommendation Service
//!
//! Entry point of the engine. Ties each user to one active session made of
//! a preference learner and a batch orchestrator for the current seed.
//!
//! ## Persistence
//! Every swipe is appended to the store's swipe log as it happens. The
//! preference state is saved at save points: after each recompute and when
//! the session ends. A failed save marks the session dirty and the next
//! save point retries it; recommendations keep flowing either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use catalog::{SwipeEvent, TrackCandidate, UserId, UserPreferenceState};
use pipeline::{
    DiversityFilter, FeatureFusionEngine, FilterPipeline, PreferenceLearner, PreferenceSnapshot,
    SimilarityScorer,
};
use sources::{
    CandidateProvider, Enricher, FeatureSource, PreferenceStore, SourceError, TagSource,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::orchestrator::{
    BatchOrchestrator, NextItem, OrchestratorParts, RecommendationBatch, SwipeResult,
};

/// External collaborators the service is built from
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn CandidateProvider>,
    pub feature_sources: Vec<Arc<dyn FeatureSource>>,
    pub tag_sources: Vec<Arc<dyn TagSource>>,
    pub store: Arc<dyn PreferenceStore>,
}

/// One user's active seed session
pub struct Session {
    user_id: UserId,
    orchestrator: BatchOrchestrator,
    dirty: AtomicBool,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn seed(&self) -> &TrackCandidate {
        self.orchestrator.seed()
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    pub fn learner(&self) -> &Arc<PreferenceLearner> {
        self.orchestrator.learner()
    }

    pub fn preferences(&self) -> Arc<PreferenceSnapshot> {
        self.learner().snapshot()
    }

    /// Whether the preference state has changes not yet persisted
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

/// Seed-based recommendation service
pub struct RecommendationService {
    config: EngineConfig,
    parts: OrchestratorParts,
    store: Arc<dyn PreferenceStore>,
    sessions: RwLock<HashMap<UserId, Arc<Session>>>,
    shutdown: CancellationToken,
}

impl RecommendationService {
    /// Create a service with all pipeline components initialized
    ///
    /// # Arguments
    /// * `config` - Validated engine configuration
    /// * `collaborators` - Candidate provider, feature and tag sources, preference store
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            provider,
            feature_sources,
            tag_sources,
            store,
        } = collaborators;

        let mut enricher = Enricher::new(FeatureFusionEngine::new(config.fusion.clone()))
            .with_feature_sources(feature_sources)
            .with_source_timeout(config.orchestrator.source_timeout())
            .with_concurrency(config.orchestrator.enrichment_concurrency);
        for source in tag_sources {
            enricher = enricher.with_tag_source(source);
        }

        let parts = OrchestratorParts {
            provider,
            enricher,
            scorer: SimilarityScorer::new(config.scoring.clone()),
            diversity: DiversityFilter::new(config.diversity.clone()),
            filters: Arc::new(FilterPipeline::standard()),
        };

        info!(
            "Recommendation service ready (provider: {})",
            parts.provider.name()
        );

        Self {
            config,
            parts,
            store,
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a session for `seed_id` and return its first batch.
    ///
    /// Any previous session of the same user is ended first.
    #[instrument(skip(self))]
    pub async fn request_next_batch(&self, seed_id: &str, user_id: &str) -> Result<RecommendationBatch> {
        let start = Instant::now();

        // Step 1: end the previous session
        let previous = self.sessions.write().await.remove(user_id);
        if let Some(previous) = previous {
            info!("Replacing session with seed {}", previous.seed().id);
            self.close(&previous).await;
        }

        // Step 2: resolve and enrich the seed
        let provider = self.parts.provider.name().to_string();
        let stub = self
            .bounded(self.parts.provider.lookup_track(seed_id), |after| {
                SourceError::Timeout {
                    source_id: provider,
                    after,
                }
            })
            .await?
            .ok_or_else(|| EngineError::UnknownTrack(seed_id.to_string()))?;
        let seed = self.parts.enricher.enrich(stub).await;
        info!(
            "Seed resolved: '{}' by {} (audio data: {})",
            seed.title,
            seed.artist,
            seed.features.has_audio_data()
        );

        // Step 3: load preferences
        let load = self.store.load_preference_state(user_id);
        let mut state = match self.bounded(load, persistence_timeout("load")).await {
            Ok(Some(state)) => state,
            Ok(None) => UserPreferenceState::new(user_id),
            Err(e) => {
                warn!("Could not load preferences for {}: {}; starting fresh", user_id, e);
                UserPreferenceState::new(user_id)
            }
        };
        state.begin_session();
        let learner = Arc::new(PreferenceLearner::new(self.config.learner.clone(), state));

        // Step 4: orchestrate the first batch
        let orchestrator = BatchOrchestrator::new(
            seed,
            self.parts.clone(),
            learner,
            self.config.orchestrator.clone(),
            self.shutdown.child_token(),
        );
        let session = Arc::new(Session {
            user_id: user_id.to_string(),
            orchestrator: orchestrator.clone(),
            dirty: AtomicBool::new(false),
        });
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session);

        let batch = orchestrator.fetch_initial().await;
        info!(
            "First batch of {} tracks in {:.2?} (state {:?})",
            batch.tracks.len(),
            start.elapsed(),
            batch.state
        );
        Ok(batch)
    }

    /// Hand out the user's next track
    pub async fn next(&self, user_id: &str) -> Result<NextItem> {
        Ok(self.session(user_id).await?.orchestrator.next())
    }

    /// Wait until the user's queue has something new or is exhausted
    pub async fn wait_for_update(&self, user_id: &str, timeout: Duration) -> Result<bool> {
        let session = self.session(user_id).await?;
        Ok(session.orchestrator.wait_for_update(timeout).await)
    }

    /// Current queue of the user's session
    pub async fn current_batch(&self, user_id: &str) -> Result<RecommendationBatch> {
        Ok(self.session(user_id).await?.orchestrator.snapshot())
    }

    /// Record a swipe: log it, learn from it and persist at save points.
    #[instrument(skip(self, event), fields(track = %event.track_id, direction = ?event.direction))]
    pub async fn record_swipe(&self, user_id: &str, event: SwipeEvent) -> Result<SwipeResult> {
        let session = self.session(user_id).await?;

        let append = self.store.append_swipe(user_id, &event);
        if let Err(e) = self.bounded(append, persistence_timeout("append")).await {
            warn!("Could not append swipe for {}: {}", user_id, e);
        }

        let result = session.orchestrator.record_swipe(event);
        session.mark_dirty();

        if result.recomputed.is_some() {
            self.save(&session).await;
        }
        Ok(result)
    }

    /// End the user's session, persisting the final preference state
    #[instrument(skip(self))]
    pub async fn end_session(&self, user_id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(user_id)
            .ok_or_else(|| EngineError::UnknownSession(user_id.to_string()))?;
        self.close(&session).await;
        Ok(())
    }

    /// Look up the user's active session
    pub async fn session(&self, user_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSession(user_id.to_string()))
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel background work of every session and persist their state
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            self.save(session).await;
        }
        info!("Shut down {} sessions", sessions.len());
    }

    async fn close(&self, session: &Session) {
        session.orchestrator.cancel();
        session.mark_dirty();
        self.save(session).await;
    }

    /// Persist the session's preference state if it is dirty
    async fn save(&self, session: &Session) {
        if !session.is_dirty() {
            return;
        }
        let state = session.learner().state();
        let save = self.store.save_preference_state(&session.user_id, &state);
        match self.bounded(save, persistence_timeout("save")).await {
            Ok(()) => {
                session.dirty.store(false, Ordering::SeqCst);
                info!(
                    "Saved preferences for {} ({} swipes, phase {:?})",
                    session.user_id, state.counters.total, state.phase
                );
            }
            Err(e) => warn!(
                "Could not save preferences for {}: {}; will retry at the next save point",
                session.user_id, e
            ),
        }
    }

    /// Await a collaborator call for at most the fetch timeout
    async fn bounded<T, F>(
        &self,
        call: F,
        on_timeout: impl FnOnce(Duration) -> SourceError,
    ) -> std::result::Result<T, SourceError>
    where
        F: Future<Output = std::result::Result<T, SourceError>>,
    {
        let limit = self.config.orchestrator.fetch_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        }
    }
}

fn persistence_timeout(operation: &'static str) -> impl FnOnce(Duration) -> SourceError {
    move |after| SourceError::PersistenceFailure(format!("{} timed out after {:?}", operation, after))
}

impl Drop for RecommendationService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
