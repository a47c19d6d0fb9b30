//! # Batch Orchestrator
//!
//! Owns one session's served-candidate queue and keeps it topped up in the
//! background so consumption never stalls on I/O.
//!
//! ## Algorithm
//! One fetch cycle:
//! 1. Snapshot exclusions (every id seen this session plus hard exclusions)
//! 2. Ask the candidate provider for a page, with a timeout and one retry
//! 3. Drop excluded stubs, duplicate songs and banned artists
//! 4. Enrich the survivors concurrently and fuse their features
//! 5. Score and personalize on the blocking pool (Rayon inside)
//! 6. Merge: re-offer deferred candidates, rank, apply diversity caps and
//!    append the admitted tracks behind everything already queued
//!
//! Artist caps count the whole session and counts never go down, so a
//! deferred candidate whose artist is at its cap is dropped at merge time
//! rather than carried forever.
//!
//! ## States
//! `Idle -> FetchingInitial -> Ready <-> Prefetching -> Exhausted(reason)`
//!
//! `next()` hands out queued tracks whatever the state is. Only when the
//! queue is drained does the state decide between `Pending` and
//! `Exhausted`. A prefetch starts once the number of unconsumed tracks
//! drops to the prefetch trigger:
//! `max(floor, ceil(consumption rate x fetch latency))`, both tracked as
//! exponentially weighted moving averages.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use catalog::{SwipeEvent, TrackCandidate, TrackId, TrackStub};
use pipeline::{
    ArtistCounts, DiversityFilter, FilterContext, FilterPipeline, PreferenceLearner,
    PreferenceSnapshot, ScoredTrack, SimilarityScorer, SwipeOutcome, rank,
};
use sources::{CandidateProvider, Enricher, SourceError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::error::{EngineError, Result};

// =============================================================================
// Public Types
// =============================================================================

/// Why a session has nothing more to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// The provider has no further candidates for this seed
    NoCandidates,
    /// The provider failed even after the retry
    ProviderUnavailable,
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionReason::NoCandidates => f.write_str("no more candidates"),
            ExhaustionReason::ProviderUnavailable => f.write_str("candidate provider unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    FetchingInitial,
    Ready,
    Prefetching,
    Exhausted(ExhaustionReason),
}

/// Result of one `next()` call
#[derive(Debug, Clone, PartialEq)]
pub enum NextItem {
    Ready(ScoredTrack),
    /// The queue is drained and a fetch is in flight
    Pending,
    Exhausted(ExhaustionReason),
}

/// Snapshot of the orchestrator queue.
#[derive(Debug, Clone)]
pub struct RecommendationBatch {
    pub tracks: Vec<ScoredTrack>,
    /// Index of the next track `next()` will hand out
    pub cursor: usize,
    /// Once the cursor reaches this index a prefetch starts
    pub prefetch_index: usize,
    pub state: OrchestratorState,
}

impl RecommendationBatch {
    /// Tracks not yet handed out
    pub fn remaining(&self) -> &[ScoredTrack] {
        &self.tracks[self.cursor.min(self.tracks.len())..]
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// What recording a swipe changed
#[derive(Debug, Clone)]
pub struct SwipeResult {
    pub outcome: SwipeOutcome,
    /// Snapshot published by a recompute this swipe triggered
    pub recomputed: Option<Arc<PreferenceSnapshot>>,
}

/// Stateless pipeline components shared by every session.
#[derive(Clone)]
pub struct OrchestratorParts {
    pub provider: Arc<dyn CandidateProvider>,
    pub enricher: Enricher,
    pub scorer: SimilarityScorer,
    pub diversity: DiversityFilter,
    pub filters: Arc<FilterPipeline>,
}

// =============================================================================
// Internal State
// =============================================================================

/// Exponentially weighted moving average
#[derive(Debug, Clone, Copy)]
struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    fn seeded(alpha: f64, initial: f64) -> Self {
        Self {
            alpha,
            value: Some(initial),
        }
    }

    fn observe(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        self.value = Some(match self.value {
            Some(current) => self.alpha * sample + (1.0 - self.alpha) * current,
            None => sample,
        });
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}

struct QueueState {
    state: OrchestratorState,
    queue: Vec<ScoredTrack>,
    cursor: usize,
    /// Ids ever placed in the queue
    queued_ids: HashSet<TrackId>,
    /// Ids handed out by `next()` or swiped
    served_ids: HashSet<TrackId>,
    /// Ids the provider has returned at any point, plus the seed
    seen_ids: HashSet<TrackId>,
    /// Candidates held back by artist caps whose artist still has room
    deferred: Vec<ScoredTrack>,
    /// Per-artist counts of queued tracks
    artist_counts: ArtistCounts,
    fetch_in_flight: bool,
    /// The provider answered a page with nothing new
    provider_drained: bool,
    /// Seconds between `next()` calls
    interval: Ewma,
    /// Seconds per fetch cycle
    latency: Ewma,
    last_next_at: Option<Instant>,
}

impl QueueState {
    fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.cursor)
    }

    fn prefetch_trigger(&self, floor: usize) -> usize {
        let rate = self
            .interval
            .value()
            .filter(|interval| *interval > 0.0)
            .map(|interval| 1.0 / interval)
            .unwrap_or(0.0);
        let latency = self.latency.value().unwrap_or(0.0);
        floor.max((rate * latency).ceil() as usize)
    }

    fn should_prefetch(&self, floor: usize) -> bool {
        !self.fetch_in_flight
            && !self.provider_drained
            && !matches!(self.state, OrchestratorState::Exhausted(_))
            && self.remaining() <= self.prefetch_trigger(floor)
    }
}

struct RoundOutcome {
    fetched: usize,
    admitted: usize,
}

struct Inner {
    seed: TrackCandidate,
    config: OrchestratorConfig,
    parts: OrchestratorParts,
    learner: Arc<PreferenceLearner>,
    queue: Mutex<QueueState>,
    notify: Notify,
    cancel: CancellationToken,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Per-session queue owner. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<Inner>,
}

impl BatchOrchestrator {
    /// Create an idle orchestrator for one seed
    ///
    /// # Arguments
    /// * `seed` - The enriched seed track
    /// * `parts` - Provider, enricher, scorer, diversity filter and exclusion filters
    /// * `learner` - The session's preference learner
    /// * `config` - Queue and I/O settings
    /// * `cancel` - Cancels every background fetch of this session
    pub fn new(
        seed: TrackCandidate,
        parts: OrchestratorParts,
        learner: Arc<PreferenceLearner>,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let queue = QueueState {
            state: OrchestratorState::Idle,
            queue: Vec::new(),
            cursor: 0,
            queued_ids: HashSet::new(),
            served_ids: HashSet::new(),
            seen_ids: HashSet::from([seed.id.clone()]),
            deferred: Vec::new(),
            artist_counts: ArtistCounts::new(),
            fetch_in_flight: false,
            provider_drained: false,
            interval: Ewma::new(config.ewma_alpha),
            latency: Ewma::seeded(config.ewma_alpha, config.latency_estimate().as_secs_f64()),
            last_next_at: None,
        };

        Self {
            inner: Arc::new(Inner {
                seed,
                config,
                parts,
                learner,
                queue: Mutex::new(queue),
                notify: Notify::new(),
                cancel,
            }),
        }
    }

    pub fn seed(&self) -> &TrackCandidate {
        &self.inner.seed
    }

    pub fn state(&self) -> OrchestratorState {
        self.inner.lock().state
    }

    pub fn learner(&self) -> &Arc<PreferenceLearner> {
        &self.inner.learner
    }

    /// Current prefetch trigger, in remaining tracks
    pub fn prefetch_trigger(&self) -> usize {
        self.inner.lock().prefetch_trigger(self.inner.config.prefetch_floor)
    }

    /// Ids handed out so far
    pub fn served_ids(&self) -> HashSet<TrackId> {
        self.inner.lock().served_ids.clone()
    }

    /// Candidates currently held back by artist caps
    pub fn deferred_count(&self) -> usize {
        self.inner.lock().deferred.len()
    }

    /// Snapshot of the queue
    pub fn snapshot(&self) -> RecommendationBatch {
        let q = self.inner.lock();
        let trigger = q.prefetch_trigger(self.inner.config.prefetch_floor);
        RecommendationBatch {
            tracks: q.queue.clone(),
            cursor: q.cursor,
            prefetch_index: q.queue.len().saturating_sub(trigger),
            state: q.state,
        }
    }

    /// Run the first fetch in place and return the resulting queue.
    ///
    /// Does nothing if a fetch already started.
    #[instrument(skip(self), fields(seed = %self.inner.seed.id))]
    pub async fn fetch_initial(&self) -> RecommendationBatch {
        {
            let mut q = self.inner.lock();
            if q.state != OrchestratorState::Idle {
                drop(q);
                return self.snapshot();
            }
            q.state = OrchestratorState::FetchingInitial;
            q.fetch_in_flight = true;
        }

        tokio::select! {
            _ = self.inner.cancel.cancelled() => debug!("Initial fetch cancelled"),
            _ = self.inner.run_fetch(self.inner.config.initial_page_size) => {}
        }

        self.snapshot()
    }

    /// Hand out the next track. Never waits on I/O.
    pub fn next(&self) -> NextItem {
        let mut q = self.inner.lock();

        let now = Instant::now();
        if let Some(last) = q.last_next_at.replace(now) {
            q.interval.observe(now.duration_since(last).as_secs_f64());
        }

        if q.cursor < q.queue.len() {
            let track = q.queue[q.cursor].clone();
            q.cursor += 1;
            q.served_ids.insert(track.candidate.id.clone());

            if q.should_prefetch(self.inner.config.prefetch_floor) {
                debug!(
                    "Prefetch triggered with {} tracks remaining",
                    q.remaining()
                );
                self.spawn_fetch(&mut q);
            }
            return NextItem::Ready(track);
        }

        let state = q.state;
        match state {
            OrchestratorState::Exhausted(reason) => NextItem::Exhausted(reason),
            _ if q.fetch_in_flight => NextItem::Pending,
            _ if q.provider_drained => {
                q.state = OrchestratorState::Exhausted(ExhaustionReason::NoCandidates);
                NextItem::Exhausted(ExhaustionReason::NoCandidates)
            }
            _ => {
                self.spawn_fetch(&mut q);
                if q.fetch_in_flight {
                    NextItem::Pending
                } else {
                    NextItem::Exhausted(ExhaustionReason::ProviderUnavailable)
                }
            }
        }
    }

    /// Wait until a track becomes available or the session is exhausted.
    ///
    /// Returns `false` if nothing changed within `timeout`.
    pub async fn wait_for_update(&self, timeout: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let q = self.inner.lock();
            if q.remaining() > 0 || matches!(q.state, OrchestratorState::Exhausted(_)) {
                return true;
            }
        }

        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    /// Feed a swipe to the learner and update exclusion bookkeeping.
    ///
    /// A recompute runs inline when K swipes have accumulated. If the swipe
    /// banned an artist, that artist's unconsumed tracks leave the queue.
    pub fn record_swipe(&self, event: SwipeEvent) -> SwipeResult {
        let track_id = event.track_id.clone();
        let outcome = self.inner.learner.consume(event);
        let recomputed = if outcome.recompute_due {
            self.inner.learner.recompute_if_due()
        } else {
            None
        };

        let mut q = self.inner.lock();
        q.served_ids.insert(track_id);

        if let Some(artist) = &outcome.newly_excluded_artist {
            let cursor = q.cursor.min(q.queue.len());
            let pending = q.queue.split_off(cursor);
            let before = pending.len();
            q.queue
                .extend(pending.into_iter().filter(|t| &t.candidate.artist_key() != artist));
            q.deferred.retain(|t| &t.candidate.artist_key() != artist);
            info!(
                "Removed {} queued tracks by excluded artist '{}'",
                before - q.remaining(),
                artist
            );
        }

        SwipeResult { outcome, recomputed }
    }

    /// Cancel background work for this session
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn spawn_fetch(&self, q: &mut MutexGuard<'_, QueueState>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; cannot fetch more candidates");
            q.state = OrchestratorState::Exhausted(ExhaustionReason::ProviderUnavailable);
            return;
        };

        let page_size = if q.state == OrchestratorState::Idle {
            q.state = OrchestratorState::FetchingInitial;
            self.inner.config.initial_page_size
        } else {
            q.state = OrchestratorState::Prefetching;
            self.inner.config.page_size
        };
        q.fetch_in_flight = true;

        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => debug!("Background fetch cancelled"),
                _ = inner.run_fetch(page_size) => {}
            }
        });
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One full fetch cycle, including refill rounds when a page yields
    /// nothing servable.
    async fn run_fetch(&self, page_size: usize) {
        let started = Instant::now();
        let mut rounds = 0;

        let result = loop {
            match self.fetch_round(page_size).await {
                Ok(round)
                    if round.admitted == 0
                        && round.fetched > 0
                        && rounds < self.config.max_refill_rounds =>
                {
                    rounds += 1;
                    debug!(
                        "Page yielded nothing servable; refilling ({}/{})",
                        rounds, self.config.max_refill_rounds
                    );
                }
                other => break other,
            }
        };

        self.finish_fetch(result, started.elapsed());
    }

    async fn fetch_round(&self, page_size: usize) -> Result<RoundOutcome> {
        // Step 1: exclusions
        let snapshot = self.learner.snapshot();
        let (exclude, context) = {
            let q = self.lock();
            let mut exclude = q.seen_ids.clone();
            exclude.extend(snapshot.hard_excluded_tracks.iter().cloned());
            exclude.extend(snapshot.liked_tracks.iter().cloned());
            let context = FilterContext::new(&self.seed)
                .with_served(q.queue.iter().map(|t| &t.candidate))
                .with_snapshot(&snapshot);
            (exclude, context)
        };

        // Step 2: provider page
        let stubs = self.fetch_with_retry(&exclude, page_size).await?;
        let fetched = stubs.len();
        let stubs = {
            let mut q = self.lock();
            let mut unique = Vec::with_capacity(stubs.len());
            for stub in stubs {
                if q.seen_ids.insert(stub.id.clone()) {
                    unique.push(stub);
                }
            }
            if unique.is_empty() {
                q.provider_drained = true;
            }
            unique
        };
        let fetched_new = stubs.len();

        // Step 3: exclusion filters
        let kept = self
            .parts
            .filters
            .apply(stubs, &context)
            .map_err(|e| EngineError::TaskFailed(format!("{:#}", e)))?;

        // Step 4: enrichment
        let candidates = self.parts.enricher.enrich_all(kept).await;

        // Step 5: scoring
        let scorer = self.parts.scorer.clone();
        let seed = self.seed.clone();
        let weights_from = Arc::clone(&snapshot);
        let scored = tokio::task::spawn_blocking(move || {
            let mut scored = scorer.score_all(&seed, candidates, &weights_from.weights);
            weights_from.personalize_all(&mut scored);
            scored
        })
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))?;

        // Step 6: merge
        let admitted = self.merge(scored);

        info!(
            "Fetch round: {} returned, {} new, {} admitted",
            fetched, fetched_new, admitted
        );
        Ok(RoundOutcome {
            fetched: fetched_new,
            admitted,
        })
    }

    async fn fetch_with_retry(
        &self,
        exclude: &HashSet<TrackId>,
        page_size: usize,
    ) -> std::result::Result<Vec<TrackStub>, SourceError> {
        match self.fetch_once(exclude, page_size).await {
            Ok(stubs) => return Ok(stubs),
            Err(e) => warn!(
                "Candidate fetch from {} failed: {}; retrying in {:?}",
                self.parts.provider.name(),
                e,
                self.config.retry_backoff()
            ),
        }
        tokio::time::sleep(self.config.retry_backoff()).await;
        self.fetch_once(exclude, page_size).await
    }

    async fn fetch_once(
        &self,
        exclude: &HashSet<TrackId>,
        page_size: usize,
    ) -> std::result::Result<Vec<TrackStub>, SourceError> {
        let limit = self.config.fetch_timeout();
        let call = self
            .parts
            .provider
            .fetch_candidates(&self.seed.id, exclude, page_size);
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                source_id: self.parts.provider.name().to_string(),
                after: limit,
            }),
        }
    }

    /// Merge freshly scored candidates with the deferred pool into the queue.
    ///
    /// Returns the number of tracks appended.
    fn merge(&self, scored: Vec<ScoredTrack>) -> usize {
        let mut q = self.lock();
        // After the lock: a ban published before it is seen here, one published
        // after it is purged from the queue by `record_swipe`
        let snapshot = self.learner.snapshot();

        // Re-offer deferred candidates under the latest preferences
        let mut pool = std::mem::take(&mut q.deferred);
        for track in &mut pool {
            snapshot.personalize(track);
        }
        pool.extend(scored);

        let mut unique: HashSet<TrackId> = HashSet::with_capacity(pool.len());
        pool.retain(|t| {
            !q.queued_ids.contains(&t.candidate.id)
                && !snapshot.is_excluded(&t.candidate.id, &t.candidate.artist_key())
                && unique.insert(t.candidate.id.clone())
        });

        rank(&mut pool);
        let seed_key = self.seed.artist_key();
        let trailing_seed_run = q
            .queue
            .iter()
            .rev()
            .take_while(|t| t.candidate.artist_key() == seed_key)
            .count();
        let outcome = self.parts.diversity.apply_continuing(
            pool,
            &self.seed.artist,
            &q.artist_counts,
            trailing_seed_run,
        );

        DiversityFilter::record_served(&mut q.artist_counts, &outcome.admitted);
        let admitted = outcome.admitted.len();
        for track in outcome.admitted {
            q.queued_ids.insert(track.candidate.id.clone());
            q.queue.push(track);
        }

        let mut deferred = outcome.deferred;
        let capped = deferred.len();
        deferred.retain(|t| {
            self.parts
                .diversity
                .has_room(&t.candidate.artist_key(), &seed_key, &q.artist_counts)
        });
        debug!(
            "Merged {} tracks into queue ({} deferred, {} dropped at cap, {} queued in total)",
            admitted,
            deferred.len(),
            capped - deferred.len(),
            q.queue.len()
        );
        q.deferred = deferred;
        admitted
    }

    fn finish_fetch(&self, result: Result<RoundOutcome>, elapsed: Duration) {
        {
            let mut q = self.lock();
            q.fetch_in_flight = false;
            q.latency.observe(elapsed.as_secs_f64());

            match result {
                Ok(_) => {
                    q.state = if q.remaining() > 0 {
                        OrchestratorState::Ready
                    } else {
                        info!("No servable candidates left for seed {}", self.seed.id);
                        OrchestratorState::Exhausted(ExhaustionReason::NoCandidates)
                    };
                }
                Err(e) => {
                    warn!("Candidate provider unavailable after retry: {}", e);
                    q.state = OrchestratorState::Exhausted(ExhaustionReason::ProviderUnavailable);
                }
            }
            info!(
                "Fetch finished in {:.2?}: {} queued, {} remaining, state {:?}",
                elapsed,
                q.queue.len(),
                q.remaining(),
                q.state
            );
        }
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog::{FusedFeatureVector, SwipeDirection, UserPreferenceState};
    use pipeline::{FeatureFusionEngine, LearnerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ============================================================================
    // Test Doubles
    // ============================================================================

    /// Serves stubs from a fixed list, optionally slowing down after the first page
    struct ListProvider {
        stubs: Vec<TrackStub>,
        delay_after_first: Duration,
        calls: AtomicUsize,
    }

    impl ListProvider {
        fn new(stubs: Vec<TrackStub>) -> Self {
            Self {
                stubs,
                delay_after_first: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay_after_first(mut self, delay: Duration) -> Self {
            self.delay_after_first = delay;
            self
        }
    }

    #[async_trait]
    impl CandidateProvider for ListProvider {
        fn name(&self) -> &str {
            "list"
        }

        async fn fetch_candidates(
            &self,
            _seed_id: &str,
            exclude: &HashSet<TrackId>,
            page_size: usize,
        ) -> std::result::Result<Vec<TrackStub>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call > 0 && !self.delay_after_first.is_zero() {
                tokio::time::sleep(self.delay_after_first).await;
            }
            Ok(self
                .stubs
                .iter()
                .filter(|s| !exclude.contains(&s.id))
                .take(page_size)
                .cloned()
                .collect())
        }

        async fn lookup_track(&self, track_id: &str) -> std::result::Result<Option<TrackStub>, SourceError> {
            Ok(self.stubs.iter().find(|s| s.id == track_id).cloned())
        }
    }

    /// Always fails, or hangs past any timeout
    struct BrokenProvider {
        hang: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CandidateProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_candidates(
            &self,
            _seed_id: &str,
            _exclude: &HashSet<TrackId>,
            _page_size: usize,
        ) -> std::result::Result<Vec<TrackStub>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Err(SourceError::unavailable("broken", "connection refused"))
        }

        async fn lookup_track(&self, _track_id: &str) -> std::result::Result<Option<TrackStub>, SourceError> {
            Ok(None)
        }
    }

    // ============================================================================
    // Test Fixtures
    // ============================================================================

    fn stubs(n: usize) -> Vec<TrackStub> {
        (0..n)
            .map(|i| {
                TrackStub::new(format!("t{:03}", i), format!("Song {}", i), format!("Artist {}", i))
                    .with_community_score(1.0 - i as f64 / (n as f64 + 1.0))
            })
            .collect()
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            initial_page_size: 10,
            page_size: 10,
            prefetch_floor: 3,
            latency_estimate_ms: 10,
            fetch_timeout_ms: 200,
            retry_backoff_ms: 5,
            ..OrchestratorConfig::default()
        }
    }

    fn build(provider: Arc<dyn CandidateProvider>, config: OrchestratorConfig) -> BatchOrchestrator {
        let parts = OrchestratorParts {
            provider,
            enricher: Enricher::new(FeatureFusionEngine::default()),
            scorer: SimilarityScorer::default(),
            diversity: DiversityFilter::default(),
            filters: Arc::new(FilterPipeline::standard()),
        };
        let seed = TrackCandidate::from_stub(
            TrackStub::new("seed", "Seed Song", "Seed Artist"),
            FusedFeatureVector::neutral(),
            ["rock"],
        );
        let learner = Arc::new(PreferenceLearner::new(
            LearnerConfig::default(),
            UserPreferenceState::new("u1"),
        ));
        BatchOrchestrator::new(seed, parts, learner, config, CancellationToken::new())
    }

    /// Consume until exhausted, waiting through pending states
    async fn drain(orchestrator: &BatchOrchestrator) -> (Vec<TrackId>, NextItem) {
        let mut served = Vec::new();
        for _ in 0..1_000 {
            match orchestrator.next() {
                NextItem::Ready(track) => served.push(track.candidate.id),
                NextItem::Pending => {
                    assert!(
                        orchestrator.wait_for_update(Duration::from_secs(2)).await,
                        "pending state never resolved"
                    );
                }
                exhausted @ NextItem::Exhausted(_) => return (served, exhausted),
            }
        }
        panic!("orchestrator never exhausted");
    }

    // ============================================================================
    // Tests
    // ============================================================================

    #[tokio::test]
    async fn test_initial_fetch_fills_queue() {
        let orchestrator = build(Arc::new(ListProvider::new(stubs(25))), config());
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);

        let batch = orchestrator.fetch_initial().await;

        assert_eq!(batch.tracks.len(), 10, "initial page size bounds the first batch");
        assert_eq!(batch.cursor, 0);
        assert_eq!(batch.state, OrchestratorState::Ready);
        assert_eq!(batch.prefetch_index, 7);
        assert!(
            batch.tracks.windows(2).all(|w| w[0].score() >= w[1].score()),
            "queue is score ordered when no diversity reordering applies"
        );
    }

    #[tokio::test]
    async fn test_batches_never_repeat_a_track() {
        let orchestrator = build(Arc::new(ListProvider::new(stubs(45))), config());
        orchestrator.fetch_initial().await;

        let (served, last) = drain(&orchestrator).await;

        let unique: HashSet<&TrackId> = served.iter().collect();
        assert_eq!(unique.len(), served.len(), "a track was served twice");
        assert_eq!(served.len(), 45, "every candidate is eventually served");
        assert!(!served.contains(&"seed".to_string()));
        assert_eq!(last, NextItem::Exhausted(ExhaustionReason::NoCandidates));
    }

    #[tokio::test]
    async fn test_slow_provider_surfaces_pending_then_appends() {
        let provider = ListProvider::new(stubs(20)).with_delay_after_first(Duration::from_millis(150));
        let orchestrator = build(Arc::new(provider), OrchestratorConfig {
            initial_page_size: 5,
            page_size: 5,
            prefetch_floor: 2,
            ..config()
        });
        orchestrator.fetch_initial().await;

        let mut served = HashSet::new();
        for _ in 0..5 {
            match orchestrator.next() {
                NextItem::Ready(track) => assert!(served.insert(track.candidate.id)),
                other => panic!("expected a ready track, got {:?}", other),
            }
        }

        // Prefetch is still sleeping in the provider
        assert_eq!(orchestrator.next(), NextItem::Pending);
        assert_eq!(orchestrator.state(), OrchestratorState::Prefetching);

        assert!(orchestrator.wait_for_update(Duration::from_secs(2)).await);
        match orchestrator.next() {
            NextItem::Ready(track) => {
                assert!(served.insert(track.candidate.id), "merged results must be new tracks")
            }
            other => panic!("expected merged results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_provider_retries_once_then_exhausts() {
        let provider = Arc::new(BrokenProvider {
            hang: false,
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build(provider.clone(), config());

        let batch = orchestrator.fetch_initial().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2, "one retry, no more");
        assert!(batch.is_empty());
        assert_eq!(
            batch.state,
            OrchestratorState::Exhausted(ExhaustionReason::ProviderUnavailable)
        );
        assert_eq!(
            orchestrator.next(),
            NextItem::Exhausted(ExhaustionReason::ProviderUnavailable)
        );
    }

    #[tokio::test]
    async fn test_hanging_provider_times_out() {
        let provider = Arc::new(BrokenProvider {
            hang: true,
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build(provider.clone(), OrchestratorConfig {
            fetch_timeout_ms: 20,
            ..config()
        });

        let batch = orchestrator.fetch_initial().await;

        assert_eq!(
            batch.state,
            OrchestratorState::Exhausted(ExhaustionReason::ProviderUnavailable)
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_provider_is_no_candidates() {
        let orchestrator = build(Arc::new(ListProvider::new(Vec::new())), config());

        let batch = orchestrator.fetch_initial().await;

        assert_eq!(
            batch.state,
            OrchestratorState::Exhausted(ExhaustionReason::NoCandidates)
        );
        assert_eq!(
            orchestrator.next(),
            NextItem::Exhausted(ExhaustionReason::NoCandidates)
        );
    }

    #[tokio::test]
    async fn test_next_from_idle_starts_fetch() {
        let orchestrator = build(Arc::new(ListProvider::new(stubs(5))), config());

        assert_eq!(orchestrator.next(), NextItem::Pending);
        assert_eq!(orchestrator.state(), OrchestratorState::FetchingInitial);
        assert!(orchestrator.wait_for_update(Duration::from_secs(2)).await);
        assert!(matches!(orchestrator.next(), NextItem::Ready(_)));
    }

    #[tokio::test]
    async fn test_banned_artist_leaves_queue() {
        let mut list = stubs(6);
        for i in 0..3 {
            list.push(
                TrackStub::new(format!("b{}", i), format!("Banned {}", i), "Banned Artist")
                    .with_community_score(0.99),
            );
        }
        let orchestrator = build(Arc::new(ListProvider::new(list)), OrchestratorConfig {
            initial_page_size: 20,
            ..config()
        });
        let batch = orchestrator.fetch_initial().await;
        assert!(batch.tracks.iter().any(|t| t.candidate.artist == "Banned Artist"));

        for i in 0..3 {
            let rejected = TrackCandidate::from_stub(
                TrackStub::new(format!("x{}", i), "Elsewhere", "Banned Artist"),
                FusedFeatureVector::neutral(),
                Vec::<String>::new(),
            );
            orchestrator.record_swipe(SwipeEvent::from_candidate(&rejected, SwipeDirection::Reject, i));
        }

        let batch = orchestrator.snapshot();
        assert!(
            batch.remaining().iter().all(|t| t.candidate.artist != "Banned Artist"),
            "banned artist must not be served"
        );
        assert_eq!(batch.remaining().len(), 6);
    }

    #[tokio::test]
    async fn test_capped_artists_do_not_linger_in_deferred_pool() {
        let mut list = stubs(3);
        for i in 0..10 {
            list.push(TrackStub::new(format!("solo{}", i), format!("Solo {}", i), "Solo"));
        }
        let orchestrator = build(Arc::new(ListProvider::new(list)), OrchestratorConfig {
            initial_page_size: 20,
            ..config()
        });

        let batch = orchestrator.fetch_initial().await;

        let solo = batch.tracks.iter().filter(|t| t.candidate.artist == "Solo").count();
        assert_eq!(solo, 3);
        assert_eq!(orchestrator.deferred_count(), 0, "an artist at its session cap never gets room back");
    }

    #[tokio::test]
    async fn test_held_back_seed_artist_tracks_wait_for_a_break() {
        let mut list: Vec<TrackStub> = (0..4)
            .map(|i| {
                TrackStub::new(format!("s{}", i), format!("Own {}", i), "Seed Artist")
                    .with_community_score(0.9)
            })
            .collect();
        list.push(TrackStub::new("late", "Late", "Someone").with_community_score(0.1));
        let orchestrator = build(Arc::new(ListProvider::new(list)), OrchestratorConfig {
            initial_page_size: 4,
            page_size: 4,
            ..config()
        });

        let batch = orchestrator.fetch_initial().await;
        assert_eq!(batch.tracks.len(), 2, "no other artist to break the run yet");
        assert_eq!(orchestrator.deferred_count(), 2);

        let (served, _) = drain(&orchestrator).await;

        assert_eq!(served, vec!["s0", "s1", "late", "s2", "s3"]);
    }

    #[test]
    fn test_merge_sees_ban_published_while_waiting_for_queue() {
        let orchestrator = build(Arc::new(ListProvider::new(Vec::new())), config());
        let inner = &orchestrator.inner;
        let candidates: Vec<TrackCandidate> = ["b0", "b1", "ok"]
            .iter()
            .map(|id| {
                let artist = if id.starts_with('b') { "Banned Artist" } else { "Fine Artist" };
                TrackCandidate::from_stub(
                    TrackStub::new(*id, format!("Song {}", id), artist),
                    FusedFeatureVector::neutral(),
                    Vec::<String>::new(),
                )
            })
            .collect();
        // Scored before the ban exists
        let scored = inner.parts.scorer.score_all(
            &inner.seed,
            candidates,
            &inner.learner.snapshot().weights,
        );

        let admitted = std::thread::scope(|scope| {
            let guard = inner.lock();
            let merging = scope.spawn(|| inner.merge(scored));
            std::thread::sleep(Duration::from_millis(50));

            for i in 0..3 {
                let rejected = TrackCandidate::from_stub(
                    TrackStub::new(format!("x{}", i), "Elsewhere", "Banned Artist"),
                    FusedFeatureVector::neutral(),
                    Vec::<String>::new(),
                );
                inner
                    .learner
                    .consume(SwipeEvent::from_candidate(&rejected, SwipeDirection::Reject, i));
            }
            drop(guard);
            merging.join().unwrap()
        });

        assert_eq!(admitted, 1);
        let batch = orchestrator.snapshot();
        assert!(batch.tracks.iter().all(|t| t.candidate.artist != "Banned Artist"));
    }

    #[tokio::test]
    async fn test_swipes_trigger_recompute_every_k() {
        let orchestrator = build(Arc::new(ListProvider::new(stubs(30))), config());
        orchestrator.fetch_initial().await;

        let mut recomputes = 0;
        for i in 0..20 {
            let NextItem::Ready(track) = orchestrator.next() else {
                orchestrator.wait_for_update(Duration::from_secs(2)).await;
                continue;
            };
            let event = SwipeEvent::from_candidate(&track.candidate, SwipeDirection::Accept, i);
            if orchestrator.record_swipe(event).recomputed.is_some() {
                recomputes += 1;
            }
        }

        assert!(recomputes >= 1, "at least one recompute after K swipes");
        assert!(orchestrator.served_ids().len() >= 10);
    }

    #[tokio::test]
    async fn test_cancel_stops_background_fetch() {
        let provider = ListProvider::new(stubs(10)).with_delay_after_first(Duration::from_millis(500));
        let orchestrator = build(Arc::new(provider), OrchestratorConfig {
            initial_page_size: 2,
            page_size: 2,
            prefetch_floor: 1,
            ..config()
        });
        orchestrator.fetch_initial().await;
        orchestrator.next();
        orchestrator.next();

        orchestrator.cancel();

        assert!(orchestrator.is_cancelled());
        assert!(
            !orchestrator.wait_for_update(Duration::from_millis(50)).await,
            "a cancelled fetch never merges"
        );
    }

    #[test]
    fn test_ewma() {
        let mut average = Ewma::new(0.5);
        assert_eq!(average.value(), None);
        average.observe(2.0);
        assert_eq!(average.value(), Some(2.0));
        average.observe(4.0);
        assert_eq!(average.value(), Some(3.0));
        average.observe(f64::NAN);
        assert_eq!(average.value(), Some(3.0));
    }

    #[test]
    fn test_prefetch_trigger_uses_rate_and_latency() {
        let mut q = QueueState {
            state: OrchestratorState::Ready,
            queue: Vec::new(),
            cursor: 0,
            queued_ids: HashSet::new(),
            served_ids: HashSet::new(),
            seen_ids: HashSet::new(),
            deferred: Vec::new(),
            artist_counts: ArtistCounts::new(),
            fetch_in_flight: false,
            provider_drained: false,
            interval: Ewma::new(0.3),
            latency: Ewma::seeded(0.3, 2.0),
            last_next_at: None,
        };
        assert_eq!(q.prefetch_trigger(10), 10, "no consumption observed yet");

        // One swipe every 0.1s with 2s fetches needs 20 tracks of headroom
        q.interval.observe(0.1);
        assert_eq!(q.prefetch_trigger(10), 20);
    }
}
