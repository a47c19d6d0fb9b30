//! Preference persistence collaborators.
//!
//! - [`InMemoryPreferenceStore`]: process-local, with failure injection for tests
//! - [`JsonFilePreferenceStore`]: one `<user>.json` state file per user plus
//!   an append-only `<user>.swipes.jsonl` swipe log

use async_trait::async_trait;
use catalog::{SwipeEvent, UserId, UserPreferenceState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, SourceError};
use crate::traits::PreferenceStore;

/// Keeps states and swipe logs in memory.
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    states: Mutex<HashMap<UserId, UserPreferenceState>>,
    swipes: Mutex<HashMap<UserId, Vec<SwipeEvent>>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing state
    pub async fn insert_state(&self, state: UserPreferenceState) {
        self.states.lock().await.insert(state.user_id.clone(), state);
    }

    /// Make every subsequent call fail with `PersistenceFailure`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn saved_state(&self, user_id: &str) -> Option<UserPreferenceState> {
        self.states.lock().await.get(user_id).cloned()
    }

    pub async fn swipes_for(&self, user_id: &str) -> Vec<SwipeEvent> {
        self.swipes.lock().await.get(user_id).cloned().unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SourceError::PersistenceFailure("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn load_preference_state(&self, user_id: &str) -> Result<Option<UserPreferenceState>> {
        self.check()?;
        Ok(self.states.lock().await.get(user_id).cloned())
    }

    async fn save_preference_state(&self, user_id: &str, state: &UserPreferenceState) -> Result<()> {
        self.check()?;
        self.states.lock().await.insert(user_id.to_string(), state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn append_swipe(&self, user_id: &str, event: &SwipeEvent) -> Result<()> {
        self.check()?;
        self.swipes
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }
}

/// Stores each user's state as pretty JSON in a directory.
#[derive(Debug, Clone)]
pub struct JsonFilePreferenceStore {
    dir: PathBuf,
}

impl JsonFilePreferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(user_id)))
    }

    fn swipe_log_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.swipes.jsonl", file_stem(user_id)))
    }

    /// Read back the swipe log, skipping lines that do not parse
    pub async fn read_swipes(&self, user_id: &str) -> Result<Vec<SwipeEvent>> {
        let path = self.swipe_log_path(user_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    debug!("Skipping malformed swipe line in {:?}: {}", path, e);
                    None
                }
            })
            .collect())
    }
}

/// Keep user ids from escaping the store directory
fn file_stem(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl PreferenceStore for JsonFilePreferenceStore {
    async fn load_preference_state(&self, user_id: &str) -> Result<Option<UserPreferenceState>> {
        let path = self.state_path(user_id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_preference_state(&self, user_id: &str, state: &UserPreferenceState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.state_path(user_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Saved preference state for {} to {:?}", user_id, path);
        Ok(())
    }

    async fn append_swipe(&self, user_id: &str, event: &SwipeEvent) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.swipe_log_path(user_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{FeatureDimension, SessionPhase, SwipeDirection, TrackCandidate, TrackStub};

    fn swipe(id: &str, direction: SwipeDirection) -> SwipeEvent {
        let candidate = TrackCandidate::from_stub(
            TrackStub::new(id, "Song", "Artist"),
            catalog::FusedFeatureVector::neutral(),
            ["rock"],
        );
        SwipeEvent::from_candidate(&candidate, direction, 1_700_000_000_000)
    }

    #[tokio::test]
    async fn test_in_memory_round_trip_and_failure() {
        let store = InMemoryPreferenceStore::new();
        assert!(store.load_preference_state("u1").await.unwrap().is_none());

        let mut state = UserPreferenceState::new("u1");
        state.phase = SessionPhase::Warming;
        store.save_preference_state("u1", &state).await.unwrap();
        store.append_swipe("u1", &swipe("t1", SwipeDirection::Accept)).await.unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.swipes_for("u1").await.len(), 1);

        store.set_failing(true);
        let err = store.save_preference_state("u1", &state).await.unwrap_err();
        assert!(matches!(err, SourceError::PersistenceFailure(_)));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_json_store_persists_state_and_swipes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePreferenceStore::new(dir.path().join("prefs"));

        assert!(store.load_preference_state("alice").await.unwrap().is_none());

        let mut state = UserPreferenceState::new("alice");
        state.weights.set(FeatureDimension::Energy, 2.4);
        state.hard_excluded_artists.insert("band".to_string());
        store.save_preference_state("alice", &state).await.unwrap();

        store.append_swipe("alice", &swipe("t1", SwipeDirection::Accept)).await.unwrap();
        store.append_swipe("alice", &swipe("t2", SwipeDirection::Reject)).await.unwrap();

        let loaded = store.load_preference_state("alice").await.unwrap().unwrap();
        assert_eq!(loaded.weights.get(FeatureDimension::Energy), 2.4);
        assert!(loaded.hard_excluded_artists.contains("band"));

        let swipes = store.read_swipes("alice").await.unwrap();
        assert_eq!(swipes.len(), 2);
        assert_eq!(swipes[1].direction, SwipeDirection::Reject);
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bob.json"), "{ not json").unwrap();
        let store = JsonFilePreferenceStore::new(dir.path());

        let err = store.load_preference_state("bob").await.unwrap_err();
        assert!(matches!(err, SourceError::PersistenceFailure(_)));
    }

    #[test]
    fn test_user_ids_cannot_escape_directory() {
        assert_eq!(file_stem("../../etc/passwd"), "______etc_passwd");
        assert_eq!(file_stem("user-1_a"), "user-1_a");
    }
}
