//! Engine configuration.
//!
//! One TOML document with a table per component. Every table is optional
//! and every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! [scoring.weights]
//! community = 0.35
//!
//! [diversity]
//! seed_artist_cap = 6
//!
//! [orchestrator]
//! prefetch_floor = 12
//! ```

use pipeline::{DiversityConfig, FusionConfig, LearnerConfig, ScoringConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

/// Queue, prefetch and I/O settings of the batch orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Stubs requested for the first batch of a session
    pub initial_page_size: usize,
    /// Stubs requested by each background prefetch
    pub page_size: usize,
    /// Lower bound of the prefetch trigger, in remaining items
    pub prefetch_floor: usize,
    /// Initial estimate of one fetch + enrich + score cycle
    pub latency_estimate_ms: u64,
    /// Timeout of one candidate provider call
    pub fetch_timeout_ms: u64,
    /// Timeout of one feature or tag source call
    pub source_timeout_ms: u64,
    /// Pause before the single retry of a failed provider call
    pub retry_backoff_ms: u64,
    /// Stubs enriched concurrently
    pub enrichment_concurrency: usize,
    /// Smoothing factor of the rate and latency averages
    pub ewma_alpha: f64,
    /// Extra provider pages tried when a page yields nothing servable
    pub max_refill_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            initial_page_size: 40,
            page_size: 30,
            prefetch_floor: 10,
            latency_estimate_ms: 400,
            fetch_timeout_ms: 3_000,
            source_timeout_ms: 800,
            retry_backoff_ms: 250,
            enrichment_concurrency: 8,
            ewma_alpha: 0.3,
            max_refill_rounds: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn latency_estimate(&self) -> Duration {
        Duration::from_millis(self.latency_estimate_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.initial_page_size > 0, "initial_page_size must be positive");
        anyhow::ensure!(self.page_size > 0, "page_size must be positive");
        anyhow::ensure!(self.fetch_timeout_ms > 0, "fetch_timeout_ms must be positive");
        anyhow::ensure!(self.source_timeout_ms > 0, "source_timeout_ms must be positive");
        anyhow::ensure!(self.enrichment_concurrency > 0, "enrichment_concurrency must be positive");
        anyhow::ensure!(
            self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0,
            "ewma_alpha must be in (0, 1]"
        );
        Ok(())
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fusion: FusionConfig,
    pub scoring: ScoringConfig,
    pub learner: LearnerConfig,
    pub diversity: DiversityConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading engine config from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fusion
            .validate()
            .and_then(|_| self.scoring.validate())
            .and_then(|_| self.learner.validate())
            .and_then(|_| self.diversity.validate())
            .and_then(|_| self.orchestrator.validate())
            .map_err(|e| ConfigError::Invalid(format!("{:#}", e)))
    }
}
