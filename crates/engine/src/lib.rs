//! # Engine Crate
//!
//! Session-level coordination of the recommendation pipeline.
//!
//! ## Components
//! - `RecommendationService`: per-user sessions, preference persistence
//! - `BatchOrchestrator`: one session's queue, background prefetch and
//!   the fetch, enrich, score, diversify cycle
//! - `EngineConfig`: TOML configuration for every component
//!
//! ## Example Usage
//! ```ignore
//! let config = EngineConfig::load(Path::new("config/engine.toml"))?;
//! let service = RecommendationService::new(config, collaborators);
//!
//! let batch = service.request_next_batch("trk-001", "user-1").await?;
//! match service.next("user-1").await? {
//!     NextItem::Ready(track) => println!("{}", track.candidate.title),
//!     NextItem::Pending => { service.wait_for_update("user-1", timeout).await?; }
//!     NextItem::Exhausted(reason) => println!("done: {}", reason),
//! }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use config::{EngineConfig, OrchestratorConfig};
pub use error::{ConfigError, EngineError, Result};
pub use orchestrator::{
    BatchOrchestrator, ExhaustionReason, NextItem, OrchestratorParts, OrchestratorState,
    RecommendationBatch, SwipeResult,
};
pub use session::{Collaborators, RecommendationService, Session};
