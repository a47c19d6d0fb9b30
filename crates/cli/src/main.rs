use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog::{FeatureDimension, SwipeDirection, SwipeEvent, TrackCandidate, TrackCatalog};
use engine::{Collaborators, EngineConfig, NextItem, RecommendationService};
use pipeline::{FeatureFusionEngine, PreferenceSnapshot, ScoredTrack, SimilarityScorer};
use sources::{
    CatalogCandidateProvider, CatalogFeatureSource, CatalogTagSource, Enricher,
    JsonFilePreferenceStore,
};

/// swipe-recs - Seed-track music recommendations
#[derive(Parser)]
#[command(name = "swipe-recs")]
#[command(about = "Seed-based music recommendations that learn from swipes", long_about = None)]
struct Cli {
    /// Path to the JSON track catalog
    #[arg(short, long, default_value = "data/catalog.json")]
    catalog: PathBuf,

    /// Optional TOML engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory where preference state and swipe logs are kept
    #[arg(long, default_value = "data/prefs")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the first batch of recommendations for a seed track
    Recommend {
        /// Seed track id
        #[arg(long)]
        seed: String,

        /// User whose preferences apply
        #[arg(long, default_value = "cli-user")]
        user: String,

        /// Number of tracks to print
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Show the score breakdown of each track
        #[arg(long)]
        explain: bool,
    },

    /// Explain how one candidate scores against a seed
    Explain {
        /// Seed track id
        #[arg(long)]
        seed: String,

        /// Candidate track id
        #[arg(long)]
        candidate: String,
    },

    /// Swipe through a session automatically and watch the weights adapt
    Simulate {
        /// Seed track id
        #[arg(long)]
        seed: String,

        /// User whose preferences are learned
        #[arg(long, default_value = "sim-user")]
        user: String,

        /// Number of swipes to make
        #[arg(long, default_value = "50")]
        swipes: usize,

        /// Accept tracks whose energy is at least this value
        #[arg(long, default_value = "0.6")]
        energy_threshold: f64,

        /// Swipe at random with this RNG seed instead of by energy
        #[arg(long)]
        seed_rng: Option<u64>,
    },

    /// Search the catalog by title or artist
    Search {
        /// Case-insensitive substring to look for
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    println!("Loading catalog from {}...", cli.catalog.display());
    let start = Instant::now();
    let catalog = Arc::new(
        TrackCatalog::load_from_file(&cli.catalog).context("Failed to load track catalog")?,
    );
    println!(
        "{} Loaded {} tracks in {:?}",
        "✓".green(),
        catalog.len(),
        start.elapsed()
    );

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).context("Failed to load engine config")?,
        None => EngineConfig::default(),
    };

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Recommend {
            seed,
            user,
            limit,
            explain,
        } => {
            let service = build_service(catalog, config, &cli.state_dir);
            handle_recommend(&service, &seed, &user, limit, explain).await?
        }
        Commands::Explain { seed, candidate } => {
            handle_explain(catalog, config, &seed, &candidate).await?
        }
        Commands::Simulate {
            seed,
            user,
            swipes,
            energy_threshold,
            seed_rng,
        } => {
            let service = build_service(catalog, config, &cli.state_dir);
            let policy = match seed_rng {
                Some(rng_seed) => SwipePolicy::Random(StdRng::seed_from_u64(rng_seed)),
                None => SwipePolicy::Energy(energy_threshold),
            };
            handle_simulate(&service, &seed, &user, swipes, policy).await?
        }
        Commands::Search { query } => handle_search(&catalog, &query),
    }

    Ok(())
}

fn build_service(
    catalog: Arc<TrackCatalog>,
    config: EngineConfig,
    state_dir: &Path,
) -> RecommendationService {
    let collaborators = Collaborators {
        provider: Arc::new(CatalogCandidateProvider::new(catalog.clone())),
        feature_sources: CatalogFeatureSource::all(catalog.clone(), &config.fusion.reliability),
        tag_sources: vec![Arc::new(CatalogTagSource::new(catalog))],
        store: Arc::new(JsonFilePreferenceStore::new(state_dir)),
    };
    RecommendationService::new(config, collaborators)
}

/// Handle the 'recommend' command
async fn handle_recommend(
    service: &RecommendationService,
    seed: &str,
    user: &str,
    limit: usize,
    explain: bool,
) -> Result<()> {
    let batch = service.request_next_batch(seed, user).await?;
    let session = service.session(user).await?;
    let seed_track = session.seed();

    println!(
        "{}",
        format!("Because you like '{}' by {}:", seed_track.title, seed_track.artist)
            .bold()
            .blue()
    );
    if batch.is_empty() {
        println!("  {} ({:?})", "No recommendations".yellow(), batch.state);
    }
    print_tracks(&batch.tracks[..batch.tracks.len().min(limit)], explain);

    service.end_session(user).await?;
    Ok(())
}

/// Handle the 'explain' command
async fn handle_explain(
    catalog: Arc<TrackCatalog>,
    config: EngineConfig,
    seed_id: &str,
    candidate_id: &str,
) -> Result<()> {
    let enricher = Enricher::new(FeatureFusionEngine::new(config.fusion.clone()))
        .with_feature_sources(CatalogFeatureSource::all(catalog.clone(), &config.fusion.reliability))
        .with_tag_source(Arc::new(CatalogTagSource::new(catalog.clone())));

    let seed_stub = catalog
        .stub(seed_id)
        .ok_or_else(|| anyhow!("Track {} not found", seed_id))?;
    let mut candidate_stub = catalog
        .stub(candidate_id)
        .ok_or_else(|| anyhow!("Track {} not found", candidate_id))?;
    if let Some(entry) = catalog.similar_to(seed_id).iter().find(|s| s.id == candidate_id) {
        candidate_stub = candidate_stub.with_community_score(entry.score);
    }

    let (seed, candidate) = tokio::join!(enricher.enrich(seed_stub), enricher.enrich(candidate_stub));
    let scorer = SimilarityScorer::new(config.scoring);
    let breakdown = scorer.score(&seed, &candidate, &PreferenceSnapshot::initial().weights);

    println!(
        "{}",
        format!(
            "'{}' by {}  ->  '{}' by {}",
            seed.title, seed.artist, candidate.title, candidate.artist
        )
        .bold()
        .blue()
    );
    println!("{}", "Features (seed / candidate):".bold());
    for dim in FeatureDimension::ALL {
        println!(
            "  {:<18} {:>6.3} / {:>6.3}{}",
            dim.name(),
            seed.features.get(dim),
            candidate.features.get(dim),
            provenance_note(&candidate, dim)
        );
    }
    println!("{}", "Components:".bold());
    println!("{}Weighted cosine:     {:.3}", "• ".green(), breakdown.cosine);
    println!("{}Weighted euclidean:  {:.3}", "• ".green(), breakdown.euclidean);
    println!("{}Weighted manhattan:  {:.3}", "• ".green(), breakdown.manhattan);
    println!("{}Tag overlap:         {:.3}", "• ".cyan(), breakdown.tags);
    println!("{}Community affinity:  {:.3}", "• ".cyan(), breakdown.community);
    println!("{}Era proximity:       {:.3}", "• ".cyan(), breakdown.temporal);
    println!("{}Popularity fit:      {:.3}", "• ".cyan(), breakdown.popularity);
    println!("{} {:.3}", "Total:".bold(), breakdown.total);
    println!("  {}", breakdown.explain().dimmed());
    Ok(())
}

fn provenance_note(candidate: &TrackCandidate, dim: FeatureDimension) -> String {
    match candidate.features.provenance(dim) {
        0 => "  (no data)".dimmed().to_string(),
        n => format!("  ({} sources)", n).dimmed().to_string(),
    }
}

/// How the simulator decides each swipe
enum SwipePolicy {
    Energy(f64),
    Random(StdRng),
}

impl SwipePolicy {
    fn decide(&mut self, candidate: &TrackCandidate) -> SwipeDirection {
        let accept = match self {
            SwipePolicy::Energy(threshold) => {
                candidate.features.get(FeatureDimension::Energy) >= *threshold
            }
            SwipePolicy::Random(rng) => rng.random_bool(0.5),
        };
        if accept {
            SwipeDirection::Accept
        } else {
            SwipeDirection::Reject
        }
    }
}

/// Handle the 'simulate' command
async fn handle_simulate(
    service: &RecommendationService,
    seed: &str,
    user: &str,
    swipes: usize,
    mut policy: SwipePolicy,
) -> Result<()> {
    let batch = service.request_next_batch(seed, user).await?;
    println!(
        "{} Session started with {} queued tracks",
        "✓".green(),
        batch.tracks.len()
    );

    let mut made = 0;
    while made < swipes {
        match service.next(user).await? {
            NextItem::Ready(track) => {
                let direction = policy.decide(&track.candidate);
                let marker = match direction {
                    SwipeDirection::Accept => "♥".green(),
                    SwipeDirection::Reject => "✗".red(),
                };
                println!(
                    "{:>3}. {} {} - {} [{:.3}]",
                    made + 1,
                    marker,
                    track.candidate.title,
                    track.candidate.artist,
                    track.score()
                );

                let event = SwipeEvent::from_candidate(&track.candidate, direction, made as i64);
                let result = service.record_swipe(user, event).await?;
                if let Some(artist) = &result.outcome.newly_excluded_artist {
                    println!("     {} {}", "excluded artist".red().bold(), artist);
                }
                if let Some(snapshot) = &result.recomputed {
                    print_snapshot(snapshot);
                }
                made += 1;
            }
            NextItem::Pending => {
                service.wait_for_update(user, Duration::from_secs(5)).await?;
            }
            NextItem::Exhausted(reason) => {
                println!("{} {}", "Session exhausted:".yellow(), reason);
                break;
            }
        }
    }

    let session = service.session(user).await?;
    println!("{}", "Final preferences:".bold().blue());
    print_snapshot(&session.preferences());
    service.end_session(user).await?;
    Ok(())
}

fn print_snapshot(snapshot: &PreferenceSnapshot) {
    println!(
        "     {} v{} phase {:?}",
        "recompute".cyan().bold(),
        snapshot.version,
        snapshot.phase
    );
    let weights = FeatureDimension::ALL
        .iter()
        .map(|dim| format!("{} {:.2}", dim.name(), snapshot.weights.get(*dim)))
        .collect::<Vec<_>>()
        .join(", ");
    println!("     weights: {}", weights);
    if !snapshot.preferred_tags.is_empty() {
        let tags: Vec<&str> = snapshot.preferred_tags.iter().map(String::as_str).collect();
        println!("     tags: {}", tags.join(", "));
    }
    if !snapshot.hard_excluded_artists.is_empty() {
        let mut artists: Vec<&str> = snapshot
            .hard_excluded_artists
            .iter()
            .map(String::as_str)
            .collect();
        artists.sort_unstable();
        println!("     excluded artists: {}", artists.join(", "));
    }
}

/// Handle the 'search' command
fn handle_search(catalog: &TrackCatalog, query: &str) {
    let matches = catalog.search(query);
    println!("{}", format!("Search results for '{}':", query).bold().blue());
    if matches.is_empty() {
        println!("  {}", "No matches".yellow());
    }
    for track in matches.iter().take(20) {
        let tags = track.tags.join(", ");
        println!(
            "{}: {} - {} ({}) [{}] sources: {}",
            track.id.green(),
            track.title,
            track.artist,
            track.year.map(|y| y.to_string()).unwrap_or_else(|| "????".to_string()),
            tags,
            track.source_ids().collect::<Vec<_>>().join(", ")
        );
    }
}

/// Print a ranked list of tracks
fn print_tracks(tracks: &[ScoredTrack], explain: bool) {
    for (i, track) in tracks.iter().enumerate() {
        let candidate = &track.candidate;
        let tags = candidate.tags.iter().cloned().collect::<Vec<_>>().join(", ");
        println!(
            "{}. {} - {} ({}) [{}] - Score: {:.3}",
            (i + 1).to_string().green(),
            candidate.title,
            candidate.artist,
            candidate.release_year.unwrap_or(0),
            tags,
            track.score()
        );
        if explain {
            println!("   {}", track.breakdown.explain());
        }
    }
}
