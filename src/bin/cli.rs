//! Generator CLI
//!
//! Local and scheduled execution entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use generator::{
    error::{AppError, Result},
    models::{Config, Seed},
    pipeline::{self, BuildEnqueuer, Generator},
    platforms::{PlatformDeps, PlatformRegistry},
    queue::{BuildQueue, MemoryQueue, Notifier},
    storage::{CacheService, Database, SeedStore},
    utils::http,
};

/// Server artifact generator
#[derive(Parser, Debug)]
#[command(
    name = "generator",
    version,
    about = "Polls game-server publishers and enqueues builds for new versions"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape every active source and enqueue builds for changed versions
    Run {
        /// Use an in-memory queue and print the messages instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Only run the source with this slug
        #[arg(long)]
        source: Option<String>,

        /// Skip the pruning pass
        #[arg(long)]
        skip_prune: bool,
    },

    /// Deactivate packages not seen within the pruning threshold
    Prune,

    /// Load games and sources into the database
    Seed {
        /// Seed file (default: paths.sources_file from the config)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List configured sources
    Sources,

    /// Validate configuration and seed files
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

type Transports = (Option<Arc<dyn BuildQueue>>, Option<Arc<dyn Notifier>>);

/// Queue and notifier for a run, plus the memory queue of a dry run so its
/// messages can be printed afterwards.
async fn transports(config: &Config, dry_run: bool) -> (Transports, Option<Arc<MemoryQueue>>) {
    if dry_run {
        let memory = Arc::new(MemoryQueue::new());
        let queue: Arc<dyn BuildQueue> = memory.clone();
        return ((Some(queue), None), Some(memory));
    }
    (remote_transports(config).await, None)
}

#[cfg(feature = "aws")]
async fn remote_transports(config: &Config) -> Transports {
    use generator::queue::{SnsNotifier, SqsQueue};

    let queue = match &config.queue.url {
        Some(url) => Some(Arc::new(SqsQueue::from_env(url.clone()).await) as Arc<dyn BuildQueue>),
        None => None,
    };
    let notifier = match &config.notifications.topic {
        Some(topic) => {
            Some(Arc::new(SnsNotifier::from_env(topic.clone()).await) as Arc<dyn Notifier>)
        }
        None => None,
    };
    (queue, notifier)
}

#[cfg(not(feature = "aws"))]
async fn remote_transports(config: &Config) -> Transports {
    if config.queue.url.is_some() || config.notifications.topic.is_some() {
        log::warn!("Built without the `aws` feature; queue and topic settings are ignored");
    }
    (None, None)
}

fn platform_deps(config: &Config, db: &Database) -> Result<PlatformDeps> {
    let store = Arc::new(db.clone());
    Ok(PlatformDeps {
        client: http::create_async_client(&config.crawler)?,
        cache: CacheService::new(store.clone()),
        store,
        seeds: SeedStore::new(&config.paths.seed_dir),
        concurrency: config.crawler.max_concurrent,
        request_delay: Duration::from_millis(config.crawler.request_delay_ms),
    })
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("Generator starting...");

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env();
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run {
            dry_run,
            source,
            skip_prune,
        } => {
            config.validate()?;
            let db = Database::connect(&config.database).await?;
            let ((queue, notifier), memory) = transports(&config, dry_run).await;
            let enqueuer = BuildEnqueuer::new(queue, notifier, &config.resolve);
            let generator = Generator::new(
                platform_deps(&config, &db)?,
                PlatformRegistry::default(),
                enqueuer,
                config.pruning.clone(),
            );

            let report = generator.run(source.as_deref(), skip_prune).await?;

            if let Some(memory) = memory {
                let messages = memory.messages().await;
                log::info!("Dry run: {} build messages", messages.len());
                println!("{}", serde_json::to_string_pretty(&messages)?);
            }
            log::info!("Report: {}", serde_json::to_string(&report)?);
        }

        Command::Prune => {
            config.validate()?;
            let db = Database::connect(&config.database).await?;
            let count = pipeline::prune(&db, config.pruning.threshold_secs, Utc::now()).await?;
            log::info!("Pruned {} packages", count);
        }

        Command::Seed { file } => {
            let path = file.unwrap_or_else(|| config.paths.sources_file.clone());
            let seed = Seed::load(&path)?;
            seed.validate()?;

            let db = Database::connect(&config.database).await?;
            let report = db.seed(&seed).await?;
            log::info!(
                "Seeded {} games, {} sources and {} config entries from {}",
                report.games,
                report.sources,
                report.config_entries,
                path.display()
            );
        }

        Command::Sources => {
            let db = Database::connect(&config.database).await?;
            let registry = PlatformRegistry::default();
            let sources = db.list_sources().await?;
            if sources.is_empty() {
                log::info!("No sources configured. Run 'seed' first.");
            }
            for source in sources {
                let adapter = if registry.contains(&source.platform) {
                    ""
                } else {
                    " (no adapter)"
                };
                println!(
                    "{:<16} {:<14} {:<4} {:<8} {}{}",
                    source.slug,
                    source.platform,
                    source.package_type,
                    if source.active { "active" } else { "inactive" },
                    source.url,
                    adapter
                );
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");

            let path = &config.paths.sources_file;
            if path.exists() {
                let seed = Seed::load(path)?;
                seed.validate()?;

                let registry = PlatformRegistry::default();
                let unknown: Vec<_> = seed
                    .sources
                    .iter()
                    .filter(|s| !registry.contains(&s.platform))
                    .map(|s| format!("{} ({})", s.slug, s.platform))
                    .collect();
                if !unknown.is_empty() {
                    return Err(AppError::validation(format!(
                        "Sources with unknown platforms: {}; known platforms are {}",
                        unknown.join(", "),
                        registry.names().join(", ")
                    )));
                }
                log::info!("✓ Seed OK ({} sources)", seed.sources.len());
            } else {
                log::warn!("Seed file {} not found", path.display());
            }

            log::info!("All validations passed!");
        }
    }

    log::info!("Done!");

    Ok(())
}
