use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skybridge::bridge::Bridge;
use skybridge::cache::layered::ContentCache;
use skybridge::config::Config;
use skybridge::db::models::{canonical_handle, ContentItem, SyncAccount};
use skybridge::db::{SqliteStore, Store};
use skybridge::error::FetchError;
use skybridge::metrics::{CountingTelemetry, Telemetry, TracingTelemetry};
use skybridge::pipeline::crawl::{CrawlPipeline, DeltaSource};
use skybridge::random::{RandomSource, ThreadRandom};
use skybridge::router::StrategyRouter;
use skybridge::settings::SettingsStore;
use skybridge::sources::api::ApiBackend;
use skybridge::sources::client::HttpClients;
use skybridge::sources::mirror::MirrorBackend;
use skybridge::sources::rate_limit::RateLimiter;
use skybridge::sources::scraper::ScraperBackend;
use skybridge::sources::syndication::SyndicationBackend;
use skybridge::sources::Backends;

/// Minimum spacing between two primary API calls.
const API_MIN_SPACING: Duration = Duration::from_millis(100);

/// Skybridge: mirror third-party social network accounts into the fediverse.
///
/// Fetches remote accounts and content through a chain of upstream
/// backends, caches them, and crawls tracked accounts for new items.
#[derive(Parser)]
#[command(name = "skybridge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Start tracking an account for crawling
    Track {
        /// The upstream handle (e.g. someone or @someone)
        handle: String,

        /// Followers of the bridged account on the federated side
        #[arg(long, default_value = "0")]
        followers: u64,
    },

    /// Look up one account
    User {
        handle: String,
    },

    /// Look up one content item
    Post {
        id: String,
    },

    /// Fetch an account's new items without advancing its cursor
    Delta {
        handle: String,
    },

    /// Crawl every tracked account
    Crawl {
        /// Run a single round and exit
        #[arg(long)]
        once: bool,
    },

    /// Store a runtime setting (e.g. `set crawl '{"max_concurrency": 0}'`)
    Set {
        /// Setting name: router, crawl or mirror_domains
        name: String,
        /// JSON value
        value: String,
    },

    /// Show system status (DB stats, tracked accounts, settings)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("skybridge=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing Skybridge database...");
            let config = Config::load()?;
            let db = skybridge::db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nSkybridge is ready. Next step: set up your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: skybridge track <handle>");
        }

        Commands::Track { handle, followers } => {
            let config = Config::load()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            let handle = canonical_handle(&handle);
            db.add_sync_account(&handle, followers).await?;
            println!("{} Tracking @{handle} ({followers} followers)", "✓".green());
        }

        Commands::User { handle } => {
            let config = Config::load()?;
            config.require_api()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            let bridge = build_bridge(&config, db, Arc::new(TracingTelemetry))?;

            match bridge.get_account(&handle).await {
                Ok(account) => {
                    println!("{} (@{})", account.display_name.bold(), account.handle);
                    println!("  Upstream id: {}", account.upstream_id);
                    println!("  Followers:   {}", account.follower_count);
                    if let Some(count) = account.item_count {
                        println!("  Items:       {count}");
                    }
                    if account.protected {
                        println!("  {}", "Protected account".yellow());
                    }
                    if !account.bio.is_empty() {
                        println!("\n  {}", account.bio);
                    }
                }
                Err(e) => print_fetch_error(&handle, &e),
            }
        }

        Commands::Post { id } => {
            let config = Config::load()?;
            config.require_api()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            let bridge = build_bridge(&config, db, Arc::new(TracingTelemetry))?;

            match bridge.get_content_item(&id).await? {
                Some(item) => print_item(&item),
                None => println!("{} No item {id} found (or no source could answer)", "-".dimmed()),
            }
        }

        Commands::Delta { handle } => {
            let config = Config::load()?;
            config.require_api()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            let handle = canonical_handle(&handle);
            let cursor = db
                .get_sync_account(&handle)
                .await?
                .unwrap_or_else(|| SyncAccount::new(&handle, 0));

            let telemetry = Arc::new(CountingTelemetry::new());
            let bridge = build_bridge(&config, db, telemetry.clone())?;

            match bridge.account_delta(&cursor).await {
                Ok(delta) => {
                    println!(
                        "{} new items for @{handle} via {}",
                        delta.items.len(),
                        delta.source().bold()
                    );
                    for item in &delta.items {
                        print_item(item);
                    }
                }
                Err(e) => print_fetch_error(&handle, &e),
            }

            println!("\n{}", "Backend calls:".dimmed());
            for (api, result, count) in telemetry.snapshot() {
                println!("  {api:<28} {result:<14} {count}");
            }
        }

        Commands::Crawl { once } => {
            let config = Config::load()?;
            config.require_api()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            let bridge = build_bridge(&config, db.clone(), Arc::new(TracingTelemetry))?;

            let pipeline = CrawlPipeline::new(
                bridge,
                db.clone(),
                db.clone(),
                config.crawl.clone(),
                Arc::new(ThreadRandom),
                Arc::new(TracingTelemetry),
            );

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("\n{}", "Stopping after the current batch...".yellow());
                    on_signal.cancel();
                }
            });

            if once {
                let accounts = db.list_sync_accounts().await?;
                println!("Crawling {} tracked accounts...", accounts.len());
                let outcomes = pipeline.crawl_batch(&accounts, &cancel).await;
                for outcome in &outcomes {
                    println!(
                        "  {} @{}: {} new items ({})",
                        "✓".green(),
                        outcome.account.handle,
                        outcome.items.len(),
                        outcome.strategy.map(|s| s.as_str()).unwrap_or("-"),
                    );
                }
                println!(
                    "\n{}",
                    format!("{} accounts with new items.", outcomes.len()).bold()
                );
            } else {
                println!(
                    "Crawling continuously every {}s (Ctrl-C to stop)...",
                    config.round_interval.as_secs()
                );
                let rounds = pipeline.run(config.round_interval, &cancel).await?;
                println!("Stopped after {rounds} rounds.");
            }
        }

        Commands::Set { name, value } => {
            let config = Config::load()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            let parsed: serde_json::Value = serde_json::from_str(&value)
                .with_context(|| format!("Setting {name} is not valid JSON: {value}"))?;
            db.set_setting(&name, &parsed).await?;
            println!("{} {name} = {parsed}", "✓".green());
        }

        Commands::Status => {
            let config = Config::load()?;
            let db = skybridge::db::open_sqlite(&config.db_path)?;
            skybridge::status::show(
                &*db,
                &*db,
                &config.db_path,
                config.crawl.clone(),
                config.router.clone(),
            )
            .await?;
        }
    }

    Ok(())
}

/// Wire the live backends, the router and the layered cache together.
fn build_bridge(
    config: &Config,
    db: Arc<SqliteStore>,
    telemetry: Arc<dyn Telemetry>,
) -> Result<Arc<Bridge>> {
    let clients = HttpClients::new(config.outbound_proxy.as_deref())?;
    let settings: Arc<dyn SettingsStore> = db.clone();
    let random: Arc<dyn RandomSource> = Arc::new(ThreadRandom);

    let limiter = Arc::new(RateLimiter::new(
        config.api_requests_per_window,
        config.api_window,
        API_MIN_SPACING,
    ));
    let api = ApiBackend::new(&clients, &config.api_url, config.api_token.clone(), limiter);
    let scraper = match config.scraper_url.as_deref() {
        Some(url) => Some(ScraperBackend::new(&clients, url)),
        None => {
            warn!("SKYBRIDGE_SCRAPER_URL not set, scraping proxy strategy disabled");
            None
        }
    };
    let mirror = MirrorBackend::new(
        &clients,
        config.mirror_domains.clone(),
        settings.clone(),
        random,
    );
    let syndication = SyndicationBackend::new(&clients, &config.syndication_url);

    let upstream = Backends::new(api, scraper, mirror, syndication);
    let router = StrategyRouter::new(upstream, settings, telemetry, config.router.clone());
    let cache = ContentCache::new(db, config.user_cache_capacity, config.post_cache_capacity);

    Ok(Arc::new(Bridge::new(cache, router)))
}

fn print_fetch_error(key: &str, err: &FetchError) {
    match err {
        FetchError::NotFound(_) => println!("{} {key} not found upstream", "-".dimmed()),
        FetchError::Suspended(_) => println!("{} {key} is suspended upstream", "Warning:".yellow()),
        e if e.is_retryable() => {
            println!("{} no source could answer for {key}: {e}", "Warning:".yellow())
        }
        e => println!("{} {e}", "Error:".red()),
    }
}

fn print_item(item: &ContentItem) {
    let header = match &item.original_author {
        Some(original) => format!("{} (reshared from @{original})", item.id),
        None => item.id.clone(),
    };
    println!(
        "\n{} @{} {}",
        header.bold(),
        item.author,
        item.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
    );
    if let Some(parent) = &item.in_reply_to {
        println!("  {}", format!("in reply to {}", parent.id).dimmed());
    }
    println!("  {}", item.body);
    for media in &item.media {
        println!("  [{}] {}", media.mime_type, media.url);
    }
    if let Some(poll) = &item.poll {
        for option in &poll.options {
            println!("  ▢ {} ({})", option.label, option.count);
        }
    }
}
