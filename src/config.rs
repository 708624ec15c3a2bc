use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::settings::{CrawlSettings, RouterSettings};

/// Default public syndication endpoint for single-item fallbacks.
pub const DEFAULT_SYNDICATION_URL: &str = "https://cdn.syndication.twimg.com";

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy. Operational knobs here
/// are only defaults: the runtime settings store overrides them per call.
pub struct Config {
    pub db_path: String,
    /// Primary API base URL. Required for anything that talks upstream.
    pub api_url: String,
    /// Bearer token for the primary API.
    pub api_token: Option<String>,
    /// Primary API budget: requests per window.
    pub api_requests_per_window: u32,
    pub api_window: Duration,
    /// Scraping proxy service. The scraping strategy is unavailable without it.
    pub scraper_url: Option<String>,
    /// Outbound proxy the scraping proxy backend is reached through.
    pub outbound_proxy: Option<String>,
    /// Fallback mirror pool when the `mirror_domains` setting is absent.
    pub mirror_domains: Vec<String>,
    pub syndication_url: String,
    pub crawl: CrawlSettings,
    pub router: RouterSettings,
    /// Pause between two full rounds of the crawl loop.
    pub round_interval: Duration,
    pub user_cache_capacity: u64,
    pub post_cache_capacity: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the API URL, which is checked by
    /// `require_api` before anything goes upstream.
    pub fn load() -> Result<Self> {
        let crawl_defaults = CrawlSettings::default();

        Ok(Self {
            db_path: env::var("SKYBRIDGE_DB_PATH").unwrap_or_else(|_| "./skybridge.db".to_string()),
            api_url: env::var("SKYBRIDGE_API_URL").unwrap_or_default(),
            api_token: non_empty("SKYBRIDGE_API_TOKEN"),
            api_requests_per_window: parse_or("SKYBRIDGE_API_REQUESTS_PER_WINDOW", 900)?,
            api_window: Duration::from_secs(parse_or("SKYBRIDGE_API_WINDOW_SECS", 900)?),
            scraper_url: non_empty("SKYBRIDGE_SCRAPER_URL"),
            outbound_proxy: non_empty("SKYBRIDGE_OUTBOUND_PROXY"),
            mirror_domains: env::var("SKYBRIDGE_MIRROR_DOMAINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            syndication_url: env::var("SKYBRIDGE_SYNDICATION_URL")
                .unwrap_or_else(|_| DEFAULT_SYNDICATION_URL.to_string()),
            crawl: CrawlSettings {
                max_concurrency: parse_or(
                    "SKYBRIDGE_MAX_CONCURRENCY",
                    crawl_defaults.max_concurrency,
                )?,
                batch_delay_ms: parse_or("SKYBRIDGE_BATCH_DELAY_MS", crawl_defaults.batch_delay_ms)?,
                jitter_ms: parse_or("SKYBRIDGE_JITTER_MS", crawl_defaults.jitter_ms)?,
            },
            router: RouterSettings::default(),
            round_interval: Duration::from_secs(parse_or("SKYBRIDGE_ROUND_INTERVAL_SECS", 300)?),
            user_cache_capacity: parse_or("SKYBRIDGE_USER_CACHE_CAPACITY", 10_000)?,
            post_cache_capacity: parse_or("SKYBRIDGE_POST_CACHE_CAPACITY", 100_000)?,
        })
    }

    /// Check that the primary API is configured.
    /// Call this before any operation that fetches upstream content.
    pub fn require_api(&self) -> Result<()> {
        if self.api_url.is_empty() {
            anyhow::bail!(
                "SKYBRIDGE_API_URL not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
