// Runtime settings — operational knobs polled on every operation.
//
// Values live in a settings store (the SQLite `settings` table in
// production) as JSON, so thresholds, crawl throttles and mirror lists can
// be tuned without a redeploy. Every read falls back to the process
// defaults from `Config` when the setting is missing or malformed.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ROUTER_SETTING: &str = "router";
pub const CRAWL_SETTING: &str = "crawl";
pub const MIRROR_DOMAINS_SETTING: &str = "mirror_domains";

/// Source of runtime settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Fetch a setting by name. `None` when it has never been set.
    async fn get(&self, name: &str) -> Result<Option<serde_json::Value>>;
}

/// Read a typed setting, falling back to `default` on a miss, a read error
/// or a value that doesn't deserialize.
pub async fn load_or<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    name: &str,
    default: T,
) -> T {
    match store.get(name).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(setting = name, error = %e, "Malformed setting, using defaults");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!(setting = name, error = %e, "Failed to read setting, using defaults");
            default
        }
    }
}

/// Follower-count bands used by the strategy router, lowest first.
///
/// `tier0` gates the scraping proxy (own items), `tier1` the mirror without
/// replies, `tier2` the scraping proxy with replies when the item count
/// changed, and `tier3` marks very-high-tier accounts that always get the
/// richest strategy. `upstream_followers` must be exceeded for `tier0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub tier0: u64,
    pub tier1: u64,
    pub tier2: u64,
    pub tier3: u64,
    /// Upstream-network follower count an account also needs before the
    /// scraping proxy is used for it.
    pub upstream_followers: u64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            tier0: 10,
            tier1: 25,
            tier2: 50,
            tier3: 200,
            upstream_followers: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub thresholds: TierThresholds,
    /// Pause after any non-default strategy, in milliseconds.
    pub cooldown_ms: u64,
    /// Return an empty delta without a timeline fetch when the upstream item
    /// count is unchanged.
    pub skip_unchanged: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            cooldown_ms: 2_000,
            skip_unchanged: true,
        }
    }
}

impl RouterSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Units in flight per batch. Zero pauses ingestion.
    pub max_concurrency: usize,
    /// Pause after every full batch, in milliseconds.
    pub batch_delay_ms: u64,
    /// Upper bound of the random delay before each unit, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            batch_delay_ms: 5_000,
            jitter_ms: 1_000,
        }
    }
}

impl CrawlSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// In-memory settings, used by tests and when no database is configured.
#[derive(Default)]
pub struct StaticSettings {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: serde_json::Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&self, name: &str, value: serde_json::Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(name.to_string(), value);
        }
    }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn get(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let values = self
            .values
            .read()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        Ok(values.get(name).cloned())
    }
}
