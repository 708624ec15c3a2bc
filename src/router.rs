// Strategy router — picks the acquisition backend for every fetch.
//
// Single lookups (accounts, items) become ordered fallback chains for the
// entity cache. Timeline deltas go through a decision table over the
// account's tier signals: follower count on the federated side, the
// upstream follower count, and whether the upstream item count moved since
// the last crawl. Thresholds are read from the settings store on every
// call.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::Fetcher;
use crate::db::models::{compare_ids, Account, ContentItem, SyncAccount};
use crate::error::FetchError;
use crate::metrics::Telemetry;
use crate::settings::{load_or, RouterSettings, SettingsStore, TierThresholds, ROUTER_SETTING};
use crate::sources::{Backend, Strategy, TimelineTarget, Upstream};

/// What the decision table looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSignals {
    /// The account could not be resolved to an upstream id; only the
    /// default strategy is safe.
    pub flagged_default: bool,
    /// Followers of the bridged account on the federated side.
    pub follower_count: u64,
    /// Followers on the upstream network, when known.
    pub upstream_followers: Option<u64>,
    /// The upstream item count differs from the one seen at the last crawl,
    /// or couldn't be probed.
    pub count_changed: bool,
}

/// Decision table, first match wins. Federated follower bands are
/// inclusive; the upstream follower count must be strictly above its
/// threshold.
pub fn select_strategy(signals: &TierSignals, t: &TierThresholds) -> Strategy {
    if signals.flagged_default {
        return Strategy::Default;
    }
    if signals.follower_count >= t.tier3 {
        return Strategy::WithReplies;
    }
    if signals.count_changed {
        if signals.follower_count >= t.tier2 {
            return Strategy::WithReplies;
        }
        if signals.follower_count >= t.tier1 {
            return Strategy::NoReplies;
        }
        if signals.follower_count >= t.tier0
            && signals
                .upstream_followers
                .is_some_and(|f| f > t.upstream_followers)
        {
            return Strategy::ScrapingProxy;
        }
    }
    Strategy::Default
}

/// Result of one delta fetch.
#[derive(Debug, Clone, Default)]
pub struct AccountDelta {
    /// The strategy that produced `items`. `None` when the fetch was skipped
    /// because nothing changed upstream.
    pub strategy: Option<Strategy>,
    /// Items newer than the cursor, deduplicated, newest first.
    pub items: Vec<ContentItem>,
    /// Upstream item count from the probe, to store with the cursor.
    pub item_count: Option<u64>,
}

impl AccountDelta {
    /// Source tag for telemetry.
    pub fn source(&self) -> &'static str {
        self.strategy.map(|s| s.as_str()).unwrap_or("skipped")
    }
}

pub struct StrategyRouter {
    upstream: Arc<dyn Upstream>,
    settings: Arc<dyn SettingsStore>,
    telemetry: Arc<dyn Telemetry>,
    defaults: RouterSettings,
}

impl StrategyRouter {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        settings: Arc<dyn SettingsStore>,
        telemetry: Arc<dyn Telemetry>,
        defaults: RouterSettings,
    ) -> Self {
        Self {
            upstream,
            settings,
            telemetry,
            defaults,
        }
    }

    pub async fn settings(&self) -> RouterSettings {
        load_or(self.settings.as_ref(), ROUTER_SETTING, self.defaults.clone()).await
    }

    /// Await `fut` and record its outcome class under `api`.
    async fn observed<T, F>(&self, api: String, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        let result = fut.await;
        let class = match &result {
            Ok(_) => "ok",
            Err(e) => e.class(),
        };
        self.telemetry.backend_call(&api, class);
        result
    }

    /// Live sources for an account lookup, cheapest first.
    pub fn account_fetchers<'a>(&'a self, handle: &'a str) -> Vec<Fetcher<'a, Account>> {
        [Backend::Api, Backend::Mirror, Backend::ScrapingProxy]
            .into_iter()
            .map(|backend| {
                Fetcher::new(
                    backend.as_str(),
                    self.observed(
                        format!("{backend}.user"),
                        self.upstream.fetch_user(backend, handle),
                    ),
                )
            })
            .collect()
    }

    /// Live sources for a single item: the primary API, then the public
    /// syndication endpoint.
    pub fn item_fetchers<'a>(&'a self, id: &'a str) -> Vec<Fetcher<'a, ContentItem>> {
        [Backend::Api, Backend::Syndication]
            .into_iter()
            .map(|backend| {
                Fetcher::new(
                    backend.as_str(),
                    self.observed(
                        format!("{backend}.item"),
                        self.upstream.fetch_item(backend, id),
                    ),
                )
            })
            .collect()
    }

    /// Fetch the items newer than `cursor.last_item_id`.
    ///
    /// `account` is the resolved account, or `None` when it couldn't be
    /// resolved this round, which pins the default strategy.
    pub async fn fetch_delta(
        &self,
        cursor: &SyncAccount,
        account: Option<&Account>,
    ) -> Result<AccountDelta, FetchError> {
        let settings = self.settings().await;
        let handle = cursor.handle.as_str();
        let flagged_default = account.is_none();

        let item_count = if flagged_default {
            None
        } else {
            match self
                .observed("api.probe".to_string(), self.upstream.probe_item_count(handle))
                .await
            {
                Ok(count) => count,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!(handle, error = %e, "Item count probe failed, assuming changed");
                    None
                }
            }
        };
        let count_changed = match (item_count, cursor.item_count) {
            (Some(now), Some(before)) => now != before,
            _ => true,
        };

        let signals = TierSignals {
            flagged_default,
            follower_count: cursor.follower_count,
            upstream_followers: account.map(|a| a.follower_count),
            count_changed,
        };
        let strategy = select_strategy(&signals, &settings.thresholds);

        if settings.skip_unchanged
            && !count_changed
            && cursor.follower_count < settings.thresholds.tier3
        {
            debug!(handle, "Upstream item count unchanged, skipping timeline fetch");
            return Ok(AccountDelta {
                strategy: None,
                items: Vec::new(),
                item_count,
            });
        }

        let target = TimelineTarget {
            handle,
            upstream_id: account.map(|a| a.upstream_id).or(cursor.upstream_id),
            since_id: cursor.last_item_id.as_deref(),
        };

        debug!(handle, strategy = %strategy, "Fetching timeline delta");
        let mut used = strategy;
        let mut result = self.timeline(strategy, &target).await;

        if let Err(e) = &result {
            if e.is_retryable() && strategy != Strategy::Default {
                warn!(handle, strategy = %strategy, error = %e, "Strategy failed, falling back to default");
                used = Strategy::Default;
                result = self.timeline(Strategy::Default, &target).await;
            }
        }

        if strategy != Strategy::Default {
            let cooldown = settings.cooldown();
            if !cooldown.is_zero() {
                debug!(handle, cooldown_ms = settings.cooldown_ms, "Cooling down after non-default strategy");
                tokio::time::sleep(cooldown).await;
            }
        }

        let items = newer_than(result?, target.since_id);
        if !items.is_empty() {
            info!(handle, strategy = %used, count = items.len(), "New items");
        }

        Ok(AccountDelta {
            strategy: Some(used),
            items,
            item_count,
        })
    }

    async fn timeline(
        &self,
        strategy: Strategy,
        target: &TimelineTarget<'_>,
    ) -> Result<Vec<ContentItem>, FetchError> {
        self.observed(
            format!("{}.timeline.{}", strategy.backend(), strategy),
            self.upstream.fetch_timeline(strategy, target),
        )
        .await
    }
}

/// Keep items strictly newer than `since`, drop duplicates, newest first.
pub fn newer_than(items: Vec<ContentItem>, since: Option<&str>) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    let mut fresh: Vec<ContentItem> = items
        .into_iter()
        .filter(|item| since.map_or(true, |since| compare_ids(item.cursor_id(), since).is_gt()))
        .filter(|item| seen.insert(item.cursor_id().to_string()))
        .collect();
    fresh.sort_by(|a, b| compare_ids(b.cursor_id(), a.cursor_id()));
    fresh
}
