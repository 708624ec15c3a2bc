// Batch crawl pipeline: one round over the working set of tracked accounts.
//
// Units (one per account) are launched in groups of at most
// `max_concurrency`, each after a random jitter. A full group is drained
// completely, then the pipeline pauses `batch_delay` before starting the
// next one, so arrivals at the backends stay smooth instead of bursty.
// Cancellation is observed between groups and during the pause; a running
// group always finishes so no cursor is left half-written.
//
// Every unit persists its own cursor. One account's failure is logged and
// counted against that account only.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::models::{canonical_handle, newest_id, ContentItem, SyncAccount};
use crate::db::traits::Store;
use crate::error::FetchError;
use crate::metrics::Telemetry;
use crate::random::RandomSource;
use crate::router::AccountDelta;
use crate::settings::{load_or, CrawlSettings, SettingsStore, CRAWL_SETTING};
use crate::sources::Strategy;

/// How often a paused pipeline re-reads its settings.
const PAUSE_RECHECK: Duration = Duration::from_secs(30);

/// Where a unit gets an account's new items from.
#[async_trait]
pub trait DeltaSource: Send + Sync {
    async fn account_delta(&self, cursor: &SyncAccount) -> Result<AccountDelta, FetchError>;
}

/// An account that yielded new items this round.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// The cursor as persisted after this round.
    pub account: SyncAccount,
    /// New items, newest first.
    pub items: Vec<ContentItem>,
    pub strategy: Option<Strategy>,
}

pub struct CrawlPipeline {
    source: Arc<dyn DeltaSource>,
    store: Arc<dyn Store>,
    settings: Arc<dyn SettingsStore>,
    defaults: CrawlSettings,
    random: Arc<dyn RandomSource>,
    telemetry: Arc<dyn Telemetry>,
}

impl CrawlPipeline {
    pub fn new(
        source: Arc<dyn DeltaSource>,
        store: Arc<dyn Store>,
        settings: Arc<dyn SettingsStore>,
        defaults: CrawlSettings,
        random: Arc<dyn RandomSource>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            defaults,
            random,
            telemetry,
        }
    }

    async fn crawl_settings(&self) -> CrawlSettings {
        load_or(self.settings.as_ref(), CRAWL_SETTING, self.defaults.clone()).await
    }

    /// Crawl `accounts` once. Returns the accounts that produced new items.
    ///
    /// With `max_concurrency` set to zero this blocks, re-reading the
    /// setting periodically, until it changes or `cancel` fires; nothing is
    /// crawled while paused.
    pub async fn crawl_batch(
        &self,
        accounts: &[SyncAccount],
        cancel: &CancellationToken,
    ) -> Vec<CrawlOutcome> {
        let mut settings = self.crawl_settings().await;
        while settings.max_concurrency == 0 {
            info!("Ingestion paused (max_concurrency = 0)");
            tokio::select! {
                _ = cancel.cancelled() => return Vec::new(),
                _ = tokio::time::sleep(PAUSE_RECHECK) => {}
            }
            settings = self.crawl_settings().await;
        }

        let unit = Unit {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            telemetry: Arc::clone(&self.telemetry),
            random: Arc::clone(&self.random),
            jitter_ms: settings.jitter_ms,
        };

        let mut scheduled = HashSet::new();
        let mut group: JoinSet<Option<CrawlOutcome>> = JoinSet::new();
        let mut outcomes = Vec::new();
        let mut crawled = 0usize;

        let mut pending = accounts.iter().peekable();
        while let Some(account) = pending.next() {
            if group.is_empty() && cancel.is_cancelled() {
                info!(crawled, "Crawl cancelled");
                break;
            }
            if !scheduled.insert(canonical_handle(&account.handle)) {
                debug!(handle = %account.handle, "Account listed twice, skipping");
                continue;
            }

            unit.jitter().await;
            group.spawn(unit.clone().crawl(account.clone()));
            crawled += 1;

            if group.len() >= settings.max_concurrency {
                drain(&mut group, &mut outcomes).await;
                if pending.peek().is_none() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(settings.batch_delay()) => {}
                }
            }
        }
        drain(&mut group, &mut outcomes).await;

        let items: usize = outcomes.iter().map(|o| o.items.len()).sum();
        info!(
            crawled,
            with_new_items = outcomes.len(),
            items,
            "Crawl batch complete"
        );
        outcomes
    }

    /// Crawl every tracked account, round after round, until `cancel` fires.
    /// Returns the number of completed rounds.
    pub async fn run(&self, round_interval: Duration, cancel: &CancellationToken) -> Result<u64> {
        let mut rounds = 0;
        while !cancel.is_cancelled() {
            let accounts = self
                .store
                .list_sync_accounts()
                .await
                .context("Failed to load tracked accounts")?;

            if accounts.is_empty() {
                info!("No tracked accounts yet");
            } else {
                self.crawl_batch(&accounts, cancel).await;
            }
            rounds += 1;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(round_interval) => {}
            }
        }
        Ok(rounds)
    }
}

/// Wait for every unit in the group and keep the ones with new items.
async fn drain(group: &mut JoinSet<Option<CrawlOutcome>>, outcomes: &mut Vec<CrawlOutcome>) {
    while let Some(joined) = group.join_next().await {
        match joined {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Crawl unit panicked"),
        }
    }
}

/// What one unit of work needs, cloned into each spawned task.
#[derive(Clone)]
struct Unit {
    source: Arc<dyn DeltaSource>,
    store: Arc<dyn Store>,
    telemetry: Arc<dyn Telemetry>,
    random: Arc<dyn RandomSource>,
    jitter_ms: u64,
}

impl Unit {
    async fn jitter(&self) {
        let ms = self.random.up_to(self.jitter_ms);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn crawl(self, mut account: SyncAccount) -> Option<CrawlOutcome> {
        let now = Utc::now();

        match self.source.account_delta(&account).await {
            Ok(delta) => {
                self.telemetry.crawl_result(delta.items.len(), delta.source());

                let newest = delta
                    .items
                    .iter()
                    .fold(account.last_item_id.as_deref(), |acc, item| {
                        newest_id(acc, Some(item.cursor_id()))
                    })
                    .map(str::to_string);
                account.last_item_id = newest;
                account.fetch_errors = 0;
                account.last_sync = Some(now);
                self.save_cursor(&account).await;

                if let Some(count) = delta.item_count {
                    account.item_count = Some(count);
                    if let Err(e) = self.store.update_item_count(&account.handle, count).await {
                        warn!(handle = %account.handle, error = %e, "Failed to persist item count");
                    }
                }

                if delta.items.is_empty() {
                    None
                } else {
                    Some(CrawlOutcome {
                        account,
                        items: delta.items,
                        strategy: delta.strategy,
                    })
                }
            }
            Err(e) => {
                self.telemetry.crawl_result(0, e.class());
                account.fetch_errors = account.fetch_errors.saturating_add(1);
                account.last_sync = Some(now);
                self.save_cursor(&account).await;

                if e.is_retryable() {
                    debug!(handle = %account.handle, error = %e, errors = account.fetch_errors, "Transient crawl failure");
                    self.jitter().await;
                } else {
                    warn!(handle = %account.handle, error = %e, errors = account.fetch_errors, "Crawl failed");
                }
                None
            }
        }
    }

    async fn save_cursor(&self, account: &SyncAccount) {
        let result = self
            .store
            .update_account_cursor(
                &account.handle,
                account.last_item_id.as_deref(),
                account.fetch_errors,
                account.last_sync.unwrap_or_else(Utc::now),
            )
            .await;
        if let Err(e) = result {
            warn!(handle = %account.handle, error = %e, "Failed to persist crawl cursor");
        }
    }
}
