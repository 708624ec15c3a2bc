// Bridge facade — the lookups the federation-facing layer calls.
//
// Ties the layered cache to the strategy router: account and item lookups
// run the router's fallback chains through the cache, and timeline deltas
// resolve the account first so the router has its tier signals.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::layered::ContentCache;
use crate::cache::Lookup;
use crate::db::models::{canonical_handle, Account, ContentItem, SyncAccount};
use crate::error::FetchError;
use crate::pipeline::crawl::DeltaSource;
use crate::router::{AccountDelta, StrategyRouter};

pub struct Bridge {
    cache: ContentCache,
    router: StrategyRouter,
}

impl Bridge {
    pub fn new(cache: ContentCache, router: StrategyRouter) -> Self {
        Self { cache, router }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    /// Resolve an account by handle.
    ///
    /// NotFound and Suspended come back as distinct errors. When no source
    /// could answer, the last retryable error (usually RateLimited) is
    /// returned.
    pub async fn get_account(&self, handle: &str) -> Result<Arc<Account>, FetchError> {
        let handle = canonical_handle(handle);
        let outcome = self
            .cache
            .account(&handle, self.router.account_fetchers(&handle))
            .await?;

        match outcome {
            Lookup::Found(account) => Ok(account),
            Lookup::NotFound => Err(FetchError::NotFound(handle)),
            Lookup::Suspended => Err(FetchError::Suspended(handle)),
        }
    }

    /// Look up one content item. `None` when it doesn't exist or no source
    /// could answer right now.
    pub async fn get_content_item(&self, id: &str) -> Result<Option<Arc<ContentItem>>, FetchError> {
        self.cache.item(id, self.router.item_fetchers(id)).await
    }

    /// New items for one tracked account since its cursor, newest first.
    pub async fn get_account_delta(&self, cursor: &SyncAccount) -> Result<Vec<ContentItem>, FetchError> {
        Ok(self.account_delta(cursor).await?.items)
    }
}

#[async_trait]
impl DeltaSource for Bridge {
    async fn account_delta(&self, cursor: &SyncAccount) -> Result<AccountDelta, FetchError> {
        let account = match self.get_account(&cursor.handle).await {
            Ok(account) => Some(account),
            Err(e) if e.is_retryable() => {
                debug!(handle = %cursor.handle, error = %e, "Account unresolved, pinning default strategy");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(account) = &account {
            if cursor.upstream_id != Some(account.upstream_id) {
                if let Err(e) = self
                    .cache
                    .store()
                    .update_upstream_id(&cursor.handle, account.upstream_id)
                    .await
                {
                    warn!(handle = %cursor.handle, error = %e, "Failed to record upstream id");
                }
            }
        }

        let delta = self.router.fetch_delta(cursor, account.as_deref()).await?;
        self.cache.backfill_items(&delta.items).await;
        Ok(delta)
    }
}
