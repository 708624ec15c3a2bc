// Backend cache decorator — the durable store layered in front of the live
// backends.
//
// A lookup runs one fallback chain through the entity cache: the durable
// store first, then each live source. A store miss is reported as
// `Unavailable` so the chain moves on. Whatever a live source returns is
// written back to the store; the entity cache keeps it in-process.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{CacheProfiles, EntityCache, Fetcher, Lookup};
use crate::db::models::{canonical_handle, Account, ContentItem};
use crate::db::traits::Store;
use crate::error::FetchError;

const STORE_SOURCE: &str = "store";

/// In-process account and item caches over one durable store.
pub struct ContentCache {
    accounts: EntityCache<Account>,
    items: EntityCache<ContentItem>,
    store: Arc<dyn Store>,
}

impl ContentCache {
    pub fn new(store: Arc<dyn Store>, account_capacity: u64, item_capacity: u64) -> Self {
        Self {
            accounts: EntityCache::new("accounts", account_capacity, CacheProfiles::accounts()),
            items: EntityCache::new("items", item_capacity, CacheProfiles::content()),
            store,
        }
    }

    pub fn accounts(&self) -> &EntityCache<Account> {
        &self.accounts
    }

    pub fn items(&self) -> &EntityCache<ContentItem> {
        &self.items
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Resolve an account: store, then `live` in order.
    pub async fn account<'a>(
        &'a self,
        handle: &str,
        live: Vec<Fetcher<'a, Account>>,
    ) -> Result<Lookup<Account>, FetchError> {
        let key = canonical_handle(handle);
        let store = self.store.as_ref();

        let mut chain = Vec::with_capacity(live.len() + 1);
        let lookup_key = key.clone();
        chain.push(Fetcher::new(STORE_SOURCE, async move {
            store_result(store.get_cached_account(&lookup_key).await, &lookup_key)
        }));
        chain.extend(live.into_iter().map(|fetcher| {
            write_back(fetcher, move |account: Account| async move {
                if let Err(e) = store.update_account_cache(&account).await {
                    warn!(handle = %account.handle, error = %e, "Failed to persist fetched account");
                }
                account
            })
        }));

        self.accounts.lookup(&key, chain).await
    }

    /// Resolve a content item: store, then `live` in order. `None` covers
    /// both an absent item and a chain with no source able to answer.
    pub async fn item<'a>(
        &'a self,
        id: &str,
        live: Vec<Fetcher<'a, ContentItem>>,
    ) -> Result<Option<Arc<ContentItem>>, FetchError> {
        let store = self.store.as_ref();

        let mut chain = Vec::with_capacity(live.len() + 1);
        let lookup_id = id.to_string();
        chain.push(Fetcher::new(STORE_SOURCE, async move {
            store_result(store.get_cached_content(&lookup_id).await, &lookup_id)
        }));
        chain.extend(live.into_iter().map(|fetcher| {
            write_back(fetcher, move |item: ContentItem| async move {
                if let Err(e) = store.update_post_cache(&item).await {
                    warn!(id = %item.id, error = %e, "Failed to persist fetched item");
                }
                item
            })
        }));

        self.items.get(id, chain).await
    }

    /// Seed the item cache and the store with items found incidentally,
    /// e.g. on a timeline page. Store failures are logged and skipped.
    pub async fn backfill_items(&self, items: &[ContentItem]) {
        for item in items {
            if let Err(e) = self.store.update_post_cache(item).await {
                warn!(id = %item.id, error = %e, "Failed to persist backfilled item");
            }
            self.items.backfill(&item.id, item.clone()).await;
        }
        if !items.is_empty() {
            debug!(count = items.len(), "Backfilled items");
        }
    }
}

/// A store hit is a value; a miss defers to the next source.
fn store_result<V>(result: anyhow::Result<Option<V>>, key: &str) -> Result<Option<V>, FetchError> {
    match result {
        Ok(Some(value)) => Ok(Some(value)),
        Ok(None) => Err(FetchError::Unavailable(STORE_SOURCE.to_string())),
        Err(e) => {
            warn!(key, error = %e, "Durable store read failed, falling through to live sources");
            Err(FetchError::Unavailable(STORE_SOURCE.to_string()))
        }
    }
}

/// Run `persist` on a live source's value before handing it to the cache.
fn write_back<'a, V, F, Fut>(fetcher: Fetcher<'a, V>, persist: F) -> Fetcher<'a, V>
where
    V: Send + 'a,
    F: FnOnce(V) -> Fut + Send + 'a,
    Fut: std::future::Future<Output = V> + Send + 'a,
{
    let name = fetcher.name();
    let fut = fetcher.fut;
    Fetcher::new(name, async move {
        match fut.await? {
            Some(value) => Ok(Some(persist(value).await)),
            None => Ok(None),
        }
    })
}
