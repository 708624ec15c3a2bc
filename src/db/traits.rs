// Durable store trait — backend-agnostic async interface for account
// cursors and cached upstream entities.
//
// Implementors: SqliteStore (wraps rusqlite), MemoryStore (tests).
// All methods are async so a sync backend (rusqlite behind a Mutex) and any
// future native-async backend fit behind a single interface.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{Account, ContentItem, SyncAccount};

#[async_trait]
pub trait Store: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the store.
    async fn table_count(&self) -> Result<i64>;

    // --- Cached upstream entities ---

    /// Previously fetched account, if present and not stale.
    async fn get_cached_account(&self, handle: &str) -> Result<Option<Account>>;

    /// Previously fetched content item, if present.
    async fn get_cached_content(&self, id: &str) -> Result<Option<ContentItem>>;

    /// Save or replace a fetched account.
    async fn update_account_cache(&self, account: &Account) -> Result<()>;

    /// Save or replace a fetched content item.
    async fn update_post_cache(&self, item: &ContentItem) -> Result<()>;

    // --- Crawl cursors ---

    /// Start tracking an account (no-op on the cursor if already tracked,
    /// the follower count is refreshed).
    async fn add_sync_account(&self, handle: &str, follower_count: u64) -> Result<()>;

    async fn get_sync_account(&self, handle: &str) -> Result<Option<SyncAccount>>;

    /// The working set for one crawl round.
    async fn list_sync_accounts(&self) -> Result<Vec<SyncAccount>>;

    /// Persist crawl progress for one account.
    async fn update_account_cursor(
        &self,
        handle: &str,
        last_item_id: Option<&str>,
        fetch_errors: u32,
        last_sync: DateTime<Utc>,
    ) -> Result<()>;

    /// Persist the upstream-reported item count seen at the last crawl.
    async fn update_item_count(&self, handle: &str, item_count: u64) -> Result<()>;

    /// Record the upstream numeric id once it has been resolved.
    async fn update_upstream_id(&self, handle: &str, upstream_id: u64) -> Result<()>;
}
