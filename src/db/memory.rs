// MemoryStore — in-process Store used by tests and by builds without the `sqlite` feature.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::models::{canonical_handle, Account, ContentItem, SyncAccount};
use super::traits::Store;

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    items: HashMap<String, ContentItem>,
    sync: HashMap<String, SyncAccount>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn table_count(&self) -> Result<i64> {
        Ok(3)
    }

    async fn get_cached_account(&self, handle: &str) -> Result<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(handle).cloned())
    }

    async fn get_cached_content(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(self.tables.lock().await.items.get(id).cloned())
    }

    async fn update_account_cache(&self, account: &Account) -> Result<()> {
        self.tables
            .lock()
            .await
            .accounts
            .insert(account.handle.clone(), account.clone());
        Ok(())
    }

    async fn update_post_cache(&self, item: &ContentItem) -> Result<()> {
        self.tables
            .lock()
            .await
            .items
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn add_sync_account(&self, handle: &str, follower_count: u64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .sync
            .entry(canonical_handle(handle))
            .and_modify(|a| a.follower_count = follower_count)
            .or_insert_with(|| SyncAccount::new(handle, follower_count));
        Ok(())
    }

    async fn get_sync_account(&self, handle: &str) -> Result<Option<SyncAccount>> {
        Ok(self.tables.lock().await.sync.get(&canonical_handle(handle)).cloned())
    }

    async fn list_sync_accounts(&self) -> Result<Vec<SyncAccount>> {
        let mut accounts: Vec<_> = self.tables.lock().await.sync.values().cloned().collect();
        accounts.sort_by(|a, b| a.last_sync.cmp(&b.last_sync).then(a.handle.cmp(&b.handle)));
        Ok(accounts)
    }

    async fn update_account_cursor(
        &self,
        handle: &str,
        last_item_id: Option<&str>,
        fetch_errors: u32,
        last_sync: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(account) = self.tables.lock().await.sync.get_mut(&canonical_handle(handle)) {
            account.last_item_id = last_item_id.map(str::to_string);
            account.fetch_errors = fetch_errors;
            account.last_sync = Some(last_sync);
        }
        Ok(())
    }

    async fn update_item_count(&self, handle: &str, item_count: u64) -> Result<()> {
        if let Some(account) = self.tables.lock().await.sync.get_mut(&canonical_handle(handle)) {
            account.item_count = Some(item_count);
        }
        Ok(())
    }

    async fn update_upstream_id(&self, handle: &str, upstream_id: u64) -> Result<()> {
        if let Some(account) = self.tables.lock().await.sync.get_mut(&canonical_handle(handle)) {
            account.upstream_id = Some(upstream_id);
        }
        Ok(())
    }
}
