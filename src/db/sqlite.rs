// SqliteStore — rusqlite backend implementing the Store trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{Account, ContentItem, SyncAccount};
use super::queries;
use super::traits::Store;
use crate::settings::SettingsStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Write a runtime setting (used by `skybridge set`).
    pub async fn set_setting(&self, name: &str, value: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.conn.lock().await;
        queries::set_setting(&conn, name, &json)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_cached_account(&self, handle: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().await;
        queries::get_cached_account(&conn, handle)
    }

    async fn get_cached_content(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().await;
        queries::get_cached_item(&conn, id)
    }

    async fn update_account_cache(&self, account: &Account) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_cached_account(&conn, account)
    }

    async fn update_post_cache(&self, item: &ContentItem) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_cached_item(&conn, item)
    }

    async fn add_sync_account(&self, handle: &str, follower_count: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::add_sync_account(&conn, handle, follower_count)
    }

    async fn get_sync_account(&self, handle: &str) -> Result<Option<SyncAccount>> {
        let conn = self.conn.lock().await;
        queries::get_sync_account(&conn, handle)
    }

    async fn list_sync_accounts(&self) -> Result<Vec<SyncAccount>> {
        let conn = self.conn.lock().await;
        queries::list_sync_accounts(&conn)
    }

    async fn update_account_cursor(
        &self,
        handle: &str,
        last_item_id: Option<&str>,
        fetch_errors: u32,
        last_sync: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::update_account_cursor(&conn, handle, last_item_id, fetch_errors, last_sync)
    }

    async fn update_item_count(&self, handle: &str, item_count: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::update_item_count(&conn, handle, item_count)
    }

    async fn update_upstream_id(&self, handle: &str, upstream_id: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::update_upstream_id(&conn, handle, upstream_id)
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let raw = {
            let conn = self.conn.lock().await;
            queries::get_setting(&conn, name)?
        };
        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| format!("Setting {name} is not valid JSON"))
        })
        .transpose()
    }
}
