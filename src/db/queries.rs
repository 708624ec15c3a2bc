// Database queries — CRUD operations for all tables.
//
// Every SQLite interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{canonical_handle, Account, ContentItem, SyncAccount};

/// Cached accounts older than this are treated as a miss so the live
/// backends get a chance to refresh them.
pub const ACCOUNT_MAX_AGE_HOURS: i64 = 48;

// --- Cached accounts ---

pub fn get_cached_account(conn: &Connection, handle: &str) -> Result<Option<Account>> {
    let mut stmt = conn.prepare(
        "SELECT account_json FROM cached_accounts
         WHERE handle = ?1 AND cached_at > datetime('now', ?2)",
    )?;
    let age = format!("-{ACCOUNT_MAX_AGE_HOURS} hours");
    let json: Option<String> = stmt
        .query_row(params![handle, age], |row| row.get(0))
        .optional()?;

    json.map(|j| serde_json::from_str(&j).context("Corrupt cached account JSON"))
        .transpose()
}

pub fn upsert_cached_account(conn: &Connection, account: &Account) -> Result<()> {
    let json = serde_json::to_string(account)?;
    conn.execute(
        "INSERT INTO cached_accounts (handle, account_json, cached_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(handle) DO UPDATE SET account_json = ?2, cached_at = datetime('now')",
        params![account.handle, json],
    )?;
    Ok(())
}

// --- Cached items ---

pub fn get_cached_item(conn: &Connection, id: &str) -> Result<Option<ContentItem>> {
    let mut stmt = conn.prepare("SELECT item_json FROM cached_items WHERE id = ?1")?;
    let json: Option<String> = stmt.query_row(params![id], |row| row.get(0)).optional()?;

    json.map(|j| serde_json::from_str(&j).context("Corrupt cached item JSON"))
        .transpose()
}

pub fn upsert_cached_item(conn: &Connection, item: &ContentItem) -> Result<()> {
    let json = serde_json::to_string(item)?;
    conn.execute(
        "INSERT INTO cached_items (id, author, item_json, cached_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET author = ?2, item_json = ?3, cached_at = datetime('now')",
        params![item.id, item.author, json],
    )?;
    Ok(())
}

// --- Sync accounts ---
//
// Handles are canonicalised on the way in so `Alice` and `alice` share a row.

pub fn add_sync_account(conn: &Connection, handle: &str, follower_count: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_accounts (handle, follower_count)
         VALUES (?1, ?2)
         ON CONFLICT(handle) DO UPDATE SET follower_count = ?2",
        params![canonical_handle(handle), follower_count as i64],
    )?;
    Ok(())
}

fn row_to_sync_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncAccount> {
    let last_sync: Option<String> = row.get(5)?;
    Ok(SyncAccount {
        handle: row.get(0)?,
        upstream_id: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
        follower_count: row.get::<_, i64>(2)? as u64,
        last_item_id: row.get(3)?,
        fetch_errors: row.get::<_, i64>(4)? as u32,
        last_sync: last_sync
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        item_count: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
    })
}

const SYNC_COLUMNS: &str =
    "handle, upstream_id, follower_count, last_item_id, fetch_errors, last_sync, item_count";

pub fn get_sync_account(conn: &Connection, handle: &str) -> Result<Option<SyncAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SYNC_COLUMNS} FROM sync_accounts WHERE handle = ?1"
    ))?;
    let account = stmt
        .query_row(params![canonical_handle(handle)], row_to_sync_account)
        .optional()?;
    Ok(account)
}

/// All tracked accounts, least recently synced first.
pub fn list_sync_accounts(conn: &Connection) -> Result<Vec<SyncAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SYNC_COLUMNS} FROM sync_accounts ORDER BY last_sync IS NOT NULL, last_sync ASC"
    ))?;
    let rows = stmt.query_map([], row_to_sync_account)?;
    let mut accounts = Vec::new();
    for row in rows {
        accounts.push(row?);
    }
    Ok(accounts)
}

pub fn update_account_cursor(
    conn: &Connection,
    handle: &str,
    last_item_id: Option<&str>,
    fetch_errors: u32,
    last_sync: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE sync_accounts SET last_item_id = ?2, fetch_errors = ?3, last_sync = ?4
         WHERE handle = ?1",
        params![
            canonical_handle(handle),
            last_item_id,
            fetch_errors as i64,
            last_sync.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn update_item_count(conn: &Connection, handle: &str, item_count: u64) -> Result<()> {
    conn.execute(
        "UPDATE sync_accounts SET item_count = ?2 WHERE handle = ?1",
        params![canonical_handle(handle), item_count as i64],
    )?;
    Ok(())
}

pub fn update_upstream_id(conn: &Connection, handle: &str, upstream_id: u64) -> Result<()> {
    conn.execute(
        "UPDATE sync_accounts SET upstream_id = ?2 WHERE handle = ?1",
        params![canonical_handle(handle), upstream_id as i64],
    )?;
    Ok(())
}

// --- Settings ---

pub fn get_setting(conn: &Connection, name: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value_json FROM settings WHERE name = ?1")?;
    let value = stmt.query_row(params![name], |row| row.get(0)).optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, name: &str, value_json: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (name, value_json, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(name) DO UPDATE SET value_json = ?2, updated_at = datetime('now')",
        params![name, value_json],
    )?;
    Ok(())
}
