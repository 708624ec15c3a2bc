// Database schema — table creation and migrations.
//
// A `schema_version` table tracks which migrations have run. Cached
// entities are stored as JSON so their shape can evolve without migrations.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent; runs on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Tracked accounts and their crawl cursors
        CREATE TABLE IF NOT EXISTS sync_accounts (
            handle TEXT PRIMARY KEY,           -- canonical, lower-cased
            upstream_id INTEGER,               -- null until resolved
            follower_count INTEGER NOT NULL DEFAULT 0,
            last_item_id TEXT,
            fetch_errors INTEGER NOT NULL DEFAULT 0,
            last_sync TEXT,                    -- RFC 3339
            item_count INTEGER
        );

        -- Upstream accounts, replaced wholesale on every successful fetch
        CREATE TABLE IF NOT EXISTS cached_accounts (
            handle TEXT PRIMARY KEY,
            account_json TEXT NOT NULL,
            cached_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Upstream content items (immutable once fetched)
        CREATE TABLE IF NOT EXISTS cached_items (
            id TEXT PRIMARY KEY,
            author TEXT NOT NULL,
            item_json TEXT NOT NULL,
            cached_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Runtime settings, polled per operation
        CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_items_author
            ON cached_items(author);
        ",
    )
    .context("Failed to create database tables")?;

    run_migrations(conn)?;

    Ok(())
}

/// Apply any migrations newer than the recorded schema version.
fn run_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .context("Failed to read schema version")?;

    if current < 1 {
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
            .context("Failed to record schema version 1")?;
    }

    Ok(())
}

/// Count user-created tables (used by `skybridge init` and `status`).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
