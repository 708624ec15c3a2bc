// System status display — DB stats, tracked accounts, crawl health, settings.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::db::Store;
use crate::settings::{
    load_or, CrawlSettings, RouterSettings, SettingsStore, CRAWL_SETTING, ROUTER_SETTING,
};

/// Accounts with at least this many consecutive failures are flagged.
const FAILING_THRESHOLD: u32 = 3;

/// Display system status to the terminal.
pub async fn show(
    store: &dyn Store,
    settings: &dyn SettingsStore,
    db_path: &str,
    crawl_defaults: CrawlSettings,
    router_defaults: RouterSettings,
) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `skybridge init` to set up the database.");
        return Ok(());
    }

    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);

    let accounts = store.list_sync_accounts().await?;
    let never_synced = accounts.iter().filter(|a| a.last_sync.is_none()).count();
    let failing: Vec<_> = accounts
        .iter()
        .filter(|a| a.fetch_errors >= FAILING_THRESHOLD)
        .collect();
    println!(
        "Tracked accounts: {} total, {} never synced",
        accounts.len(),
        never_synced
    );
    if accounts.is_empty() {
        println!("  Run `skybridge track <handle>` to start mirroring an account");
    }

    if !failing.is_empty() {
        println!(
            "{} {} accounts failing repeatedly:",
            "Warning:".yellow(),
            failing.len()
        );
        for account in failing.iter().take(10) {
            println!("  @{} ({} consecutive errors)", account.handle, account.fetch_errors);
        }
    }

    if let Some(latest) = accounts.iter().filter_map(|a| a.last_sync).max() {
        println!("Last crawl: {}", latest.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    let crawl = load_or(settings, CRAWL_SETTING, crawl_defaults).await;
    if crawl.max_concurrency == 0 {
        println!("Ingestion: {}", "paused (max_concurrency = 0)".red());
    } else {
        println!(
            "Ingestion: {} concurrent, {}ms batch delay, {}ms jitter",
            crawl.max_concurrency, crawl.batch_delay_ms, crawl.jitter_ms
        );
    }

    let router = load_or(settings, ROUTER_SETTING, router_defaults).await;
    let t = router.thresholds;
    println!(
        "Tiers: {} / {} / {} / {} followers (upstream gate {})",
        t.tier0, t.tier1, t.tier2, t.tier3, t.upstream_followers
    );

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
