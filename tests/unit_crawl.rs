// Unit tests for the batch crawl pipeline.
//
// A scripted DeltaSource stands in for the bridge; the cursors live in a
// MemoryStore so every test can inspect exactly what was persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use skybridge::db::models::{ContentItem, SyncAccount};
use skybridge::db::{MemoryStore, Store};
use skybridge::error::FetchError;
use skybridge::metrics::CountingTelemetry;
use skybridge::pipeline::crawl::{CrawlPipeline, DeltaSource};
use skybridge::random::NoRandom;
use skybridge::router::AccountDelta;
use skybridge::settings::{CrawlSettings, StaticSettings, CRAWL_SETTING};
use skybridge::sources::Strategy;

// ============================================================
// Scripted delta source
// ============================================================

#[derive(Default)]
struct ScriptedSource {
    deltas: HashMap<String, Result<AccountDelta, FetchError>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn with(mut self, handle: &str, delta: Result<AccountDelta, FetchError>) -> Self {
        self.deltas.insert(handle.to_string(), delta);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeltaSource for ScriptedSource {
    async fn account_delta(&self, cursor: &SyncAccount) -> Result<AccountDelta, FetchError> {
        self.calls.lock().unwrap().push(cursor.handle.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.deltas
            .get(&cursor.handle)
            .cloned()
            .unwrap_or_else(|| Ok(AccountDelta::default()))
    }
}

// ============================================================
// Fixtures
// ============================================================

fn item(id: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        author: "alice".to_string(),
        original_author: None,
        reshare_id: None,
        body: String::new(),
        created_at: Utc::now(),
        media: Vec::new(),
        poll: None,
        in_reply_to: None,
        quoted: None,
    }
}

fn found(strategy: Strategy, ids: &[&str]) -> Result<AccountDelta, FetchError> {
    Ok(AccountDelta {
        strategy: Some(strategy),
        items: ids.iter().map(|id| item(id)).collect(),
        item_count: None,
    })
}

fn fast_settings(max_concurrency: usize) -> serde_json::Value {
    json!({ "max_concurrency": max_concurrency, "batch_delay_ms": 0, "jitter_ms": 0 })
}

fn pipeline(
    source: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
    crawl: serde_json::Value,
) -> (CrawlPipeline, Arc<CountingTelemetry>) {
    let telemetry = Arc::new(CountingTelemetry::new());
    let pipeline = CrawlPipeline::new(
        source,
        store,
        Arc::new(StaticSettings::new().with(CRAWL_SETTING, crawl)),
        CrawlSettings::default(),
        Arc::new(NoRandom),
        telemetry.clone(),
    );
    (pipeline, telemetry)
}

/// Track `handle` with an existing cursor and error count.
async fn tracked(store: &MemoryStore, handle: &str, last_item_id: Option<&str>, errors: u32) -> SyncAccount {
    store.add_sync_account(handle, 100).await.unwrap();
    store
        .update_account_cursor(handle, last_item_id, errors, Utc::now())
        .await
        .unwrap();
    store.get_sync_account(handle).await.unwrap().unwrap()
}

// ============================================================
// Cursor bookkeeping
// ============================================================

#[tokio::test]
async fn success_advances_cursor_and_resets_errors() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", Some("100"), 4).await;
    let source = Arc::new(ScriptedSource::default().with("alice", found(Strategy::WithReplies, &["105", "103"])));
    let (pipeline, telemetry) = pipeline(source, store.clone(), fast_settings(2));

    let outcomes = pipeline.crawl_batch(&[alice], &CancellationToken::new()).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].items.len(), 2);
    assert_eq!(outcomes[0].strategy, Some(Strategy::WithReplies));

    let saved = store.get_sync_account("alice").await.unwrap().unwrap();
    assert_eq!(saved.last_item_id.as_deref(), Some("105"));
    assert_eq!(saved.fetch_errors, 0);
    assert_eq!(telemetry.items_from("with_replies"), 2);
}

#[tokio::test]
async fn cursor_never_moves_backwards() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", Some("200"), 0).await;
    let source = Arc::new(ScriptedSource::default().with("alice", found(Strategy::Default, &["150", "120"])));
    let (pipeline, _) = pipeline(source, store.clone(), fast_settings(1));

    pipeline.crawl_batch(&[alice], &CancellationToken::new()).await;

    let saved = store.get_sync_account("alice").await.unwrap().unwrap();
    assert_eq!(saved.last_item_id.as_deref(), Some("200"));
}

#[tokio::test]
async fn reshares_advance_cursor_by_reshare_id() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", Some("100"), 0).await;

    let mut reshare = item("50");
    reshare.original_author = Some("bob".to_string());
    reshare.reshare_id = Some("140".to_string());
    let source = Arc::new(ScriptedSource::default().with(
        "alice",
        Ok(AccountDelta {
            strategy: Some(Strategy::Default),
            items: vec![reshare, item("120")],
            item_count: None,
        }),
    ));
    let (pipeline, _) = pipeline(source, store.clone(), fast_settings(1));

    pipeline.crawl_batch(&[alice], &CancellationToken::new()).await;

    let saved = store.get_sync_account("alice").await.unwrap().unwrap();
    assert_eq!(saved.last_item_id.as_deref(), Some("140"));
}

#[tokio::test]
async fn transient_failure_counts_once_and_keeps_cursor() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", Some("100"), 2).await;
    let before = alice.last_sync;
    let source = Arc::new(
        ScriptedSource::default().with("alice", Err(FetchError::Transient("mirror 503".into()))),
    );
    let (pipeline, _) = pipeline(source, store.clone(), fast_settings(1));

    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcomes = pipeline.crawl_batch(&[alice], &CancellationToken::new()).await;

    assert!(outcomes.is_empty());
    let saved = store.get_sync_account("alice").await.unwrap().unwrap();
    assert_eq!(saved.fetch_errors, 3);
    assert_eq!(saved.last_item_id.as_deref(), Some("100"));
    assert!(saved.last_sync > before);
}

#[tokio::test]
async fn failing_account_does_not_abort_the_batch() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", None, 0).await;
    let bob = tracked(&store, "bob", None, 0).await;
    let source = Arc::new(
        ScriptedSource::default()
            .with("alice", Err(anyhow::anyhow!("unexpected payload").into()))
            .with("bob", found(Strategy::Default, &["7"])),
    );
    let (pipeline, _) = pipeline(source.clone(), store.clone(), fast_settings(1));

    let outcomes = pipeline.crawl_batch(&[alice, bob], &CancellationToken::new()).await;

    assert_eq!(source.calls(), vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].account.handle, "bob");
    assert_eq!(store.get_sync_account("alice").await.unwrap().unwrap().fetch_errors, 1);
    assert_eq!(
        store.get_sync_account("bob").await.unwrap().unwrap().last_item_id.as_deref(),
        Some("7")
    );
}

#[tokio::test]
async fn item_count_is_persisted_even_when_skipped() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", Some("100"), 0).await;
    let source = Arc::new(ScriptedSource::default().with(
        "alice",
        Ok(AccountDelta {
            strategy: None,
            items: Vec::new(),
            item_count: Some(321),
        }),
    ));
    let (pipeline, telemetry) = pipeline(source, store.clone(), fast_settings(1));

    let outcomes = pipeline.crawl_batch(&[alice], &CancellationToken::new()).await;

    assert!(outcomes.is_empty());
    let saved = store.get_sync_account("alice").await.unwrap().unwrap();
    assert_eq!(saved.item_count, Some(321));
    assert!(saved.last_sync.is_some());
    assert_eq!(telemetry.items_from("skipped"), 0);
}

// ============================================================
// Scheduling
// ============================================================

#[tokio::test]
async fn concurrency_never_exceeds_the_setting() {
    let store = Arc::new(MemoryStore::new());
    let mut accounts = Vec::new();
    for i in 0..7 {
        accounts.push(tracked(&store, &format!("user{i}"), None, 0).await);
    }
    let source = Arc::new(ScriptedSource {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(3));

    pipeline.crawl_batch(&accounts, &CancellationToken::new()).await;

    assert_eq!(source.calls().len(), 7);
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn batch_delay_separates_groups() {
    let store = Arc::new(MemoryStore::new());
    let mut accounts = Vec::new();
    for i in 0..5 {
        accounts.push(tracked(&store, &format!("user{i}"), None, 0).await);
    }
    let source = Arc::new(ScriptedSource::default());
    let (pipeline, _) = pipeline(
        source,
        store,
        json!({ "max_concurrency": 2, "batch_delay_ms": 50, "jitter_ms": 0 }),
    );

    // Groups of 2, 2 and 1: two pauses
    let start = Instant::now();
    pipeline.crawl_batch(&accounts, &CancellationToken::new()).await;
    assert!(start.elapsed() >= Duration::from_millis(95));
}

#[tokio::test]
async fn no_batch_delay_after_the_last_group() {
    let store = Arc::new(MemoryStore::new());
    let mut accounts = Vec::new();
    for i in 0..4 {
        accounts.push(tracked(&store, &format!("user{i}"), None, 0).await);
    }
    let source = Arc::new(ScriptedSource::default());
    let (pipeline, _) = pipeline(
        source.clone(),
        store,
        json!({ "max_concurrency": 2, "batch_delay_ms": 200, "jitter_ms": 0 }),
    );

    let start = Instant::now();
    pipeline.crawl_batch(&accounts, &CancellationToken::new()).await;
    let elapsed = start.elapsed();

    assert_eq!(source.calls().len(), 4);
    assert!(elapsed >= Duration::from_millis(195));
    assert!(elapsed < Duration::from_millis(380), "slept after the final group: {elapsed:?}");
}

#[tokio::test]
async fn duplicate_handles_are_crawled_once() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", None, 0).await;
    let bob = tracked(&store, "bob", None, 0).await;
    let source = Arc::new(ScriptedSource::default());
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(4));

    pipeline
        .crawl_batch(&[alice.clone(), alice, bob], &CancellationToken::new())
        .await;

    let mut calls = source.calls();
    calls.sort();
    assert_eq!(calls, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn handles_differing_in_case_are_one_account() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", None, 0).await;
    let mut shouted = alice.clone();
    shouted.handle = "Alice".to_string();
    let source = Arc::new(ScriptedSource {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(4));

    pipeline
        .crawl_batch(&[alice, shouted], &CancellationToken::new())
        .await;

    assert_eq!(source.calls(), vec!["alice".to_string()]);
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mixed_case_tracking_keeps_its_cursor() {
    let store = Arc::new(MemoryStore::new());
    store.add_sync_account("Alice", 10).await.unwrap();
    let working_set = store.list_sync_accounts().await.unwrap();
    assert_eq!(working_set.len(), 1);
    assert_eq!(working_set[0].handle, "alice");

    let source = Arc::new(ScriptedSource::default().with("alice", found(Strategy::Default, &["50"])));
    let (pipeline, _) = pipeline(source.clone(), store.clone(), fast_settings(1));

    let outcomes = pipeline.crawl_batch(&working_set, &CancellationToken::new()).await;
    assert_eq!(outcomes.len(), 1);

    for handle in ["alice", "Alice"] {
        let saved = store.get_sync_account(handle).await.unwrap().unwrap();
        assert_eq!(saved.last_item_id.as_deref(), Some("50"));
    }

    // Re-tracking under another spelling updates the same row
    store.add_sync_account("ALICE", 20).await.unwrap();
    let working_set = store.list_sync_accounts().await.unwrap();
    assert_eq!(working_set.len(), 1);
    assert_eq!(working_set[0].follower_count, 20);
    assert_eq!(working_set[0].last_item_id.as_deref(), Some("50"));
}

#[tokio::test]
async fn zero_concurrency_pauses_ingestion() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", None, 0).await;
    let source = Arc::new(ScriptedSource::default());
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(0));
    let cancel = CancellationToken::new();

    let accounts = [alice];
    let paused = tokio::time::timeout(
        Duration::from_millis(100),
        pipeline.crawl_batch(&accounts, &cancel),
    )
    .await;

    assert!(paused.is_err(), "a paused batch should not complete");
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn cancelling_a_paused_batch_returns_empty() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", None, 0).await;
    let source = Arc::new(ScriptedSource::default().with("alice", found(Strategy::Default, &["1"])));
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(0));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let outcomes = pipeline.crawl_batch(&[alice], &cancel).await;
    assert!(outcomes.is_empty());
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn cancelled_token_starts_nothing() {
    let store = Arc::new(MemoryStore::new());
    let alice = tracked(&store, "alice", None, 0).await;
    let source = Arc::new(ScriptedSource::default());
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(2));

    let cancel = CancellationToken::new();
    cancel.cancel();
    pipeline.crawl_batch(&[alice], &cancel).await;

    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn cancellation_lets_the_running_group_finish() {
    let store = Arc::new(MemoryStore::new());
    let mut accounts = Vec::new();
    for i in 0..4 {
        accounts.push(tracked(&store, &format!("user{i}"), None, 0).await);
    }
    let source = Arc::new(ScriptedSource {
        delay: Duration::from_millis(40),
        ..Default::default()
    });
    let (pipeline, _) = pipeline(source.clone(), store.clone(), fast_settings(2));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    pipeline.crawl_batch(&accounts, &cancel).await;

    // The first group was in flight when the token fired
    assert_eq!(source.calls().len(), 2);
    for handle in source.calls() {
        let saved = store.get_sync_account(&handle).await.unwrap().unwrap();
        assert!(saved.last_sync.is_some());
    }
}

#[tokio::test]
async fn run_stops_when_cancelled() {
    let store = Arc::new(MemoryStore::new());
    tracked(&store, "alice", None, 0).await;
    let source = Arc::new(ScriptedSource::default());
    let (pipeline, _) = pipeline(source.clone(), store, fast_settings(2));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let rounds = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run(Duration::from_secs(60), &cancel),
    )
    .await
    .expect("run should return once cancelled")
    .unwrap();

    assert_eq!(rounds, 1);
    assert_eq!(source.calls(), vec!["alice".to_string()]);
}
