// Unit tests for the entity cache.
//
// Covers single-flight coalescing, fallback-chain semantics (terminal vs.
// retryable errors), negative caching, backfill and the two-part expiry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skybridge::cache::{CacheProfiles, EntityCache, Fetcher, Lookup, TtlProfile};
use skybridge::error::FetchError;

fn cache() -> EntityCache<String> {
    EntityCache::new("test", 100, CacheProfiles::accounts())
}

/// A fetcher that counts how often it actually runs.
fn counted<'a>(
    calls: &'a AtomicUsize,
    result: Result<Option<String>, FetchError>,
) -> Fetcher<'a, String> {
    Fetcher::new("counted", async move {
        calls.fetch_add(1, Ordering::SeqCst);
        result
    })
}

fn value(v: &str) -> Result<Option<String>, FetchError> {
    Ok(Some(v.to_string()))
}

// ============================================================
// Single-flight
// ============================================================

#[tokio::test]
async fn concurrent_gets_share_one_fetch() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    let counter = &calls;
    let slow = || {
        Fetcher::new("slow", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Some("alice".to_string()))
        })
    };

    let (a, b) = tokio::join!(cache.get("alice", vec![slow()]), cache.get("alice", vec![slow()]));
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a, b);
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn many_concurrent_gets_share_one_fetch() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    let counter = &calls;
    let lookups = (0..16).map(|_| {
        cache.get(
            "bob",
            vec![Fetcher::new("slow", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Some("bob".to_string()))
            })],
        )
    });
    let results = futures::future::join_all(lookups).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap().as_deref().map(String::as_str) == Some("bob")));
}

#[tokio::test]
async fn cached_value_is_served_without_fetching() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    cache.get("k", vec![counted(&calls, value("v"))]).await.unwrap();
    let again = cache.get("k", vec![counted(&calls, value("other"))]).await.unwrap();

    assert_eq!(again.as_deref().map(String::as_str), Some("v"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================
// Fallback chain
// ============================================================

#[tokio::test]
async fn not_found_stops_the_chain() {
    let cache = cache();
    let first = AtomicUsize::new(0);
    let second = AtomicUsize::new(0);

    let result = cache
        .get(
            "gone",
            vec![
                counted(&first, Err(FetchError::NotFound("gone".into()))),
                counted(&second, value("should not be used")),
            ],
        )
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn null_result_stops_the_chain() {
    let cache = cache();
    let second = AtomicUsize::new(0);

    let result = cache
        .get(
            "absent",
            vec![
                Fetcher::new("empty", async { Ok(None) }),
                counted(&second, value("unused")),
            ],
        )
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limited_advances_to_next_fetcher() {
    let cache = cache();
    let first = AtomicUsize::new(0);
    let second = AtomicUsize::new(0);

    let result = cache
        .get(
            "alice",
            vec![
                counted(&first, Err(FetchError::RateLimited("api".into()))),
                counted(&second, value("from mirror")),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.as_deref().map(String::as_str), Some("from mirror"));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_and_unavailable_also_advance() {
    let cache = cache();
    let result = cache
        .get(
            "alice",
            vec![
                Fetcher::new("a", async { Err(FetchError::Transient("503".into())) }),
                Fetcher::new("b", async { Err(FetchError::Unavailable("store".into())) }),
                Fetcher::new("c", async { Ok(Some("c".to_string())) }),
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.as_deref().map(String::as_str), Some("c"));
}

#[tokio::test]
async fn exhausted_chain_is_null_and_not_cached() {
    let cache = cache();

    let result = cache
        .get(
            "busy",
            vec![Fetcher::new("a", async { Err(FetchError::RateLimited("api".into())) })],
        )
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(!cache.is_cached("busy"));

    let later = cache.get("busy", vec![Fetcher::new("a", async { Ok(Some("ok".to_string())) })]).await;
    assert_eq!(later.unwrap().as_deref().map(String::as_str), Some("ok"));
}

#[tokio::test]
async fn exhausted_lookup_reports_last_retryable_error() {
    let cache = cache();
    let result = cache
        .lookup(
            "busy",
            vec![
                Fetcher::new("a", async { Err(FetchError::Transient("timeout".into())) }),
                Fetcher::new("b", async { Err(FetchError::RateLimited("mirror".into())) }),
            ],
        )
        .await;
    assert!(matches!(result, Err(FetchError::RateLimited(b)) if b == "mirror"));
}

#[tokio::test]
async fn unclassified_error_propagates_uncached() {
    let cache = cache();
    let second = AtomicUsize::new(0);

    let result = cache
        .get(
            "broken",
            vec![
                Fetcher::new("a", async { Err(anyhow::anyhow!("bad payload").into()) }),
                counted(&second, value("unused")),
            ],
        )
        .await;

    assert!(matches!(result, Err(FetchError::Other(_))));
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert!(!cache.is_cached("broken"));
}

// ============================================================
// Negative caching
// ============================================================

#[tokio::test]
async fn not_found_is_cached() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    cache.get("gone", vec![counted(&calls, Ok(None))]).await.unwrap();
    let again = cache.get("gone", vec![counted(&calls, value("back"))]).await.unwrap();

    assert!(again.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_cached("gone"));
}

#[tokio::test]
async fn suspended_is_cached_and_reported_distinctly() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    let first = cache
        .lookup("banned", vec![counted(&calls, Err(FetchError::Suspended("banned".into())))])
        .await
        .unwrap();
    assert!(matches!(first, Lookup::Suspended));

    let again = cache.lookup("banned", vec![counted(&calls, value("x"))]).await.unwrap();
    assert!(matches!(again, Lookup::Suspended));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(cache.get("banned", Vec::new()).await.unwrap().is_none());
}

// ============================================================
// Backfill
// ============================================================

#[tokio::test]
async fn backfill_bypasses_fetch() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    cache.backfill("k", "seeded".to_string()).await;
    assert!(cache.is_cached("k"));

    let result = cache.get("k", vec![counted(&calls, value("fetched"))]).await.unwrap();
    assert_eq!(result.as_deref().map(String::as_str), Some("seeded"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backfill_overwrites_negative_entry() {
    let cache = cache();
    cache.get("k", vec![Fetcher::new("a", async { Ok(None) })]).await.unwrap();

    cache.backfill("k", "found later".to_string()).await;
    let result = cache.get("k", Vec::new()).await.unwrap();
    assert_eq!(result.as_deref().map(String::as_str), Some("found later"));
}

#[tokio::test]
async fn invalidate_forces_refetch() {
    let cache = cache();
    let calls = AtomicUsize::new(0);

    cache.get("k", vec![counted(&calls, value("v1"))]).await.unwrap();
    cache.invalidate("k").await;
    let result = cache.get("k", vec![counted(&calls, value("v2"))]).await.unwrap();

    assert_eq!(result.as_deref().map(String::as_str), Some("v2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================
// Expiry
// ============================================================

fn short_profiles() -> CacheProfiles {
    CacheProfiles {
        found: TtlProfile::new(Duration::from_millis(200), Duration::from_millis(500)),
        missing: TtlProfile::new(Duration::from_millis(60), Duration::from_millis(500)),
    }
}

#[tokio::test]
async fn sliding_expiry_is_refreshed_by_reads_until_absolute_ceiling() {
    let cache: EntityCache<String> = EntityCache::new("short", 100, short_profiles());
    let calls = AtomicUsize::new(0);

    cache.get("k", vec![counted(&calls, value("v"))]).await.unwrap();

    // Each read lands inside the sliding window of the previous one
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.get("k", vec![counted(&calls, value("v"))]).await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Past the absolute ceiling, regardless of reads
    tokio::time::sleep(Duration::from_millis(200)).await;
    cache.get("k", vec![counted(&calls, value("v"))]).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn negative_entries_use_the_short_profile() {
    let cache: EntityCache<String> = EntityCache::new("short", 100, short_profiles());
    let calls = AtomicUsize::new(0);

    cache.get("gone", vec![counted(&calls, Ok(None))]).await.unwrap();
    cache.get("here", vec![counted(&calls, value("v"))]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    let gone = cache.get("gone", vec![counted(&calls, value("now exists"))]).await.unwrap();
    let here = cache.get("here", vec![counted(&calls, value("refetched"))]).await.unwrap();

    assert_eq!(gone.as_deref().map(String::as_str), Some("now exists"));
    assert_eq!(here.as_deref().map(String::as_str), Some("v"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
