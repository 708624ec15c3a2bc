// Entity cache — single-flight, fallback-chain, TTL-based memoization of
// upstream lookups, shared by account and content item lookups.
//
// A lookup for a key that is already cached (or already being fetched)
// never starts another fetch: moka's `try_get_with` coalesces concurrent
// initialisations of the same key, so every caller awaits the one running
// fallback chain and receives the same outcome.
//
// Outcomes are cached with one of two TTL profiles: the long one for a
// found value, the short one for NotFound/Suspended. Each profile has a
// sliding expiry (refreshed on read) capped by an absolute expiry counted
// from insertion. Errors are never cached.

pub mod layered;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use moka::future::Cache;
use moka::Expiry;
use tracing::debug;

use crate::error::FetchError;

/// Sliding + absolute expiry pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlProfile {
    /// Extended on every read.
    pub sliding: Duration,
    /// Hard ceiling since the entry was written.
    pub absolute: Duration,
}

impl TtlProfile {
    pub const fn new(sliding: Duration, absolute: Duration) -> Self {
        Self { sliding, absolute }
    }

    /// Time left for an entry of the given age that was just touched.
    pub fn remaining(&self, age: Duration) -> Duration {
        self.sliding.min(self.absolute.saturating_sub(age))
    }
}

/// The two TTL profiles of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProfiles {
    pub found: TtlProfile,
    pub missing: TtlProfile,
}

impl CacheProfiles {
    /// Accounts change rarely; misses are retried within minutes.
    pub const fn accounts() -> Self {
        Self {
            found: TtlProfile::new(Duration::from_secs(24 * 3600), Duration::from_secs(48 * 3600)),
            missing: TtlProfile::new(Duration::from_secs(5 * 60), Duration::from_secs(30 * 60)),
        }
    }

    /// Content items are immutable; a miss usually means deleted.
    pub const fn content() -> Self {
        Self {
            found: TtlProfile::new(Duration::from_secs(16 * 3600), Duration::from_secs(24 * 3600)),
            missing: TtlProfile::new(Duration::from_secs(5 * 3600), Duration::from_secs(30 * 3600)),
        }
    }

    fn for_outcome<V>(&self, outcome: &Lookup<V>) -> &TtlProfile {
        match outcome {
            Lookup::Found(_) => &self.found,
            Lookup::NotFound | Lookup::Suspended => &self.missing,
        }
    }
}

/// Cached outcome of a fallback chain.
#[derive(Debug)]
pub enum Lookup<V> {
    Found(Arc<V>),
    NotFound,
    Suspended,
}

impl<V> Clone for Lookup<V> {
    fn clone(&self) -> Self {
        match self {
            Lookup::Found(v) => Lookup::Found(Arc::clone(v)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Suspended => Lookup::Suspended,
        }
    }
}

impl<V> Lookup<V> {
    pub fn found(self) -> Option<Arc<V>> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// One source in a fallback chain.
///
/// The future is not polled until the chain reaches it, so a source that
/// comes after a successful or terminal one never runs.
pub struct Fetcher<'a, V> {
    name: &'static str,
    fut: BoxFuture<'a, Result<Option<V>, FetchError>>,
}

impl<'a, V> Fetcher<'a, V> {
    pub fn new<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = Result<Option<V>, FetchError>> + Send + 'a,
    {
        Self {
            name,
            fut: Box::pin(fut),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

struct OutcomeExpiry {
    profiles: CacheProfiles,
}

impl<V> Expiry<String, Lookup<V>> for OutcomeExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Lookup<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.profiles.for_outcome(value).remaining(Duration::ZERO))
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &Lookup<V>,
        read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        last_modified_at: Instant,
    ) -> Option<Duration> {
        let age = read_at.saturating_duration_since(last_modified_at);
        Some(self.profiles.for_outcome(value).remaining(age))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Lookup<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.profiles.for_outcome(value).remaining(Duration::ZERO))
    }
}

/// Capacity-bounded single-flight cache for one entity kind.
///
/// Eviction under capacity pressure is moka's TinyLFU: rarely read entries
/// (typically negative ones) are dropped before popular ones.
pub struct EntityCache<V> {
    name: &'static str,
    inner: Cache<String, Lookup<V>>,
}

impl<V: Send + Sync + 'static> EntityCache<V> {
    pub fn new(name: &'static str, capacity: u64, profiles: CacheProfiles) -> Self {
        let inner = Cache::builder()
            .name(name)
            .max_capacity(capacity)
            .expire_after(OutcomeExpiry { profiles })
            .build();
        Self { name, inner }
    }

    /// Resolve `key`, running `fetchers` in order on a miss.
    ///
    /// - a value ends the chain and is cached with the long profile
    /// - `None` or NotFound ends the chain as NotFound, Suspended as
    ///   Suspended; both are cached with the short profile
    /// - retryable errors move on to the next fetcher
    /// - any other error ends the chain and is returned uncached
    ///
    /// When every fetcher failed with a retryable error the last such error
    /// is returned, uncached, so the next call tries again.
    pub async fn lookup(
        &self,
        key: &str,
        fetchers: Vec<Fetcher<'_, V>>,
    ) -> Result<Lookup<V>, FetchError> {
        self.inner
            .try_get_with(key.to_string(), run_chain(self.name, key, fetchers))
            .await
            .map_err(|shared| (*shared).clone())
    }

    /// Like `lookup`, flattened to an optional value. Negative outcomes and
    /// a chain exhausted by retryable errors both come back as `None`.
    pub async fn get(
        &self,
        key: &str,
        fetchers: Vec<Fetcher<'_, V>>,
    ) -> Result<Option<Arc<V>>, FetchError> {
        match self.lookup(key, fetchers).await {
            Ok(outcome) => Ok(outcome.found()),
            Err(e) if e.is_retryable() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Seed or overwrite `key` with a known-good value, skipping the fetch chain.
    pub async fn backfill(&self, key: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.inner
            .insert(key.to_string(), Lookup::Found(Arc::clone(&value)))
            .await;
        value
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

async fn run_chain<V>(
    cache: &'static str,
    key: &str,
    fetchers: Vec<Fetcher<'_, V>>,
) -> Result<Lookup<V>, FetchError> {
    let mut last_retryable = None;

    for fetcher in fetchers {
        let source = fetcher.name;
        match fetcher.fut.await {
            Ok(Some(value)) => {
                debug!(cache, key, source, "cache fill");
                return Ok(Lookup::Found(Arc::new(value)));
            }
            Ok(None) | Err(FetchError::NotFound(_)) => {
                debug!(cache, key, source, "not found, caching negative result");
                return Ok(Lookup::NotFound);
            }
            Err(FetchError::Suspended(_)) => {
                debug!(cache, key, source, "suspended, caching negative result");
                return Ok(Lookup::Suspended);
            }
            Err(e) if e.is_retryable() => {
                debug!(cache, key, source, error = %e, "source unavailable, trying next");
                last_retryable = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_retryable.unwrap_or_else(|| FetchError::Unavailable(format!("{cache} cache"))))
}
