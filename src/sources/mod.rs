// Acquisition backends — every upstream surface content can be fetched from.
//
// Each backend kind has its own module and talks to one surface: the
// primary API, a scraping proxy reached through the outbound proxy, a pool
// of mirror services, and the public syndication endpoint. `Backends`
// dispatches on the `Backend`/`Strategy` enums to exactly one of them; the
// `Upstream` trait is the seam the router and the cache depend on.

pub mod api;
pub mod client;
pub mod mirror;
pub mod rate_limit;
pub mod scraper;
pub mod syndication;
pub mod wire;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::models::{Account, ContentItem};
use crate::error::FetchError;

/// One upstream surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Api,
    ScrapingProxy,
    Mirror,
    Syndication,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Api => "api",
            Backend::ScrapingProxy => "scraper",
            Backend::Mirror => "mirror",
            Backend::Syndication => "syndication",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an account's timeline delta is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Primary API, own items only. Cheapest.
    Default,
    /// Scraping proxy, including replies. Richest.
    WithReplies,
    /// Mirror service, excluding replies.
    NoReplies,
    /// Scraping proxy, own items only.
    ScrapingProxy,
}

impl Strategy {
    pub fn backend(&self) -> Backend {
        match self {
            Strategy::Default => Backend::Api,
            Strategy::NoReplies => Backend::Mirror,
            Strategy::WithReplies | Strategy::ScrapingProxy => Backend::ScrapingProxy,
        }
    }

    pub fn includes_replies(&self) -> bool {
        matches!(self, Strategy::WithReplies)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Default => "default",
            Strategy::WithReplies => "with_replies",
            Strategy::NoReplies => "no_replies",
            Strategy::ScrapingProxy => "scraping_proxy",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which account's timeline to fetch, and from where.
#[derive(Debug, Clone, Copy)]
pub struct TimelineTarget<'a> {
    pub handle: &'a str,
    pub upstream_id: Option<u64>,
    /// Only items newer than this are wanted. Backends may ignore it; the
    /// router filters again.
    pub since_id: Option<&'a str>,
}

/// Fetch operations over every backend.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// `Ok(None)` means the backend answered and the account doesn't exist.
    async fn fetch_user(&self, backend: Backend, handle: &str)
        -> Result<Option<Account>, FetchError>;

    async fn fetch_item(&self, backend: Backend, id: &str)
        -> Result<Option<ContentItem>, FetchError>;

    /// Most recent page of the account's timeline, in any order.
    async fn fetch_timeline(
        &self,
        strategy: Strategy,
        target: &TimelineTarget<'_>,
    ) -> Result<Vec<ContentItem>, FetchError>;

    /// Cheap upstream-reported item count, without a timeline fetch.
    async fn probe_item_count(&self, handle: &str) -> Result<Option<u64>, FetchError>;
}

/// The live backends, dispatched by kind.
pub struct Backends {
    api: api::ApiBackend,
    scraper: Option<scraper::ScraperBackend>,
    mirror: mirror::MirrorBackend,
    syndication: syndication::SyndicationBackend,
}

impl Backends {
    pub fn new(
        api: api::ApiBackend,
        scraper: Option<scraper::ScraperBackend>,
        mirror: mirror::MirrorBackend,
        syndication: syndication::SyndicationBackend,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            scraper,
            mirror,
            syndication,
        })
    }

    fn scraper(&self) -> Result<&scraper::ScraperBackend, FetchError> {
        self.scraper
            .as_ref()
            .ok_or_else(|| FetchError::Unavailable("scraper (not configured)".to_string()))
    }
}

#[async_trait]
impl Upstream for Backends {
    async fn fetch_user(
        &self,
        backend: Backend,
        handle: &str,
    ) -> Result<Option<Account>, FetchError> {
        match backend {
            Backend::Api => self.api.user(handle).await,
            Backend::ScrapingProxy => self.scraper()?.user(handle).await,
            Backend::Mirror => self.mirror.user(handle).await,
            Backend::Syndication => Err(FetchError::Unavailable(
                "syndication (no account lookups)".to_string(),
            )),
        }
    }

    async fn fetch_item(
        &self,
        backend: Backend,
        id: &str,
    ) -> Result<Option<ContentItem>, FetchError> {
        match backend {
            Backend::Api => self.api.item(id).await,
            Backend::ScrapingProxy => self.scraper()?.item(id).await,
            Backend::Mirror => self.mirror.item(id).await,
            Backend::Syndication => self.syndication.item(id).await,
        }
    }

    async fn fetch_timeline(
        &self,
        strategy: Strategy,
        target: &TimelineTarget<'_>,
    ) -> Result<Vec<ContentItem>, FetchError> {
        match strategy {
            Strategy::Default => self.api.timeline(target).await,
            Strategy::NoReplies => {
                self.mirror
                    .timeline(target.handle, strategy.includes_replies())
                    .await
            }
            Strategy::WithReplies | Strategy::ScrapingProxy => {
                self.scraper()?
                    .timeline(target.handle, strategy.includes_replies())
                    .await
            }
        }
    }

    async fn probe_item_count(&self, handle: &str) -> Result<Option<u64>, FetchError> {
        self.api.item_count(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_map_to_backends() {
        assert_eq!(Strategy::Default.backend(), Backend::Api);
        assert_eq!(Strategy::WithReplies.backend(), Backend::ScrapingProxy);
        assert_eq!(Strategy::NoReplies.backend(), Backend::Mirror);
        assert_eq!(Strategy::ScrapingProxy.backend(), Backend::ScrapingProxy);
        assert!(Strategy::WithReplies.includes_replies());
        assert!(!Strategy::NoReplies.includes_replies());
        assert!(!Strategy::ScrapingProxy.includes_replies());
    }
}
