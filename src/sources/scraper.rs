// Scraping proxy backend — a scraper service reached through the outbound
// proxy. Serves the flat wire format.

use tracing::debug;

use crate::db::models::{canonical_handle, Account, ContentItem};
use crate::error::FetchError;
use crate::sources::client::{get_json, HttpClients};
use crate::sources::wire::{FlatPost, FlatTimeline, FlatUser};

const BACKEND: &str = "scraper";

pub struct ScraperBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ScraperBackend {
    pub fn new(clients: &HttpClients, base_url: &str) -> Self {
        Self {
            client: clients.proxied().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn user(&self, handle: &str) -> Result<Option<Account>, FetchError> {
        let handle = canonical_handle(handle);
        let url = format!("{}/api/{}", self.base_url, handle);
        debug!(handle = %handle, "scraper user lookup");
        match get_json::<FlatUser>(self.client.get(&url), BACKEND, &handle).await {
            Ok(user) => Ok(Some(user.into())),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn item(&self, id: &str) -> Result<Option<ContentItem>, FetchError> {
        let url = format!("{}/api/status/{}", self.base_url, id);
        match get_json::<FlatPost>(self.client.get(&url), BACKEND, id).await {
            Ok(post) => Ok(Some(post.into())),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn timeline_request(&self, handle: &str, with_replies: bool) -> reqwest::RequestBuilder {
        let url = format!("{}/api/{}/timeline", self.base_url, handle);
        let replies = if with_replies { "true" } else { "false" };
        self.client.get(url).query(&[("replies", replies)])
    }

    /// Newest page of the account's timeline.
    pub async fn timeline(
        &self,
        handle: &str,
        with_replies: bool,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let handle = canonical_handle(handle);
        let timeline: FlatTimeline =
            get_json(self.timeline_request(&handle, with_replies), BACKEND, &handle).await?;
        Ok(timeline.items.into_iter().map(ContentItem::from).collect())
    }
}
