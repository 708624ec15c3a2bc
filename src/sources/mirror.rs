// Mirror backend — a pool of interchangeable mirror services.
//
// Each call goes to one domain picked at random from the pool. The pool is
// read from the `mirror_domains` runtime setting on every call, falling back
// to the configured list, so a dead mirror can be pulled without a restart.

use std::sync::Arc;

use tracing::debug;

use crate::db::models::{canonical_handle, Account, ContentItem};
use crate::error::FetchError;
use crate::random::RandomSource;
use crate::settings::{load_or, SettingsStore, MIRROR_DOMAINS_SETTING};
use crate::sources::client::{get_json, HttpClients};
use crate::sources::wire::{FlatPost, FlatTimeline, FlatUser};

const BACKEND: &str = "mirror";

pub struct MirrorBackend {
    client: reqwest::Client,
    default_domains: Vec<String>,
    settings: Arc<dyn SettingsStore>,
    random: Arc<dyn RandomSource>,
}

impl MirrorBackend {
    pub fn new(
        clients: &HttpClients,
        default_domains: Vec<String>,
        settings: Arc<dyn SettingsStore>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            client: clients.direct().clone(),
            default_domains,
            settings,
            random,
        }
    }

    /// Base URL of the mirror to use for the next call.
    pub async fn pick_base(&self) -> Result<String, FetchError> {
        let domains: Vec<String> = load_or(
            self.settings.as_ref(),
            MIRROR_DOMAINS_SETTING,
            self.default_domains.clone(),
        )
        .await;

        if domains.is_empty() {
            return Err(FetchError::Unavailable("mirror (no domains configured)".to_string()));
        }
        let domain = &domains[self.random.index(domains.len())];
        Ok(base_url(domain))
    }

    pub async fn user(&self, handle: &str) -> Result<Option<Account>, FetchError> {
        let handle = canonical_handle(handle);
        let url = format!("{}/api/v1/user/{}", self.pick_base().await?, handle);
        debug!(url = %url, "mirror user lookup");
        match get_json::<FlatUser>(self.client.get(&url), BACKEND, &handle).await {
            Ok(user) => Ok(Some(user.into())),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn item(&self, id: &str) -> Result<Option<ContentItem>, FetchError> {
        let url = format!("{}/api/v1/post/{}", self.pick_base().await?, id);
        match get_json::<FlatPost>(self.client.get(&url), BACKEND, id).await {
            Ok(post) => Ok(Some(post.into())),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn timeline(
        &self,
        handle: &str,
        with_replies: bool,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let handle = canonical_handle(handle);
        let url = format!("{}/api/v1/timeline/{}", self.pick_base().await?, handle);
        let replies = if with_replies { "true" } else { "false" };
        let timeline: FlatTimeline = get_json(
            self.client.get(&url).query(&[("with_replies", replies)]),
            BACKEND,
            &handle,
        )
        .await?;
        Ok(timeline.items.into_iter().map(ContentItem::from).collect())
    }
}

/// Accept bare domains as well as full base URLs.
fn base_url(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    }
}
