// Primary API backend — the authenticated, rate-limited upstream API.
//
// The cheapest source and the only one that reports an account's item count
// without a timeline fetch, which is what makes the router's change probe
// affordable. Responses use the envelope format `{data, includes, errors}`:
// related users, media, polls and referenced items arrive once in
// `includes` and are joined back onto each item here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::db::models::{canonical_handle, Account, ContentItem, ItemRef, Media, Poll, PollOption};
use crate::error::FetchError;
use crate::sources::client::{get_json, HttpClients};
use crate::sources::rate_limit::RateLimiter;
use crate::sources::wire::guess_mime;
use crate::sources::TimelineTarget;

const BACKEND: &str = "api";

/// Items per timeline page.
const PAGE_SIZE: &str = "100";

const USER_FIELDS: &str =
    "description,profile_image_url,profile_banner_url,protected,pinned_tweet_id,public_metrics";
const ITEM_FIELDS: &str = "created_at,author_id,attachments,referenced_tweets";
const EXPANSIONS: &str = "author_id,attachments.media_keys,attachments.poll_ids,\
referenced_tweets.id,referenced_tweets.id.author_id";
const MEDIA_FIELDS: &str = "url,preview_image_url,alt_text,type";
const POLL_FIELDS: &str = "end_datetime,options";

/// Upstream epoch of time-ordered ids, in milliseconds.
const ID_EPOCH_MS: i64 = 1_288_834_974_657;

pub struct ApiBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl ApiBackend {
    pub fn new(
        clients: &HttpClients,
        base_url: &str,
        token: Option<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client: clients.direct().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            limiter,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        key: &str,
    ) -> Result<T, FetchError> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(path, key, "API GET request");

        let mut request = self.client.get(&url).query(params);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        get_json(request, BACKEND, key).await
    }

    pub async fn user(&self, handle: &str) -> Result<Option<Account>, FetchError> {
        let handle = canonical_handle(handle);
        let envelope: Envelope<ApiUser> = self
            .get(
                &format!("/users/by/username/{handle}"),
                &[("user.fields", USER_FIELDS)],
                &handle,
            )
            .await?;

        match envelope.data {
            Some(user) => Ok(Some(user.into_account()?)),
            None => missing(&envelope.errors, &handle),
        }
    }

    pub async fn item(&self, id: &str) -> Result<Option<ContentItem>, FetchError> {
        let envelope: Envelope<ApiItem> = self
            .get(
                &format!("/tweets/{id}"),
                &[
                    ("tweet.fields", ITEM_FIELDS),
                    ("expansions", EXPANSIONS),
                    ("user.fields", "username"),
                    ("media.fields", MEDIA_FIELDS),
                    ("poll.fields", POLL_FIELDS),
                ],
                id,
            )
            .await?;

        match envelope.data {
            Some(item) => {
                let index = IncludeIndex::new(&envelope.includes);
                let author = index.author_of(&item).unwrap_or_default();
                Ok(Some(index.to_content_item(&item, &author)))
            }
            None => missing(&envelope.errors, id),
        }
    }

    /// Newest page of the account's own timeline.
    pub async fn timeline(&self, target: &TimelineTarget<'_>) -> Result<Vec<ContentItem>, FetchError> {
        let upstream_id = match target.upstream_id {
            Some(id) => id,
            None => {
                self.user(target.handle)
                    .await?
                    .ok_or_else(|| FetchError::NotFound(target.handle.to_string()))?
                    .upstream_id
            }
        };

        let mut params = vec![
            ("max_results", PAGE_SIZE),
            ("tweet.fields", ITEM_FIELDS),
            ("expansions", EXPANSIONS),
            ("user.fields", "username"),
            ("media.fields", MEDIA_FIELDS),
            ("poll.fields", POLL_FIELDS),
        ];
        if let Some(since) = target.since_id {
            params.push(("since_id", since));
        }

        let envelope: Envelope<Vec<ApiItem>> = self
            .get(&format!("/users/{upstream_id}/tweets"), &params, target.handle)
            .await?;

        if envelope.data.is_none() && !envelope.errors.is_empty() {
            return missing(&envelope.errors, target.handle).map(|_: Option<()>| Vec::new());
        }

        let index = IncludeIndex::new(&envelope.includes);
        let author = canonical_handle(target.handle);
        Ok(envelope
            .data
            .unwrap_or_default()
            .iter()
            .map(|item| index.to_content_item(item, &author))
            .collect())
    }

    /// Upstream-reported item count for the change probe.
    pub async fn item_count(&self, handle: &str) -> Result<Option<u64>, FetchError> {
        match self.user(handle).await? {
            Some(account) => Ok(account.item_count),
            None => Err(FetchError::NotFound(handle.to_string())),
        }
    }
}

/// Map the `errors` of an empty envelope: a suspension message becomes
/// Suspended, anything else an absent entity.
fn missing<T>(errors: &[ApiProblem], key: &str) -> Result<Option<T>, FetchError> {
    let suspended = errors.iter().any(|e| {
        let text = format!("{} {}", e.title, e.detail).to_lowercase();
        text.contains("suspended")
    });
    if suspended {
        Err(FetchError::Suspended(key.to_string()))
    } else {
        Ok(None)
    }
}

/// Creation time encoded in a time-ordered upstream id.
pub fn id_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let id: i64 = id.parse().ok()?;
    Utc.timestamp_millis_opt((id >> 22) + ID_EPOCH_MS).single()
}

// -- Serde types for the API envelope --

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
    #[serde(default)]
    media: Vec<ApiMedia>,
    #[serde(default)]
    polls: Vec<ApiPoll>,
    #[serde(default)]
    tweets: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    profile_image_url: Option<String>,
    profile_banner_url: Option<String>,
    #[serde(default)]
    protected: bool,
    pinned_tweet_id: Option<String>,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    followers_count: u64,
    tweet_count: Option<u64>,
}

impl ApiUser {
    fn into_account(self) -> Result<Account, FetchError> {
        let upstream_id = self.id.parse().map_err(|_| {
            FetchError::from(anyhow::anyhow!("API returned non-numeric user id {}", self.id))
        })?;
        let (follower_count, item_count) = self
            .public_metrics
            .map(|m| (m.followers_count, m.tweet_count))
            .unwrap_or((0, None));

        Ok(Account {
            handle: canonical_handle(&self.username),
            upstream_id,
            display_name: self.name,
            bio: self.description,
            avatar_url: self.profile_image_url,
            banner_url: self.profile_banner_url,
            protected: self.protected,
            pinned_ids: self.pinned_tweet_id.into_iter().collect(),
            follower_count,
            item_count,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    id: String,
    #[serde(default)]
    text: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    attachments: Option<Attachments>,
    #[serde(default)]
    referenced_tweets: Vec<Referenced>,
}

#[derive(Debug, Default, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
    #[serde(default)]
    poll_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Referenced {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiMedia {
    media_key: String,
    #[serde(rename = "type", default)]
    kind: String,
    url: Option<String>,
    preview_image_url: Option<String>,
    alt_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPoll {
    id: String,
    end_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    options: Vec<ApiPollOption>,
}

#[derive(Debug, Deserialize)]
struct ApiPollOption {
    label: String,
    #[serde(default)]
    votes: u64,
}

/// Lookup tables over an envelope's `includes`.
struct IncludeIndex<'a> {
    users: HashMap<&'a str, &'a str>,
    media: HashMap<&'a str, &'a ApiMedia>,
    polls: HashMap<&'a str, &'a ApiPoll>,
    items: HashMap<&'a str, &'a ApiItem>,
}

impl<'a> IncludeIndex<'a> {
    fn new(includes: &'a Includes) -> Self {
        Self {
            users: includes
                .users
                .iter()
                .map(|u| (u.id.as_str(), u.username.as_str()))
                .collect(),
            media: includes
                .media
                .iter()
                .map(|m| (m.media_key.as_str(), m))
                .collect(),
            polls: includes.polls.iter().map(|p| (p.id.as_str(), p)).collect(),
            items: includes.tweets.iter().map(|t| (t.id.as_str(), t)).collect(),
        }
    }

    fn author_of(&self, item: &ApiItem) -> Option<String> {
        item.author_id
            .as_deref()
            .and_then(|id| self.users.get(id))
            .map(|name| canonical_handle(name))
    }

    fn reference<'b>(&self, item: &'b ApiItem, kind: &str) -> Option<&'b str> {
        item.referenced_tweets
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.id.as_str())
    }

    fn item_ref(&self, id: &str) -> ItemRef {
        ItemRef {
            id: id.to_string(),
            author: self.items.get(id).and_then(|item| self.author_of(item)),
        }
    }

    /// Build a content item. `author` is the account the item was fetched
    /// from; a reshare carries the original's content under the original's
    /// id, with the reshare's own id alongside.
    fn to_content_item(&self, item: &ApiItem, author: &str) -> ContentItem {
        let reshared = self
            .reference(item, "retweeted")
            .and_then(|id| self.items.get(id).copied());

        let (source, reshare_id, original_author) = match reshared {
            Some(original) => (
                original,
                Some(item.id.clone()),
                Some(self.author_of(original).unwrap_or_default()),
            ),
            None => (item, None, None),
        };

        let attachments = source.attachments.as_ref();
        let media = attachments
            .map(|a| a.media_keys.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|key| self.media.get(key.as_str()))
            .filter_map(|m| {
                let url = m.url.clone().or_else(|| m.preview_image_url.clone())?;
                Some(Media {
                    mime_type: guess_mime(&url, &m.kind),
                    url,
                    alt_text: m.alt_text.clone().filter(|a| !a.is_empty()),
                })
            })
            .collect();

        let poll = attachments
            .and_then(|a| a.poll_ids.first())
            .and_then(|id| self.polls.get(id.as_str()))
            .and_then(|p| {
                Some(Poll {
                    ends_at: p.end_datetime?,
                    options: p
                        .options
                        .iter()
                        .map(|o| PollOption {
                            label: o.label.clone(),
                            count: o.votes,
                        })
                        .collect(),
                })
            });

        ContentItem {
            id: source.id.clone(),
            author: author.to_string(),
            original_author,
            reshare_id,
            body: source.text.clone(),
            created_at: source
                .created_at
                .or_else(|| id_timestamp(&source.id))
                .unwrap_or_else(Utc::now),
            media,
            poll,
            in_reply_to: self.reference(source, "replied_to").map(|id| self.item_ref(id)),
            quoted: self.reference(source, "quoted").map(|id| self.item_ref(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE: &str = r#"{
        "data": [
            {
                "id": "300",
                "text": "RT @bob: hello",
                "author_id": "1",
                "created_at": "2025-03-01T10:00:00.000Z",
                "referenced_tweets": [{ "type": "retweeted", "id": "200" }]
            },
            {
                "id": "301",
                "text": "poll time",
                "author_id": "1",
                "created_at": "2025-03-01T11:00:00.000Z",
                "attachments": { "media_keys": ["3_1"], "poll_ids": ["p1"] },
                "referenced_tweets": [{ "type": "replied_to", "id": "200" }]
            }
        ],
        "includes": {
            "users": [
                { "id": "1", "username": "Alice" },
                { "id": "2", "username": "Bob" }
            ],
            "tweets": [
                { "id": "200", "text": "hello", "author_id": "2", "created_at": "2025-02-01T00:00:00.000Z" }
            ],
            "media": [
                { "media_key": "3_1", "type": "photo", "url": "https://media.example/x.jpg", "alt_text": "a cat" }
            ],
            "polls": [
                { "id": "p1", "end_datetime": "2025-03-02T11:00:00.000Z",
                  "options": [{ "position": 1, "label": "yes", "votes": 4 }] }
            ]
        }
    }"#;

    fn timeline_items() -> Vec<ContentItem> {
        let envelope: Envelope<Vec<ApiItem>> = serde_json::from_str(TIMELINE).unwrap();
        let index = IncludeIndex::new(&envelope.includes);
        envelope
            .data
            .unwrap()
            .iter()
            .map(|item| index.to_content_item(item, "alice"))
            .collect()
    }

    #[test]
    fn reshare_carries_original_content() {
        let items = timeline_items();
        let reshare = &items[0];
        assert_eq!(reshare.id, "200");
        assert_eq!(reshare.reshare_id.as_deref(), Some("300"));
        assert_eq!(reshare.cursor_id(), "300");
        assert_eq!(reshare.author, "alice");
        assert_eq!(reshare.original_author.as_deref(), Some("bob"));
        assert_eq!(reshare.body, "hello");
    }

    #[test]
    fn includes_are_joined_onto_items() {
        let items = timeline_items();
        let item = &items[1];
        assert_eq!(item.media.len(), 1);
        assert_eq!(item.media[0].mime_type, "image/jpeg");
        assert_eq!(item.media[0].alt_text.as_deref(), Some("a cat"));
        assert_eq!(item.poll.as_ref().unwrap().options[0].count, 4);
        let parent = item.in_reply_to.as_ref().unwrap();
        assert_eq!(parent.id, "200");
        assert_eq!(parent.author.as_deref(), Some("bob"));
    }

    #[test]
    fn user_maps_metrics() {
        let json = r#"{ "data": {
            "id": "12", "username": "Alice", "name": "Alice A",
            "pinned_tweet_id": "99",
            "public_metrics": { "followers_count": 1500, "tweet_count": 42 }
        } }"#;
        let envelope: Envelope<ApiUser> = serde_json::from_str(json).unwrap();
        let account = envelope.data.unwrap().into_account().unwrap();
        assert_eq!(account.handle, "alice");
        assert_eq!(account.upstream_id, 12);
        assert_eq!(account.follower_count, 1500);
        assert_eq!(account.item_count, Some(42));
        assert_eq!(account.pinned_ids, vec!["99".to_string()]);
    }

    #[test]
    fn empty_envelope_errors_are_classified() {
        let suspended: Envelope<ApiUser> = serde_json::from_str(
            r#"{ "errors": [{ "title": "Forbidden", "detail": "User has been suspended: [x]." }] }"#,
        )
        .unwrap();
        assert!(matches!(
            missing::<Account>(&suspended.errors, "x"),
            Err(FetchError::Suspended(_))
        ));

        let absent: Envelope<ApiUser> = serde_json::from_str(
            r#"{ "errors": [{ "title": "Not Found Error", "detail": "Could not find user" }] }"#,
        )
        .unwrap();
        assert!(matches!(missing::<Account>(&absent.errors, "x"), Ok(None)));
    }

    #[test]
    fn ids_encode_creation_time() {
        let ts = id_timestamp("1790000000000000000").unwrap();
        assert_eq!(ts.format("%Y").to_string(), "2024");
        assert!(id_timestamp("abc").is_none());
    }
}
