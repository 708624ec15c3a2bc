// Syndication backend — the public, unauthenticated embed endpoint.
//
// Only single items can be fetched here. It is the last resort for content
// item lookups when the primary API is rate limited or down.

use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::{canonical_handle, ContentItem, ItemRef, Media};
use crate::error::FetchError;
use crate::sources::api::id_timestamp;
use crate::sources::client::{get_json, HttpClients};
use crate::sources::wire::guess_mime;

const BACKEND: &str = "syndication";

/// Fraction digits kept when rendering the request token.
const TOKEN_FRACTION_DIGITS: usize = 10;

pub struct SyndicationBackend {
    client: reqwest::Client,
    base_url: String,
}

impl SyndicationBackend {
    pub fn new(clients: &HttpClients, base_url: &str) -> Self {
        Self {
            client: clients.direct().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn item(&self, id: &str) -> Result<Option<ContentItem>, FetchError> {
        let token = item_token(id)
            .ok_or_else(|| FetchError::NotFound(format!("{id} (not a numeric id)")))?;
        let url = format!("{}/tweet-result", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("id", id), ("token", token.as_str()), ("lang", "en")]);

        match get_json::<SyndicatedItem>(request, BACKEND, id).await {
            Ok(item) => Ok(item.into_content_item()),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Request token the endpoint expects alongside an item id: the id scaled
/// by π/10¹⁵ in base 36, with zeros and the radix point removed.
pub fn item_token(id: &str) -> Option<String> {
    let id: u64 = id.parse().ok()?;
    let value = (id as f64 / 1e15) * PI;
    Some(
        to_base36(value)
            .chars()
            .filter(|c| *c != '0' && *c != '.')
            .collect(),
    )
}

fn to_base36(value: f64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut whole = value.trunc() as u64;
    let mut fraction = value.fract();

    let mut int_digits = Vec::new();
    loop {
        int_digits.push(DIGITS[(whole % 36) as usize] as char);
        whole /= 36;
        if whole == 0 {
            break;
        }
    }
    let mut out: String = int_digits.into_iter().rev().collect();

    if fraction > 0.0 {
        out.push('.');
        for _ in 0..TOKEN_FRACTION_DIGITS {
            fraction *= 36.0;
            let digit = fraction.trunc() as usize;
            out.push(DIGITS[digit.min(35)] as char);
            fraction = fraction.fract();
            if fraction == 0.0 {
                break;
            }
        }
    }
    out
}

// -- Serde types for the syndication payload --

#[derive(Debug, Deserialize)]
struct SyndicatedItem {
    #[serde(rename = "__typename")]
    typename: Option<String>,
    id_str: Option<String>,
    #[serde(default)]
    text: String,
    created_at: Option<DateTime<Utc>>,
    user: Option<SyndicatedUser>,
    #[serde(rename = "mediaDetails", default)]
    media_details: Vec<SyndicatedMedia>,
    in_reply_to_status_id_str: Option<String>,
    in_reply_to_screen_name: Option<String>,
    quoted_tweet: Option<Box<SyndicatedItem>>,
}

#[derive(Debug, Deserialize)]
struct SyndicatedUser {
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct SyndicatedMedia {
    media_url_https: String,
    #[serde(rename = "type", default)]
    kind: String,
    ext_alt_text: Option<String>,
}

impl SyndicatedItem {
    /// `None` for tombstones and empty payloads.
    fn into_content_item(self) -> Option<ContentItem> {
        if self.typename.as_deref() == Some("TweetTombstone") {
            return None;
        }
        let id = self.id_str?;
        let author = self
            .user
            .map(|u| canonical_handle(&u.screen_name))
            .unwrap_or_default();
        let created_at = self
            .created_at
            .or_else(|| id_timestamp(&id))
            .unwrap_or_else(Utc::now);

        Some(ContentItem {
            author,
            original_author: None,
            reshare_id: None,
            body: self.text,
            created_at,
            media: self
                .media_details
                .into_iter()
                .map(|m| Media {
                    mime_type: guess_mime(&m.media_url_https, &m.kind),
                    url: m.media_url_https,
                    alt_text: m.ext_alt_text.filter(|a| !a.is_empty()),
                })
                .collect(),
            poll: None,
            in_reply_to: self.in_reply_to_status_id_str.map(|parent| ItemRef {
                id: parent,
                author: self.in_reply_to_screen_name.map(|a| canonical_handle(&a)),
            }),
            quoted: self.quoted_tweet.and_then(|q| {
                Some(ItemRef {
                    id: q.id_str?,
                    author: q.user.map(|u| canonical_handle(&u.screen_name)),
                })
            }),
            id,
        })
    }
}
