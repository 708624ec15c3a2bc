// Flat JSON shapes served by the scraping proxy and the mirror services.
//
// Both surfaces are thin services in front of the upstream web frontend and
// share one response format; the primary API and the syndication endpoint
// have their own shapes in their modules.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::{canonical_handle, Account, ContentItem, ItemRef, Media, Poll, PollOption};

#[derive(Debug, Deserialize)]
pub struct FlatUser {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub pinned: Vec<String>,
    #[serde(default)]
    pub followers: u64,
    pub posts: Option<u64>,
}

impl From<FlatUser> for Account {
    fn from(u: FlatUser) -> Self {
        Account {
            handle: canonical_handle(&u.username),
            upstream_id: u.id,
            display_name: u.name,
            bio: u.bio,
            avatar_url: u.avatar,
            banner_url: u.banner,
            protected: u.protected,
            pinned_ids: u.pinned,
            follower_count: u.followers,
            item_count: u.posts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FlatRef {
    pub id: String,
    pub author: Option<String>,
}

impl From<FlatRef> for ItemRef {
    fn from(r: FlatRef) -> Self {
        ItemRef {
            id: r.id,
            author: r.author.map(|a| canonical_handle(&a)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FlatMedia {
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub alt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FlatPollOption {
    pub label: String,
    #[serde(default)]
    pub votes: u64,
}

#[derive(Debug, Deserialize)]
pub struct FlatPoll {
    pub ends_at: DateTime<Utc>,
    pub options: Vec<FlatPollOption>,
}

/// Set when a timeline entry is a reshare: the post fields describe the
/// original, this describes the reshare.
#[derive(Debug, Deserialize)]
pub struct FlatReshare {
    pub id: String,
    pub by: String,
}

#[derive(Debug, Deserialize)]
pub struct FlatPost {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub media: Vec<FlatMedia>,
    pub poll: Option<FlatPoll>,
    pub reply_to: Option<FlatRef>,
    pub quote: Option<FlatRef>,
    pub reshare: Option<FlatReshare>,
}

impl From<FlatPost> for ContentItem {
    fn from(p: FlatPost) -> Self {
        let original = canonical_handle(&p.author);
        let (author, original_author, reshare_id) = match p.reshare {
            Some(r) => (canonical_handle(&r.by), Some(original), Some(r.id)),
            None => (original, None, None),
        };

        ContentItem {
            id: p.id,
            author,
            original_author,
            reshare_id,
            body: p.text,
            created_at: p.created_at,
            media: p
                .media
                .into_iter()
                .map(|m| Media {
                    mime_type: guess_mime(&m.url, &m.kind),
                    url: m.url,
                    alt_text: m.alt.filter(|a| !a.is_empty()),
                })
                .collect(),
            poll: p.poll.map(|poll| Poll {
                ends_at: poll.ends_at,
                options: poll
                    .options
                    .into_iter()
                    .map(|o| PollOption {
                        label: o.label,
                        count: o.votes,
                    })
                    .collect(),
            }),
            in_reply_to: p.reply_to.map(ItemRef::from),
            quoted: p.quote.map(ItemRef::from),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FlatTimeline {
    #[serde(default)]
    pub items: Vec<FlatPost>,
}

/// Best-effort mime type from the media kind and URL extension.
pub fn guess_mime(url: &str, kind: &str) -> String {
    match kind {
        "video" | "animated_gif" | "gif" => return "video/mp4".to_string(),
        _ => {}
    }
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    let mime = if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".mp4") {
        "video/mp4"
    } else {
        "image/jpeg"
    };
    mime.to_string()
}

/// Upstream ids arrive as strings from some services and numbers from others.
pub fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(u64),
        Str(String),
    }

    match Id::deserialize(deserializer)? {
        Id::Num(n) => Ok(n),
        Id::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
