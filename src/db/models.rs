// Data models — the entities that flow between the backends, the cache,
// the router and the crawl pipeline.
//
// These are separate from the storage code so other modules can use them
// without depending on rusqlite directly.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote identity being mirrored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Canonical handle, always lower-cased.
    pub handle: String,
    /// Numeric id assigned by the upstream network.
    pub upstream_id: u64,
    pub display_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub protected: bool,
    pub pinned_ids: Vec<String>,
    /// Followers on the upstream network.
    pub follower_count: u64,
    /// Upstream-reported number of items authored, when the backend exposes it.
    pub item_count: Option<u64>,
}

/// One media attachment on a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub mime_type: String,
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub ends_at: DateTime<Utc>,
    pub options: Vec<PollOption>,
}

/// Reference to another item (reply parent or quoted item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub author: Option<String>,
}

/// One unit of remote content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Upstream-native id, unique within one network.
    pub id: String,
    /// Handle of the account the item was fetched from.
    pub author: String,
    /// Set when the item is a reshare of someone else's item.
    pub original_author: Option<String>,
    /// Id of the reshare itself, distinct from `id` of the original.
    pub reshare_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub media: Vec<Media>,
    pub poll: Option<Poll>,
    pub in_reply_to: Option<ItemRef>,
    pub quoted: Option<ItemRef>,
}

impl ContentItem {
    /// The id the crawl cursor should track: the reshare id for reshares,
    /// otherwise the item id.
    pub fn cursor_id(&self) -> &str {
        self.reshare_id.as_deref().unwrap_or(&self.id)
    }
}

/// Crawl cursor for one tracked account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAccount {
    /// Canonical handle, lower-cased.
    pub handle: String,
    /// Upstream numeric id, once resolved.
    pub upstream_id: Option<u64>,
    /// Followers of the bridged account on the federated side; the tiering signal.
    pub follower_count: u64,
    pub last_item_id: Option<String>,
    pub fetch_errors: u32,
    pub last_sync: Option<DateTime<Utc>>,
    /// Upstream item count seen at the last crawl.
    pub item_count: Option<u64>,
}

impl SyncAccount {
    pub fn new(handle: &str, follower_count: u64) -> Self {
        Self {
            handle: canonical_handle(handle),
            upstream_id: None,
            follower_count,
            last_item_id: None,
            fetch_errors: 0,
            last_sync: None,
            item_count: None,
        }
    }
}

/// Lower-case a handle and strip a leading '@'.
pub fn canonical_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

/// Order two upstream ids. Numeric ids compare numerically; anything else
/// falls back to (length, lexical), which matches numeric order for
/// unpadded decimal strings too.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Return whichever id is newer. `None` loses to anything.
pub fn newest_id<'a>(a: Option<&'a str>, b: Option<&'a str>) -> Option<&'a str> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if compare_ids(x, y) == Ordering::Less { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}
