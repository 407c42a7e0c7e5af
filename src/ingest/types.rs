// src/ingest/types.rs
use std::time::Duration;

use thiserror::Error;

use crate::store::NewPost;

/// A post as returned by an upstream feed, before normalization.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawPost {
    pub id: String,
    pub title: String,
    pub permalink: String,
    pub score: i64,
    pub created_utc: i64, // unix seconds
    pub author: String,
    pub post_hint: Option<String>,
    pub url_overridden_by_dest: Option<String>,
}

impl RawPost {
    /// Normalize into the shape ingestion writes.
    pub fn into_new_post(self, synced_at: i64) -> NewPost {
        let image_url = crate::ingest::derive_image_url(
            self.post_hint.as_deref(),
            self.url_overridden_by_dest.as_deref(),
        );
        NewPost {
            url: crate::ingest::normalize_permalink(&self.permalink),
            title: crate::ingest::normalize_title(&self.title),
            id: self.id,
            score: self.score,
            created_at: self.created_utc,
            author: self.author,
            image_url,
            synced_at,
        }
    }
}

/// Where to continue paging from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Opaque "after" token (primary feed).
    After(String),
    /// Only posts created strictly before this unix timestamp (archive).
    Before(i64),
}

#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub posts: Vec<RawPost>,
    pub next: Option<PageCursor>,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned status {status}")]
    Status { status: u16 },

    #[error("throttled by upstream")]
    Throttled { retry_after: Option<Duration> },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

/// A read-only paginated source of posts.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one page. `None` asks for the newest page.
    async fn fetch_page(&self, cursor: Option<&PageCursor>) -> Result<FeedPage, FeedError>;
    fn name(&self) -> &'static str;
}
