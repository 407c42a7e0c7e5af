//! Primary feed: the subreddit's `new` listing, cursor-paginated, newest first.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;

use super::{http_client, status_error};
use crate::ingest::types::{FeedError, FeedPage, FeedSource, PageCursor, RawPost};

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: ChildData,
}

#[derive(Debug, Deserialize)]
struct ChildData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    author: String,
    post_hint: Option<String>,
    url_overridden_by_dest: Option<String>,
}

/// Parse one listing page. The `after` token becomes the next cursor.
pub fn parse_listing(body: &str) -> Result<FeedPage, FeedError> {
    let t0 = Instant::now();
    let listing: Listing = serde_json::from_str(body)?;

    let posts: Vec<RawPost> = listing
        .data
        .children
        .into_iter()
        .map(|c| RawPost {
            id: c.data.id,
            title: c.data.title,
            permalink: c.data.permalink,
            score: c.data.score,
            created_utc: c.data.created_utc as i64,
            author: c.data.author,
            post_hint: c.data.post_hint,
            url_overridden_by_dest: c.data.url_overridden_by_dest,
        })
        .collect();

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_events_total").increment(posts.len() as u64);

    Ok(FeedPage {
        posts,
        next: listing
            .data
            .after
            .filter(|a| !a.is_empty())
            .map(PageCursor::After),
    })
}

pub struct ListingSource {
    client: reqwest::Client,
    base_url: String,
    subreddit: String,
    page_size: u32,
}

impl ListingSource {
    pub fn new(
        base_url: &str,
        subreddit: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            client: http_client(user_agent, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            subreddit: subreddit.to_string(),
            page_size: 100,
        })
    }

    pub fn with_page_size(mut self, n: u32) -> Self {
        self.page_size = n.clamp(1, 100);
        self
    }
}

#[async_trait]
impl FeedSource for ListingSource {
    async fn fetch_page(&self, cursor: Option<&PageCursor>) -> Result<FeedPage, FeedError> {
        let url = format!("{}/r/{}/new.json", self.base_url, self.subreddit);
        let mut query: Vec<(&str, String)> = vec![
            ("limit", self.page_size.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(PageCursor::After(after)) = cursor {
            query.push(("after", after.clone()));
        }

        let resp = self.client.get(&url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            counter!("ingest_provider_errors_total").increment(1);
            return Err(status_error(status, resp.headers()));
        }
        let body = resp.text().await?;
        parse_listing(&body)
    }

    fn name(&self) -> &'static str {
        "listing"
    }
}
