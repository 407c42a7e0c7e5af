//! Secondary source: a community archive of submissions, paged backwards in time.
//!
//! Best-effort: it can be down or throttle us. The next cursor is the oldest
//! `created_utc` on the page, so pages walk monotonically into the past.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;

use super::{http_client, status_error};
use crate::ingest::types::{FeedError, FeedPage, FeedSource, PageCursor, RawPost};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Submission>,
}

#[derive(Debug, Deserialize)]
struct Submission {
    id: String,
    #[serde(default)]
    title: String,
    permalink: Option<String>,
    full_link: Option<String>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    author: Option<String>,
    post_hint: Option<String>,
    url_overridden_by_dest: Option<String>,
}

/// Parse one archive page.
pub fn parse_archive(body: &str) -> Result<FeedPage, FeedError> {
    let t0 = Instant::now();
    let resp: SearchResponse = serde_json::from_str(body)?;

    let posts: Vec<RawPost> = resp
        .data
        .into_iter()
        .map(|s| RawPost {
            id: s.id,
            title: s.title,
            permalink: s.permalink.or(s.full_link).unwrap_or_default(),
            score: s.score.unwrap_or(0),
            created_utc: s.created_utc.unwrap_or(0.0) as i64,
            author: s.author.unwrap_or_default(),
            post_hint: s.post_hint,
            url_overridden_by_dest: s.url_overridden_by_dest,
        })
        .collect();

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_events_total").increment(posts.len() as u64);

    let next = posts
        .iter()
        .map(|p| p.created_utc)
        .filter(|ts| *ts > 0)
        .min()
        .map(PageCursor::Before);

    Ok(FeedPage { posts, next })
}

pub struct ArchiveSource {
    client: reqwest::Client,
    base_url: String,
    subreddit: String,
    page_size: u32,
}

impl ArchiveSource {
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
        self.page_size = n.clamp(1, 500);
        self
    }
}

#[async_trait]
impl FeedSource for ArchiveSource {
    async fn fetch_page(&self, cursor: Option<&PageCursor>) -> Result<FeedPage, FeedError> {
        let url = format!("{}/reddit/search/submission/", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("subreddit", self.subreddit.clone()),
            ("size", self.page_size.to_string()),
            ("sort", "desc".to_string()),
            ("sort_type", "created_utc".to_string()),
        ];
        if let Some(PageCursor::Before(ts)) = cursor {
            query.push(("before", ts.to_string()));
        }

        let resp = self.client.get(&url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            counter!("ingest_provider_errors_total").increment(1);
            return Err(status_error(status, resp.headers()));
        }
        let body = resp.text().await?;
        parse_archive(&body)
    }

    fn name(&self) -> &'static str {
        "archive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_cursor_is_oldest_created_utc() {
        let body = r#"{"data":[
            {"id":"a","title":"x","permalink":"/r/x/comments/a/","score":5,"created_utc":1700000300,"author":"u"},
            {"id":"b","title":"y","full_link":"https://www.reddit.com/r/x/comments/b/","created_utc":1700000100},
            {"id":"c","title":"z","permalink":"/r/x/comments/c/","created_utc":1700000200}
        ]}"#;
        let page = parse_archive(body).unwrap();
        assert_eq!(page.posts.len(), 3);
        assert_eq!(page.posts[1].permalink, "https://www.reddit.com/r/x/comments/b/");
        assert_eq!(page.posts[1].score, 0);
        assert_eq!(page.next, Some(PageCursor::Before(1_700_000_100)));
    }

    #[test]
    fn empty_page_has_no_cursor() {
        let page = parse_archive(r#"{"data":[]}"#).unwrap();
        assert!(page.posts.is_empty());
        assert!(page.next.is_none());
    }
}
