// src/ingest/config.rs
use std::time::Duration;

use serde::Deserialize;

use crate::retry::Backoff;

/// Upstream endpoints shared by both adapters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub subreddit: String,
    pub listing_base_url: String,
    pub archive_base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            subreddit: "LinkedInLunatics".to_string(),
            listing_base_url: "https://www.reddit.com".to_string(),
            archive_base_url: "https://api.pullpush.io".to_string(),
            user_agent: "identity-corpus-sync/0.1".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl SourcesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Knobs for one ingestion pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Page cap for the primary feed, and for the archive when used as fallback.
    pub max_pages: u32,
    /// Flush to the store after this many newly seen posts.
    pub checkpoint_interval: usize,
    /// Rows per upsert statement batch.
    pub upsert_batch_size: usize,
    pub primary_page_delay_ms: u64,
    pub archive_page_delay_ms: u64,
    /// Walk the archive into the past after the primary pass.
    pub backfill: bool,
    pub max_backfill_pages: u32,
    /// Consecutive pages without unseen ids that end an archive walk.
    pub stale_page_limit: u32,
    pub throttle_retries: u32,
    pub throttle_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_pages: 40,
            checkpoint_interval: 5_000,
            upsert_batch_size: 50,
            primary_page_delay_ms: 1_000,
            archive_page_delay_ms: 2_000,
            backfill: false,
            max_backfill_pages: 200,
            stale_page_limit: 3,
            throttle_retries: 5,
            throttle_backoff_ms: 5_000,
        }
    }
}

impl IngestConfig {
    pub fn primary_page_delay(&self) -> Duration {
        Duration::from_millis(self.primary_page_delay_ms)
    }

    pub fn archive_page_delay(&self) -> Duration {
        Duration::from_millis(self.archive_page_delay_ms)
    }

    pub fn throttle_backoff(&self) -> Backoff {
        Backoff::exponential(
            Duration::from_millis(self.throttle_backoff_ms),
            self.throttle_retries,
        )
    }

    /// Zero delays; keeps page caps and stale limit. For tests and local runs.
    pub fn without_delays(mut self) -> Self {
        self.primary_page_delay_ms = 0;
        self.archive_page_delay_ms = 0;
        self.throttle_backoff_ms = 0;
        self
    }
}
