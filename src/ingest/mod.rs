// src/ingest/mod.rs
//! Ingestion coordinator: pages the primary feed, falls back to / backfills
//! from the archive, deduplicates, and checkpoints upserts into the store.

pub mod config;
pub mod providers;
pub mod types;

use std::collections::HashSet;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::Serialize;

use crate::ingest::config::IngestConfig;
use crate::ingest::types::{FeedError, FeedSource, PageCursor, RawPost};
use crate::store::{NewPost, PostStore};

/// Store key of the archive backfill cursor.
pub const BACKFILL_CURSOR_KEY: &str = "archive_backfill_before";

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Total posts parsed from providers.");
        describe_counter!("ingest_kept_total", "Posts admitted for upsert.");
        describe_counter!(
            "ingest_dedup_total",
            "Posts dropped as already seen in this run."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_counter!("ingest_throttled_total", "Throttle responses from providers.");
        describe_counter!("ingest_checkpoints_total", "Checkpoint flushes to the store.");
        describe_counter!("ingest_upsert_errors_total", "Failed upsert chunks.");
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingestion last ran."
        );
    });
}

/// Decode entities, collapse whitespace, trim, cap length.
pub fn normalize_title(s: &str) -> String {
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

    let decoded = html_escape::decode_html_entities(s);
    let mut out = RE_WS.replace_all(&decoded, " ").trim().to_string();
    if out.chars().count() > 300 {
        out = out.chars().take(300).collect();
    }
    out
}

/// Absolute post link from a permalink that may be site-relative.
pub fn normalize_permalink(permalink: &str) -> String {
    let p = permalink.trim();
    if p.starts_with("http://") || p.starts_with("https://") {
        return p.to_string();
    }
    if p.starts_with('/') {
        format!("https://reddit.com{p}")
    } else {
        format!("https://reddit.com/{p}")
    }
}

/// Best-guess direct image link from listing metadata.
pub fn derive_image_url(post_hint: Option<&str>, dest: Option<&str>) -> Option<String> {
    static RE_EXT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\.(jpg|jpeg|png|webp)(\?.*)?$").expect("image extension regex")
    });

    let dest = dest.map(str::trim).filter(|d| !d.is_empty())?;
    if post_hint == Some("image") {
        return Some(dest.to_string());
    }
    if RE_EXT.is_match(dest) {
        return Some(dest.to_string());
    }
    if dest.contains("i.redd.it") || dest.contains("i.imgur.com") {
        return Some(dest.to_string());
    }
    None
}

/// Why an archive walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStop {
    /// `stale_page_limit` consecutive pages without unseen ids.
    Stale,
    /// Empty page or no further cursor.
    Exhausted,
    PageLimit,
    /// Throttle retries ran out.
    Throttled,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub fetched: u64,
    pub upserted: u64,
    /// Ids not present in the store before this run; eligible for same-run moderation.
    pub new_ids: Vec<String>,
    pub fallback_used: bool,
    pub primary_pages: u32,
    pub archive_pages: u32,
    pub archive_stop: Option<ArchiveStop>,
    pub checkpoints: u32,
    pub errors: Vec<String>,
}

/// Accumulates admitted posts and flushes them to the store at a fixed cadence.
struct Checkpointer<'a> {
    store: &'a dyn PostStore,
    interval: usize,
    chunk_size: usize,
    pending: Vec<NewPost>,
    seen: HashSet<String>,
    /// Ids the admit-time lookup found already stored.
    stored_at_admit: HashSet<String>,
    oldest_seen: Option<i64>,
    pending_cursor: Option<i64>,
}

impl<'a> Checkpointer<'a> {
    fn new(store: &'a dyn PostStore, cfg: &IngestConfig) -> Self {
        Self {
            store,
            interval: cfg.checkpoint_interval.max(1),
            chunk_size: cfg.upsert_batch_size.max(1),
            pending: Vec::new(),
            seen: HashSet::new(),
            stored_at_admit: HashSet::new(),
            oldest_seen: None,
            pending_cursor: None,
        }
    }

    /// Admit one page. Returns how many ids were neither seen in this run nor stored.
    fn admit(&mut self, posts: Vec<RawPost>, summary: &mut IngestSummary) -> usize {
        let now = chrono::Utc::now().timestamp();
        summary.fetched += posts.len() as u64;

        let page_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let stored = match self.store.existing_ids(&page_ids) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "existing-id lookup failed");
                HashSet::new()
            }
        };

        let mut unseen = 0usize;
        let mut dedup = 0u64;
        for raw in posts {
            if !self.seen.insert(raw.id.clone()) {
                dedup += 1;
                continue;
            }
            if stored.contains(&raw.id) {
                self.stored_at_admit.insert(raw.id.clone());
            } else {
                unseen += 1;
            }
            if raw.created_utc > 0 {
                self.oldest_seen = Some(
                    self.oldest_seen
                        .map_or(raw.created_utc, |o| o.min(raw.created_utc)),
                );
            }
            self.pending.push(raw.into_new_post(now));
        }

        counter!("ingest_dedup_total").increment(dedup);
        unseen
    }

    fn due(&self) -> bool {
        self.pending.len() >= self.interval
    }

    /// Upsert everything pending. Failed chunks are logged and skipped.
    fn flush(&mut self, summary: &mut IngestSummary) {
        if self.pending.is_empty() {
            self.save_cursor(summary);
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let ids: Vec<String> = batch.iter().map(|p| p.id.clone()).collect();
        let looked_up = match self.store.existing_ids(&ids) {
            Ok(s) => Some(s),
            Err(e) => {
                let msg = format!("checkpoint: existing-id lookup failed: {e}");
                tracing::warn!(target: "ingest", error = %e, "existing-id lookup failed");
                summary.errors.push(msg);
                None
            }
        };
        // Without a fresh lookup, anything not known stored at admit counts as new.
        let existing = looked_up.as_ref().unwrap_or(&self.stored_at_admit);

        for chunk in batch.chunks(self.chunk_size) {
            match self.store.upsert_posts(chunk) {
                Ok(_) => {
                    summary.upserted += chunk.len() as u64;
                    summary.new_ids.extend(
                        chunk
                            .iter()
                            .filter(|p| !existing.contains(&p.id))
                            .map(|p| p.id.clone()),
                    );
                }
                Err(e) => {
                    counter!("ingest_upsert_errors_total").increment(1);
                    tracing::warn!(target: "ingest", error = %e, size = chunk.len(), "upsert chunk failed");
                    summary.errors.push(format!("upsert batch error: {e}"));
                }
            }
        }

        summary.checkpoints += 1;
        counter!("ingest_checkpoints_total").increment(1);
        counter!("ingest_kept_total").increment(batch.len() as u64);
        tracing::info!(
            target: "ingest",
            flushed = batch.len(),
            upserted = summary.upserted,
            "checkpoint"
        );
        self.save_cursor(summary);
    }

    fn save_cursor(&mut self, summary: &mut IngestSummary) {
        if let Some(ts) = self.pending_cursor.take() {
            if let Err(e) = self.store.save_cursor(BACKFILL_CURSOR_KEY, ts) {
                summary.errors.push(format!("saving backfill cursor failed: {e}"));
            }
        }
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

/// Drives both adapters for one ingestion pass.
pub struct IngestCoordinator<'a> {
    store: &'a dyn PostStore,
    primary: &'a dyn FeedSource,
    secondary: &'a dyn FeedSource,
    cfg: &'a IngestConfig,
}

impl<'a> IngestCoordinator<'a> {
    pub fn new(
        store: &'a dyn PostStore,
        primary: &'a dyn FeedSource,
        secondary: &'a dyn FeedSource,
        cfg: &'a IngestConfig,
    ) -> Self {
        Self {
            store,
            primary,
            secondary,
            cfg,
        }
    }

    /// Run one pass: primary (or fallback), optional backfill, final flush.
    pub async fn run(&self) -> IngestSummary {
        ensure_metrics_described();

        let mut summary = IngestSummary::default();
        let mut ck = Checkpointer::new(self.store, self.cfg);

        if let Err(e) = self.page_primary(&mut ck, &mut summary).await {
            summary.fallback_used = true;
            summary.errors.push(format!(
                "{} failed: {e}, falling back to {}",
                self.primary.name(),
                self.secondary.name()
            ));
            tracing::warn!(
                target: "ingest",
                error = %e,
                primary = self.primary.name(),
                "primary feed failed; falling back"
            );
            let stop = self
                .walk_archive(&mut ck, &mut summary, None, self.cfg.max_pages, false)
                .await;
            summary.archive_stop = Some(stop);
        }

        if self.cfg.backfill {
            let start = match self.store.load_cursor(BACKFILL_CURSOR_KEY) {
                Ok(Some(ts)) => Some(ts),
                Ok(None) => ck.oldest_seen,
                Err(e) => {
                    summary.errors.push(format!("loading backfill cursor failed: {e}"));
                    ck.oldest_seen
                }
            };
            let stop = self
                .walk_archive(
                    &mut ck,
                    &mut summary,
                    start,
                    self.cfg.max_backfill_pages,
                    true,
                )
                .await;
            summary.archive_stop = Some(stop);
        }

        ck.flush(&mut summary);

        if summary.fetched == 0 && !summary.errors.is_empty() {
            tracing::warn!(target: "ingest", "no source produced posts this run");
        }
        gauge!("ingest_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            target: "ingest",
            fetched = summary.fetched,
            upserted = summary.upserted,
            new = summary.new_ids.len(),
            fallback = summary.fallback_used,
            "ingest pass finished"
        );
        summary
    }

    async fn page_primary(
        &self,
        ck: &mut Checkpointer<'_>,
        summary: &mut IngestSummary,
    ) -> Result<(), FeedError> {
        let mut cursor: Option<PageCursor> = None;
        for page_no in 0..self.cfg.max_pages {
            if page_no > 0 {
                pause(self.cfg.primary_page_delay()).await;
            }
            let page = self.primary.fetch_page(cursor.as_ref()).await.map_err(|e| {
                counter!("ingest_provider_errors_total").increment(1);
                e
            })?;
            summary.primary_pages += 1;
            let n = page.posts.len();
            ck.admit(page.posts, summary);
            if ck.due() {
                ck.flush(summary);
            }
            tracing::debug!(target: "ingest", page = page_no + 1, posts = n, "primary page");

            cursor = page.next;
            if cursor.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Page the archive backwards in time from `start` (newest when `None`).
    async fn walk_archive(
        &self,
        ck: &mut Checkpointer<'_>,
        summary: &mut IngestSummary,
        start: Option<i64>,
        max_pages: u32,
        persist_cursor: bool,
    ) -> ArchiveStop {
        let mut cursor = start.map(PageCursor::Before);
        let mut stale = 0u32;

        for page_no in 0..max_pages {
            if page_no > 0 {
                pause(self.cfg.archive_page_delay()).await;
            }

            let page = match self.fetch_with_retry(cursor.as_ref()).await {
                Ok(p) => p,
                Err(FeedError::Throttled { .. }) => {
                    summary
                        .errors
                        .push(format!("{}: throttle retries exhausted", self.secondary.name()));
                    return ArchiveStop::Throttled;
                }
                Err(e) => {
                    counter!("ingest_provider_errors_total").increment(1);
                    tracing::warn!(target: "ingest", error = %e, source = self.secondary.name(), "archive page failed");
                    summary
                        .errors
                        .push(format!("{} failed: {e}", self.secondary.name()));
                    return ArchiveStop::Failed;
                }
            };
            summary.archive_pages += 1;

            if page.posts.is_empty() {
                return ArchiveStop::Exhausted;
            }

            let unseen = ck.admit(page.posts, summary);
            if unseen == 0 {
                stale += 1;
                tracing::debug!(target: "ingest", stale, "stale archive page");
            } else {
                stale = 0;
            }

            let next = match (page.next, &cursor) {
                (Some(PageCursor::Before(n)), Some(PageCursor::Before(prev))) if n >= *prev => {
                    tracing::warn!(target: "ingest", next = n, prev, "archive cursor did not advance");
                    None
                }
                (Some(PageCursor::Before(n)), _) => Some(n),
                _ => None,
            };
            if persist_cursor {
                if let Some(n) = next {
                    ck.pending_cursor = Some(n);
                }
            }
            if ck.due() {
                ck.flush(summary);
            }

            if stale >= self.cfg.stale_page_limit {
                return ArchiveStop::Stale;
            }
            match next {
                Some(n) => cursor = Some(PageCursor::Before(n)),
                None => return ArchiveStop::Exhausted,
            }
        }
        ArchiveStop::PageLimit
    }

    /// Fetch one archive page, retrying the same cursor while throttled.
    async fn fetch_with_retry(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<types::FeedPage, FeedError> {
        let backoff = self.cfg.throttle_backoff();
        let mut attempt = 0u32;
        loop {
            match self.secondary.fetch_page(cursor).await {
                Err(FeedError::Throttled { retry_after }) => {
                    counter!("ingest_throttled_total").increment(1);
                    attempt += 1;
                    let Some(wait) = backoff.delay_for(attempt, retry_after) else {
                        return Err(FeedError::Throttled { retry_after });
                    };
                    tracing::info!(
                        target: "ingest",
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "archive throttled; retrying same page"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}
