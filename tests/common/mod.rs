// tests/common/mod.rs
//
// Scripted stand-ins for the upstream feeds, the image host and the vision
// oracle, plus small builders for posts.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use identity_corpus::enrich::image::{FetchedImage, ImageHost, ImageReject};
use identity_corpus::enrich::oracle::{OracleOutcome, VisionOracle};
use identity_corpus::ingest::config::IngestConfig;
use identity_corpus::ingest::types::{FeedError, FeedPage, FeedSource, PageCursor, RawPost};
use identity_corpus::store::{
    IdentityUpdate, NewPost, Post, PostStore, SqlitePostStore, StoreError, SyncRun,
};

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

pub fn memory_store() -> SqlitePostStore {
    SqlitePostStore::open_in_memory().expect("in-memory store")
}

pub fn fast_ingest() -> IngestConfig {
    IngestConfig::default().without_delays()
}

pub fn raw(id: &str, created_utc: i64, score: i64) -> RawPost {
    RawPost {
        id: id.to_string(),
        title: format!("Post {id}"),
        permalink: format!("/r/LinkedInLunatics/comments/{id}/"),
        score,
        created_utc,
        author: "someone".to_string(),
        post_hint: Some("image".to_string()),
        url_overridden_by_dest: Some(format!("https://i.redd.it/{id}.png")),
    }
}

pub fn page(posts: Vec<RawPost>, next: Option<PageCursor>) -> FeedPage {
    FeedPage { posts, next }
}

pub fn new_post(id: &str, title: &str, score: i64, image: bool) -> NewPost {
    NewPost {
        id: id.to_string(),
        title: title.to_string(),
        url: format!("https://reddit.com/r/LinkedInLunatics/comments/{id}/"),
        score,
        created_at: 1_700_000_000 + score,
        author: "someone".to_string(),
        image_url: image.then(|| format!("https://i.redd.it/{id}.png")),
        synced_at: 0,
    }
}

/// Insert a post and, when `name` is given, resolve its identity.
pub fn seed(store: &dyn PostStore, id: &str, title: &str, score: i64, name: Option<&str>) {
    store
        .upsert_posts(&[new_post(id, title, score, true)])
        .expect("seed upsert");
    if let Some(n) = name {
        let update = if n.is_empty() {
            IdentityUpdate::NotFound
        } else {
            IdentityUpdate::Found {
                name: n.to_string(),
                headline: Some(format!("{n} | Thought Leader")),
            }
        };
        assert!(store.set_identity(id, &update).expect("seed identity"));
    }
}

// ---------- stores ----------

/// Delegates to an in-memory store, failing selected calls with
/// `StoreError::LockPoisoned`.
pub struct FaultyStore {
    pub inner: SqlitePostStore,
    unreachable: bool,
    lookups_before_failure: Option<usize>,
    lookups: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: SqlitePostStore) -> Self {
        Self {
            inner,
            unreachable: false,
            lookups_before_failure: None,
            lookups: AtomicUsize::new(0),
        }
    }

    /// `ping` and `record_run` fail, as for a store that went away between runs.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// `existing_ids` succeeds `n` times, then fails.
    pub fn failing_lookups_after(mut self, n: usize) -> Self {
        self.lookups_before_failure = Some(n);
        self
    }
}

impl PostStore for FaultyStore {
    fn ping(&self) -> Result<(), StoreError> {
        if self.unreachable {
            return Err(StoreError::LockPoisoned);
        }
        self.inner.ping()
    }

    fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let call = self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.lookups_before_failure.is_some_and(|n| call >= n) {
            return Err(StoreError::LockPoisoned);
        }
        self.inner.existing_ids(ids)
    }

    fn upsert_posts(&self, posts: &[NewPost]) -> Result<usize, StoreError> {
        self.inner.upsert_posts(posts)
    }

    fn get_posts(&self, ids: &[String]) -> Result<Vec<Post>, StoreError> {
        self.inner.get_posts(ids)
    }

    fn enrichment_candidates(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.inner.enrichment_candidates(limit)
    }

    fn set_identity(&self, id: &str, update: &IdentityUpdate) -> Result<bool, StoreError> {
        self.inner.set_identity(id, update)
    }

    fn hide_post(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.hide_post(id)
    }

    fn visible_posts_matching(
        &self,
        patterns: &[String],
        include_names: bool,
    ) -> Result<Vec<Post>, StoreError> {
        self.inner.visible_posts_matching(patterns, include_names)
    }

    fn search_by_identity(&self, fragment: &str, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.inner.search_by_identity(fragment, limit)
    }

    fn search_by_title(&self, fragment: &str, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.inner.search_by_title(fragment, limit)
    }

    fn identity_posts(&self) -> Result<Vec<Post>, StoreError> {
        self.inner.identity_posts()
    }

    fn count_distinct_identities(&self) -> Result<u64, StoreError> {
        self.inner.count_distinct_identities()
    }

    fn load_cursor(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.inner.load_cursor(key)
    }

    fn save_cursor(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.save_cursor(key, value)
    }

    fn record_run(&self, run: &SyncRun) -> Result<i64, StoreError> {
        if self.unreachable {
            return Err(StoreError::LockPoisoned);
        }
        self.inner.record_run(run)
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        self.inner.recent_runs(limit)
    }
}

// ---------- feeds ----------

/// Pops one scripted response per call; an empty script yields an empty page.
pub struct ScriptedFeed {
    name: &'static str,
    script: Mutex<VecDeque<Result<FeedPage, FeedError>>>,
    cursors: Mutex<Vec<Option<PageCursor>>>,
}

impl ScriptedFeed {
    pub fn new(name: &'static str, script: Vec<Result<FeedPage, FeedError>>) -> Self {
        Self {
            name,
            script: Mutex::new(script.into()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn empty(name: &'static str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn failing(name: &'static str) -> Self {
        Self::new(name, vec![Err(FeedError::Status { status: 503 })])
    }

    /// Cursor passed to every call, in order.
    pub fn cursors(&self) -> Vec<Option<PageCursor>> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.cursors.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn fetch_page(&self, cursor: Option<&PageCursor>) -> Result<FeedPage, FeedError> {
        self.cursors.lock().unwrap().push(cursor.cloned());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FeedPage::default()))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Blocks on every page until the gate is notified.
pub struct GatedFeed {
    pub gate: Arc<Notify>,
}

#[async_trait]
impl FeedSource for GatedFeed {
    async fn fetch_page(&self, _cursor: Option<&PageCursor>) -> Result<FeedPage, FeedError> {
        self.gate.notified().await;
        Ok(FeedPage::default())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

// ---------- images ----------

/// Serves a small PNG for every URL except the ones marked missing or oversized.
#[derive(Default)]
pub struct FakeImages {
    missing: HashSet<String>,
    oversized: HashSet<String>,
}

impl FakeImages {
    pub fn with_missing(mut self, url: &str) -> Self {
        self.missing.insert(url.to_string());
        self
    }

    pub fn with_oversized(mut self, url: &str) -> Self {
        self.oversized.insert(url.to_string());
        self
    }
}

#[async_trait]
impl ImageHost for FakeImages {
    async fn fetch(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>, ImageReject> {
        if self.missing.contains(url) {
            return Err(ImageReject::Unreachable("status 404".into()));
        }
        if self.oversized.contains(url) {
            return Err(ImageReject::TooLarge {
                size: max_bytes + 1,
                limit: max_bytes,
            });
        }
        Ok(PNG.to_vec())
    }

    async fn is_reachable(&self, url: &str) -> bool {
        !self.missing.contains(url)
    }
}

// ---------- oracle ----------

/// Returns scripted outcomes in call order, then `fallback`.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<OracleOutcome>>,
    fallback: OracleOutcome,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<OracleOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: found("Jane Doe"),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(outcome: OracleOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionOracle for ScriptedOracle {
    fn extract<'a>(
        &'a self,
        _image: &'a FetchedImage,
    ) -> Pin<Box<dyn Future<Output = OracleOutcome> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let out = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Box::pin(async move { out })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

pub fn found(name: &str) -> OracleOutcome {
    OracleOutcome::Extracted {
        name: name.to_string(),
        headline: Some("Chief Vibes Officer".to_string()),
    }
}
