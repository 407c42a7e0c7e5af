//! Post store: the durable keyed table of posts plus the run log.
//!
//! Every pipeline stage talks to storage through [`PostStore`]. The only
//! production implementation is [`sqlite::SqlitePostStore`]; tests use the same
//! implementation opened in memory.

pub mod error;
pub mod migrations;
pub mod sqlite;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use error::StoreError;
pub use sqlite::SqlitePostStore;

/// Grouping/matching key for names and titles: trimmed, Unicode-lowercased.
pub fn name_key(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Identity extracted from a post's image.
///
/// Persisted as `NULL` (unset), `''` (processed, nothing found) or a non-empty
/// name. Once a post leaves `Unset` the pipeline never puts it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Identity {
    Unset,
    NotFound,
    Resolved {
        name: String,
        headline: Option<String>,
    },
}

impl Identity {
    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Resolved { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Identity::Unset)
    }

    /// Build from the two nullable columns.
    pub(crate) fn from_columns(name: Option<String>, headline: Option<String>) -> Self {
        match name {
            None => Identity::Unset,
            Some(n) if n.trim().is_empty() => Identity::NotFound,
            Some(n) => Identity::Resolved {
                name: n,
                headline: headline.filter(|h| !h.trim().is_empty()),
            },
        }
    }
}

/// A stored post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub created_at: i64,
    pub author: String,
    pub image_url: Option<String>,
    pub identity: Identity,
    pub hidden: bool,
    pub synced_at: i64,
}

/// A post as observed by ingestion; only carries fields ingestion may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub id: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub created_at: i64,
    pub author: String,
    pub image_url: Option<String>,
    pub synced_at: i64,
}

/// Identity write issued by the enrichment worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityUpdate {
    Found {
        name: String,
        headline: Option<String>,
    },
    NotFound,
}

/// What triggered a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    Api,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
            RunTrigger::Api => "api",
        }
    }

    /// Parse a trigger label (e.g. the `x-sync-source` header). Unknown → `Manual`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" | "cron" => RunTrigger::Scheduled,
            "api" => RunTrigger::Api,
            _ => RunTrigger::Manual,
        }
    }
}

/// Append-only audit record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub trigger: RunTrigger,
    pub started_at: i64,
    pub fetched: u64,
    pub upserted: u64,
    pub new_posts: u64,
    pub enriched: u64,
    pub hidden: u64,
    pub fallback_used: bool,
    pub success: bool,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Storage surface consumed by every pipeline component.
///
/// Implementations must keep the identity and moderation columns out of the
/// upsert path and guard conditional updates at the row level.
pub trait PostStore: Send + Sync {
    /// Cheap connectivity check used at run start.
    fn ping(&self) -> Result<(), StoreError>;

    /// Subset of `ids` already present.
    fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Insert or refresh posts. Existing rows only get `score`, `author` and
    /// `synced_at` updated. Returns the number of rows written.
    fn upsert_posts(&self, posts: &[NewPost]) -> Result<usize, StoreError>;

    fn get_posts(&self, ids: &[String]) -> Result<Vec<Post>, StoreError>;

    /// Posts with an image and an unset identity, score descending.
    fn enrichment_candidates(&self, limit: usize) -> Result<Vec<Post>, StoreError>;

    /// Compare-and-set identity write. Returns `false` if the row was no longer unset.
    fn set_identity(&self, id: &str, update: &IdentityUpdate) -> Result<bool, StoreError>;

    /// Set `hidden = true`. Returns `false` if the row was already hidden or absent.
    fn hide_post(&self, id: &str) -> Result<bool, StoreError>;

    /// Visible posts whose title (or, when `include_names`, resolved name)
    /// contains any of `patterns`, score descending.
    fn visible_posts_matching(
        &self,
        patterns: &[String],
        include_names: bool,
    ) -> Result<Vec<Post>, StoreError>;

    /// Visible posts whose resolved name contains `fragment`, score descending.
    fn search_by_identity(&self, fragment: &str, limit: usize) -> Result<Vec<Post>, StoreError>;

    /// Visible posts whose title contains `fragment`, score descending.
    fn search_by_title(&self, fragment: &str, limit: usize) -> Result<Vec<Post>, StoreError>;

    /// Every visible post with a resolved identity.
    fn identity_posts(&self) -> Result<Vec<Post>, StoreError>;

    /// Number of distinct (case-insensitive) resolved names among visible posts.
    fn count_distinct_identities(&self) -> Result<u64, StoreError>;

    fn load_cursor(&self, key: &str) -> Result<Option<i64>, StoreError>;

    fn save_cursor(&self, key: &str, value: i64) -> Result<(), StoreError>;

    fn record_run(&self, run: &SyncRun) -> Result<i64, StoreError>;

    fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError>;
}
