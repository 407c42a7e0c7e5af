// src/identity.rs
//! Name search over resolved identities, with a title fallback.
//!
//! Matching is token based: the query's last token must equal the candidate's
//! last name token, and the first tokens must be compatible
//! (see [`first_name_matches`]).

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::store::{Post, PostStore, StoreError};

const MIN_QUERY_CHARS: usize = 2;
const MAX_QUERY_CHARS: usize = 100;
const CANDIDATE_CAP: usize = 50;
const RESULT_CAP: usize = 10;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid name parameter")]
    InvalidQuery,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Public projection of a search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub created: i64,
}

impl From<Post> for SearchHit {
    fn from(p: Post) -> Self {
        Self {
            id: p.id,
            title: p.title,
            url: p.url,
            score: p.score,
            created: p.created_at,
        }
    }
}

/// Short stable id for a query so logs never carry the raw text.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Trim, bound, strip to letters/digits/whitespace/`.`/`-`, lowercase.
pub fn sanitize_query(raw: &str) -> Result<String, SearchError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(MIN_QUERY_CHARS..=MAX_QUERY_CHARS).contains(&len) {
        return Err(SearchError::InvalidQuery);
    }
    let kept: String = trimmed
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '.' || *c == '-')
        .collect::<String>()
        .to_lowercase();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(SearchError::InvalidQuery);
    }
    Ok(collapsed)
}

/// Exact (case-insensitive) match, or the shorter is a prefix of the longer
/// and the longer is at least 3 chars longer: "Chris" ~ "Christopher", not "Ken" ~ "Kent".
pub fn first_name_matches(a: &str, b: &str) -> bool {
    let la = a.to_lowercase();
    let lb = b.to_lowercase();
    if la == lb {
        return true;
    }
    let (shorter, longer) = if la.chars().count() <= lb.chars().count() {
        (la, lb)
    } else {
        (lb, la)
    };
    longer.starts_with(&shorter) && longer.chars().count() - shorter.chars().count() >= 3
}

fn first_and_last(s: &str) -> Option<(String, String)> {
    let lower = s.trim().to_lowercase();
    let mut parts = lower.split_whitespace();
    let first = parts.next()?.to_string();
    let last = parts.last().map(str::to_string).unwrap_or_else(|| first.clone());
    Some((first, last))
}

/// Deterministic name search. Hidden posts never appear.
pub fn search(store: &dyn PostStore, query: &str) -> Result<Vec<Post>, SearchError> {
    let sanitized = sanitize_query(query)?;
    let qid = anon_hash(&sanitized);
    let Some((q_first, q_last)) = first_and_last(&sanitized) else {
        return Err(SearchError::InvalidQuery);
    };

    let candidates = store.search_by_identity(&q_last, CANDIDATE_CAP)?;
    let hits: Vec<Post> = candidates
        .into_iter()
        .filter(|p| {
            p.identity
                .name()
                .and_then(first_and_last)
                .is_some_and(|(first, last)| last == q_last && first_name_matches(&q_first, &first))
        })
        .take(RESULT_CAP)
        .collect();

    if !hits.is_empty() {
        info!(target: "search", %qid, hits = hits.len(), "identity search");
        return Ok(hits);
    }

    let fallback = store.search_by_title(&sanitized, RESULT_CAP)?;
    info!(target: "search", %qid, hits = fallback.len(), "title fallback search");
    Ok(fallback)
}
