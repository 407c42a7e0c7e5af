// src/leaderboard.rs
//! Ranked per-identity aggregates over visible posts.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::store::{name_key, Identity, Post, PostStore, StoreError};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    PeakScore,
    Frequency,
    Recent,
}

impl SortKey {
    /// Unknown or missing → `PeakScore`.
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("frequency") => SortKey::Frequency,
            Some("recent") => SortKey::Recent,
            _ => SortKey::PeakScore,
        }
    }
}

/// Missing → default; otherwise clamped to `1..=100`.
pub fn clamp_limit(limit: Option<i64>) -> usize {
    match limit {
        None => DEFAULT_LIMIT,
        Some(n) => n.clamp(1, MAX_LIMIT as i64) as usize,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub name: String,
    pub headline: Option<String>,
    pub post_count: u64,
    pub peak_score: i64,
    pub peak_post_id: String,
    pub peak_post_title: String,
    pub peak_post_url: String,
    pub latest_created_at: i64,
}

/// Group by case-insensitive name and rank. Hidden or unresolved posts are ignored.
pub fn aggregate(posts: &[Post], key: SortKey, limit: usize) -> Vec<LeaderboardEntry> {
    let mut groups: HashMap<String, LeaderboardEntry> = HashMap::new();

    for post in posts.iter().filter(|p| !p.hidden) {
        let Identity::Resolved { name, headline } = &post.identity else {
            continue;
        };
        let norm = name_key(name);
        if norm.is_empty() {
            continue;
        }
        let entry = groups.entry(norm).or_insert_with(|| LeaderboardEntry {
            name: name.trim().to_string(),
            headline: headline.clone(),
            post_count: 0,
            peak_score: post.score,
            peak_post_id: post.id.clone(),
            peak_post_title: post.title.clone(),
            peak_post_url: post.url.clone(),
            latest_created_at: post.created_at,
        });
        entry.post_count += 1;
        entry.latest_created_at = entry.latest_created_at.max(post.created_at);
        let better = post.score > entry.peak_score
            || (post.score == entry.peak_score && post.id < entry.peak_post_id);
        if better {
            entry.name = name.trim().to_string();
            entry.headline = headline.clone();
            entry.peak_score = post.score;
            entry.peak_post_id = post.id.clone();
            entry.peak_post_title = post.title.clone();
            entry.peak_post_url = post.url.clone();
        }
    }

    let mut entries: Vec<LeaderboardEntry> = groups.into_values().collect();
    entries.sort_by(|a, b| compare(a, b, key));
    entries.truncate(limit.clamp(1, MAX_LIMIT));
    entries
}

fn compare(a: &LeaderboardEntry, b: &LeaderboardEntry, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::PeakScore => b.peak_score.cmp(&a.peak_score),
        SortKey::Frequency => b.post_count.cmp(&a.post_count),
        SortKey::Recent => b.latest_created_at.cmp(&a.latest_created_at),
    };
    primary
        .then_with(|| b.peak_score.cmp(&a.peak_score))
        .then_with(|| b.post_count.cmp(&a.post_count))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

pub fn rank(store: &dyn PostStore, key: SortKey, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
    let posts = store.identity_posts()?;
    Ok(aggregate(&posts, key, limit))
}

pub fn count_identities(store: &dyn PostStore) -> Result<u64, StoreError> {
    store.count_distinct_identities()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, name: &str, score: i64, created_at: i64) -> Post {
        Post {
            id: id.into(),
            title: format!("post {id}"),
            url: format!("https://reddit.com/{id}"),
            score,
            created_at,
            author: "u".into(),
            image_url: Some("https://i.redd.it/x.png".into()),
            identity: Identity::Resolved {
                name: name.into(),
                headline: Some(format!("{name} headline")),
            },
            hidden: false,
            synced_at: 0,
        }
    }

    #[test]
    fn peak_score_example() {
        let posts = vec![post("a1", "A", 10, 1), post("a2", "a", 50, 2), post("b1", "B", 30, 3)];
        let out = aggregate(&posts, SortKey::PeakScore, 50);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "a");
        assert_eq!(out[0].post_count, 2);
        assert_eq!(out[0].peak_score, 50);
        assert_eq!(out[0].peak_post_id, "a2");
        assert_eq!(out[1].name, "B");
        assert_eq!(out[1].peak_score, 30);
    }

    #[test]
    fn frequency_and_recent_orderings() {
        let posts = vec![
            post("a1", "A", 10, 1),
            post("a2", "A", 5, 2),
            post("b1", "B", 30, 9),
        ];
        let by_freq = aggregate(&posts, SortKey::Frequency, 50);
        assert_eq!(by_freq[0].name, "A");
        let by_recent = aggregate(&posts, SortKey::Recent, 50);
        assert_eq!(by_recent[0].name, "B");
        assert_eq!(aggregate(&posts, SortKey::Recent, 1).len(), 1);
    }

    #[test]
    fn peak_ties_go_to_earliest_id() {
        let posts = vec![post("z9", "A", 10, 1), post("a1", "A", 10, 2)];
        assert_eq!(aggregate(&posts, SortKey::PeakScore, 5)[0].peak_post_id, "a1");
    }

    #[test]
    fn distinct_count_agrees_with_groups_for_non_ascii_names() {
        let store = crate::store::SqlitePostStore::open_in_memory().unwrap();
        for (id, name) in [("e1", "Émile Roy"), ("e2", "émile roy"), ("e3", " ÉMILE ROY ")] {
            store
                .upsert_posts(&[crate::store::NewPost {
                    id: id.into(),
                    title: "t".into(),
                    url: format!("https://reddit.com/{id}"),
                    score: 1,
                    created_at: 1,
                    author: "u".into(),
                    image_url: Some("https://i.redd.it/x.png".into()),
                    synced_at: 0,
                }])
                .unwrap();
            store
                .set_identity(
                    id,
                    &crate::store::IdentityUpdate::Found {
                        name: name.into(),
                        headline: None,
                    },
                )
                .unwrap();
        }
        let groups = rank(&store, SortKey::PeakScore, 50).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(count_identities(&store).unwrap(), 1);
    }

    #[test]
    fn sort_and_limit_parsing() {
        assert_eq!(SortKey::parse(Some("frequency")), SortKey::Frequency);
        assert_eq!(SortKey::parse(Some("bogus")), SortKey::PeakScore);
        assert_eq!(SortKey::parse(None), SortKey::PeakScore);
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), 100);
    }
}
