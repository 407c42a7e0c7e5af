//! SQLite-backed [`PostStore`].
//!
//! A single rusqlite connection behind a `Mutex`; SQLite serializes writes
//! anyway and the pipeline runs one task at a time.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    migrations, name_key, Identity, IdentityUpdate, NewPost, Post, PostStore, StoreError, SyncRun,
};

/// SQLite keeps a conservative bound on host parameters per statement.
const MAX_PARAMS_PER_QUERY: usize = 500;

const POST_COLUMNS: &str = "id, title, url, score, created_at, author, image_url, \
                            extracted_name, extracted_headline, hidden, synced_at";

#[derive(Clone)]
pub struct SqlitePostStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePostStore {
    /// Opens (or creates) the database at `path` and runs pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        register_functions(&conn)?;
        migrations::run_all(&conn)?;

        tracing::info!(target: "store", path = %path.display(), "post store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database with the full schema. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        register_functions(&conn)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    fn query_posts(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Post>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// `fold_key(text)`: trimmed, Unicode-lowercased. SQLite's own `lower` and
/// `LIKE` only fold ASCII, so every case-insensitive comparison goes through this.
fn register_functions(conn: &Connection) -> Result<(), StoreError> {
    conn.create_scalar_function(
        "fold_key",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| name_key(&t)))
        },
    )?;
    Ok(())
}

fn post_from_row(row: &Row<'_>) -> Result<Post, rusqlite::Error> {
    let name: Option<String> = row.get("extracted_name")?;
    let headline: Option<String> = row.get("extracted_headline")?;
    Ok(Post {
        id: row.get("id")?,
        title: row.get("title")?,
        url: row.get("url")?,
        score: row.get("score")?,
        created_at: row.get("created_at")?,
        author: row.get("author")?,
        image_url: row.get("image_url")?,
        identity: Identity::from_columns(name, headline),
        hidden: row.get("hidden")?,
        synced_at: row.get("synced_at")?,
    })
}

/// `%fragment%`, folded like `fold_key`, with LIKE wildcards escaped
/// (paired with `ESCAPE '\'`).
fn like_pattern(fragment: &str) -> String {
    let fragment = fragment.to_lowercase();
    let mut out = String::with_capacity(fragment.len() + 2);
    out.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

impl PostStore for SqlitePostStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
    }

    fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        self.with_conn(|conn| {
            let mut found = HashSet::new();
            for chunk in ids.chunks(MAX_PARAMS_PER_QUERY) {
                let sql = format!(
                    "SELECT id FROM posts WHERE id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    r.get::<_, String>(0)
                })?;
                for id in rows {
                    found.insert(id?);
                }
            }
            Ok(found)
        })
    }

    fn upsert_posts(&self, posts: &[NewPost]) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0usize;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO posts (id, title, url, score, created_at, author, image_url,
                                        extracted_name, hidden, synced_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                        score = excluded.score,
                        author = excluded.author,
                        synced_at = excluded.synced_at",
                )?;
                for p in posts {
                    // No image means nothing to enrich: mark processed on insert.
                    let sentinel: Option<&str> = p.image_url.is_none().then_some("");
                    written += stmt.execute(params![
                        p.id,
                        p.title,
                        p.url,
                        p.score,
                        p.created_at,
                        p.author,
                        p.image_url,
                        sentinel,
                        p.synced_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn get_posts(&self, ids: &[String]) -> Result<Vec<Post>, StoreError> {
        self.with_conn(|conn| {
            let mut out = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_PARAMS_PER_QUERY) {
                let sql = format!(
                    "SELECT {POST_COLUMNS} FROM posts WHERE id IN ({}) ORDER BY score DESC, id ASC",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), post_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                out.extend(rows);
            }
            Ok(out)
        })
    }

    fn enrichment_candidates(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE image_url IS NOT NULL AND extracted_name IS NULL
                 ORDER BY score DESC, id ASC LIMIT ?1"
            );
            Self::query_posts(conn, &sql, &[&(limit as i64)])
        })
    }

    fn set_identity(&self, id: &str, update: &IdentityUpdate) -> Result<bool, StoreError> {
        let (name, headline) = match update {
            IdentityUpdate::Found { name, headline } => (name.as_str(), headline.as_deref()),
            IdentityUpdate::NotFound => ("", None),
        };
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE posts SET extracted_name = ?2, extracted_headline = ?3
                 WHERE id = ?1 AND extracted_name IS NULL",
                params![id, name, headline],
            )?;
            Ok(n == 1)
        })
    }

    fn hide_post(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE posts SET hidden = 1 WHERE id = ?1 AND hidden = 0",
                params![id],
            )?;
            Ok(n == 1)
        })
    }

    fn visible_posts_matching(
        &self,
        patterns: &[String],
        include_names: bool,
    ) -> Result<Vec<Post>, StoreError> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let likes: Vec<String> = patterns.iter().map(|p| like_pattern(p)).collect();
        let mut clauses = Vec::with_capacity(likes.len() * 2);
        for _ in &likes {
            clauses.push("fold_key(title) LIKE ? ESCAPE '\\'");
            if include_names {
                clauses.push(
                    "(extracted_name IS NOT NULL AND fold_key(extracted_name) LIKE ? ESCAPE '\\')",
                );
            }
        }
        let mut args: Vec<&str> = Vec::with_capacity(clauses.len());
        for l in &likes {
            args.push(l);
            if include_names {
                args.push(l);
            }
        }
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE hidden = 0 AND ({})
             ORDER BY score DESC, id ASC",
            clauses.join(" OR ")
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), post_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn search_by_identity(&self, fragment: &str, limit: usize) -> Result<Vec<Post>, StoreError> {
        let like = like_pattern(fragment);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE hidden = 0 AND extracted_name IS NOT NULL AND extracted_name <> ''
                   AND fold_key(extracted_name) LIKE ?1 ESCAPE '\\'
                 ORDER BY score DESC, id ASC LIMIT ?2"
            );
            Self::query_posts(conn, &sql, &[&like, &(limit as i64)])
        })
    }

    fn search_by_title(&self, fragment: &str, limit: usize) -> Result<Vec<Post>, StoreError> {
        let like = like_pattern(fragment);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE hidden = 0 AND fold_key(title) LIKE ?1 ESCAPE '\\'
                 ORDER BY score DESC, id ASC LIMIT ?2"
            );
            Self::query_posts(conn, &sql, &[&like, &(limit as i64)])
        })
    }

    fn identity_posts(&self) -> Result<Vec<Post>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE hidden = 0 AND extracted_name IS NOT NULL AND fold_key(extracted_name) <> ''
                 ORDER BY id ASC"
            );
            Self::query_posts(conn, &sql, &[])
        })
    }

    fn count_distinct_identities(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT fold_key(extracted_name)) FROM posts
                 WHERE hidden = 0 AND extracted_name IS NOT NULL AND fold_key(extracted_name) <> ''",
                [],
                |r| r.get(0),
            )?;
            Ok(n.max(0) as u64)
        })
    }

    fn load_cursor(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.with_conn(|conn| {
            let v = conn
                .query_row(
                    "SELECT value FROM sync_cursors WHERE key = ?1",
                    params![key],
                    |r| r.get::<_, i64>(0),
                )
                .optional()?;
            Ok(v)
        })
    }

    fn save_cursor(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_cursors (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn record_run(&self, run: &SyncRun) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(run)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_runs (trigger, started_at, payload) VALUES (?1, ?2, ?3)",
                params![run.trigger.as_str(), run.started_at, payload],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT payload FROM sync_runs ORDER BY id DESC LIMIT ?1")?;
            let payloads = stmt
                .query_map(params![limit as i64], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = Vec::with_capacity(payloads.len());
            for p in payloads {
                out.push(serde_json::from_str(&p)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunTrigger;

    fn new_post(id: &str, score: i64, image: Option<&str>) -> NewPost {
        NewPost {
            id: id.to_string(),
            title: format!("title {id}"),
            url: format!("https://reddit.com/r/x/{id}"),
            score,
            created_at: 1_700_000_000,
            author: "someone".into(),
            image_url: image.map(str::to_string),
            synced_at: 1,
        }
    }

    #[test]
    fn upsert_refreshes_score_but_keeps_title_and_identity() {
        let store = SqlitePostStore::open_in_memory().unwrap();
        store
            .upsert_posts(&[new_post("a", 10, Some("https://i.redd.it/a.png"))])
            .unwrap();
        store
            .set_identity(
                "a",
                &IdentityUpdate::Found {
                    name: "Jane Doe".into(),
                    headline: None,
                },
            )
            .unwrap();
        store.hide_post("a").unwrap();

        let mut again = new_post("a", 99, None);
        again.title = "edited title".into();
        again.synced_at = 2;
        store.upsert_posts(&[again]).unwrap();

        let p = &store.get_posts(&["a".into()]).unwrap()[0];
        assert_eq!(p.score, 99);
        assert_eq!(p.synced_at, 2);
        assert_eq!(p.title, "title a");
        assert_eq!(p.image_url.as_deref(), Some("https://i.redd.it/a.png"));
        assert_eq!(p.identity.name(), Some("Jane Doe"));
        assert!(p.hidden);
    }

    #[test]
    fn posts_without_image_are_inserted_as_processed() {
        let store = SqlitePostStore::open_in_memory().unwrap();
        store
            .upsert_posts(&[new_post("a", 1, None), new_post("b", 2, Some("https://x/b.jpg"))])
            .unwrap();
        let pending = store.enrichment_candidates(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
        let a = &store.get_posts(&["a".into()]).unwrap()[0];
        assert_eq!(a.identity, Identity::NotFound);
    }

    #[test]
    fn identity_write_is_compare_and_set() {
        let store = SqlitePostStore::open_in_memory().unwrap();
        store
            .upsert_posts(&[new_post("a", 1, Some("https://x/a.jpg"))])
            .unwrap();
        assert!(store.set_identity("a", &IdentityUpdate::NotFound).unwrap());
        let second = IdentityUpdate::Found {
            name: "Late Writer".into(),
            headline: None,
        };
        assert!(!store.set_identity("a", &second).unwrap());
        let a = &store.get_posts(&["a".into()]).unwrap()[0];
        assert_eq!(a.identity, Identity::NotFound);
    }

    #[test]
    fn like_fragments_are_escaped() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn cursor_and_run_log_round_trip() {
        let store = SqlitePostStore::open_in_memory().unwrap();
        assert_eq!(store.load_cursor("k").unwrap(), None);
        store.save_cursor("k", 5).unwrap();
        store.save_cursor("k", 3).unwrap();
        assert_eq!(store.load_cursor("k").unwrap(), Some(3));

        let run = SyncRun {
            trigger: RunTrigger::Manual,
            started_at: 10,
            fetched: 1,
            upserted: 1,
            new_posts: 1,
            enriched: 0,
            hidden: 0,
            fallback_used: false,
            success: true,
            errors: vec!["x".into()],
            duration_ms: 3,
        };
        store.record_run(&run).unwrap();
        assert_eq!(store.recent_runs(5).unwrap(), vec![run]);
    }
}
