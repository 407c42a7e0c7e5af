use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::identity::{self, SearchError, SearchHit};
use crate::leaderboard::{self, LeaderboardEntry, SortKey};
use crate::pipeline::{Pipeline, PipelineError, RunOptions};
use crate::store::{PostStore, RunTrigger, SyncRun};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn PostStore>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            store: pipeline.store(),
            pipeline,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/search", get(search))
        .route("/leaderboard", get(leaderboard))
        .route("/admin/sync", post(admin_sync))
        .route("/admin/moderation/sweep", post(admin_sweep))
        .route("/debug/runs", get(debug_runs))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------- search ----------

#[derive(Deserialize)]
struct SearchParams {
    name: Option<String>,
}

#[derive(Serialize)]
struct SearchResp {
    posts: Vec<SearchHit>,
    searched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn search(State(state): State<AppState>, Query(q): Query<SearchParams>) -> Response {
    let name = q.name.unwrap_or_default();
    match identity::search(state.store.as_ref(), &name) {
        Ok(posts) => Json(SearchResp {
            posts: posts.into_iter().map(SearchHit::from).collect(),
            searched: true,
            error: None,
        })
        .into_response(),
        Err(SearchError::InvalidQuery) => (
            StatusCode::BAD_REQUEST,
            Json(SearchResp {
                posts: Vec::new(),
                searched: true,
                error: Some("Invalid name parameter".to_string()),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(target: "search", error = %e, "search failed");
            Json(SearchResp {
                posts: Vec::new(),
                searched: true,
                error: Some(e.to_string()),
            })
            .into_response()
        }
    }
}

// ---------- leaderboard ----------

#[derive(Deserialize)]
struct LeaderboardParams {
    sort: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardResp {
    entries: Vec<LeaderboardEntry>,
    total_people: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(q): Query<LeaderboardParams>,
) -> Json<LeaderboardResp> {
    let key = SortKey::parse(q.sort.as_deref());
    // Unparsable limit falls back to the default.
    let limit = leaderboard::clamp_limit(q.limit.and_then(|s| s.trim().parse::<i64>().ok()));

    let ranked = leaderboard::rank(state.store.as_ref(), key, limit)
        .and_then(|entries| Ok((entries, leaderboard::count_identities(state.store.as_ref())?)));
    match ranked {
        Ok((entries, total_people)) => Json(LeaderboardResp {
            entries,
            total_people,
            error: None,
        }),
        Err(e) => {
            tracing::warn!(target: "pipeline", error = %e, "leaderboard query failed");
            Json(LeaderboardResp {
                entries: Vec::new(),
                total_people: 0,
                error: Some(e.to_string()),
            })
        }
    }
}

// ---------- admin ----------

#[derive(Deserialize, Default)]
struct SyncParams {
    #[serde(default)]
    backfill: bool,
    #[serde(default)]
    drain: bool,
}

#[derive(Serialize)]
struct BusyResp {
    error: String,
}

fn busy(e: PipelineError) -> Response {
    (StatusCode::CONFLICT, Json(BusyResp { error: e.to_string() })).into_response()
}

/// Admin work runs on its own task: a client that disconnects mid-run must
/// not cancel the run before its `SyncRun` is recorded.
async fn detached<T, F>(work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: std::future::Future<Output = Result<T, PipelineError>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(Ok(out)) => Json(out).into_response(),
        Ok(Err(e)) => busy(e),
        Err(e) => {
            tracing::error!(target: "pipeline", error = %e, "admin task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(BusyResp { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

async fn admin_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<SyncParams>,
) -> Response {
    let trigger = headers
        .get("x-sync-source")
        .and_then(|v| v.to_str().ok())
        .map(RunTrigger::parse)
        .unwrap_or(RunTrigger::Api);
    let opts = RunOptions {
        backfill: q.backfill,
        drain: q.drain,
    };
    let pipeline = state.pipeline.clone();
    detached(async move { pipeline.run(trigger, opts).await }).await
}

#[derive(Deserialize)]
struct SweepParams {
    #[serde(default)]
    dry_run: bool,
}

async fn admin_sweep(State(state): State<AppState>, Query(q): Query<SweepParams>) -> Response {
    let opts = state.pipeline.config().moderation.sweep_options(q.dry_run);
    let pipeline = state.pipeline.clone();
    detached(async move { pipeline.sweep(opts).await }).await
}

// ---------- debug ----------

#[derive(Deserialize)]
struct RunsParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RunsResp {
    runs: Vec<SyncRun>,
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn debug_runs(State(state): State<AppState>, Query(q): Query<RunsParams>) -> Json<RunsResp> {
    let limit = q.limit.unwrap_or(20).clamp(1, 100);
    let running = state.pipeline.is_running();
    match state.store.recent_runs(limit) {
        Ok(runs) => Json(RunsResp {
            runs,
            running,
            error: None,
        }),
        Err(e) => Json(RunsResp {
            runs: Vec::new(),
            running,
            error: Some(e.to_string()),
        }),
    }
}
