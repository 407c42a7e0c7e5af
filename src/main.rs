//! Identity corpus service: binary entrypoint.
//! Boots the Axum HTTP server, the scheduled sync task and `/metrics`.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use identity_corpus::api::{self, AppState};
use identity_corpus::config::PipelineConfig;
use identity_corpus::metrics::Metrics;
use identity_corpus::pipeline::Pipeline;
use identity_corpus::scheduler::spawn_scheduler;

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingest=info,enrich=info,moderation=info,pipeline=info,search=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may have installed a subscriber already.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default()?;
    let metrics = Metrics::init(&cfg)?;
    let pipeline = Arc::new(Pipeline::from_config(cfg.clone())?);

    if cfg.schedule.enabled {
        spawn_scheduler(pipeline.clone(), cfg.schedule.clone());
    } else {
        tracing::info!(target: "pipeline", "scheduler disabled by config");
    }

    let router = api::router(AppState::new(pipeline)).merge(metrics.router());
    Ok(router.into())
}
