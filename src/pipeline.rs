// src/pipeline.rs
//! One run = ingest → enrich → moderate new posts → record a `SyncRun`.
//! Runs are serialized; a trigger arriving mid-run is rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::PipelineConfig;
use crate::enrich::image::{HttpImageHost, ImageHost};
use crate::enrich::oracle::{build_oracle, DynVisionOracle};
use crate::enrich::{EnrichmentSummary, EnrichmentWorker};
use crate::ingest::providers::{archive::ArchiveSource, listing::ListingSource};
use crate::ingest::types::FeedSource;
use crate::ingest::{IngestCoordinator, IngestSummary};
use crate::moderation::{ModerationGate, ModerationReport, SweepOptions};
use crate::store::{PostStore, RunTrigger, SqlitePostStore, SyncRun};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs, by trigger and outcome.");
        describe_counter!("pipeline_rejected_total", "Triggers rejected while a run was active.");
        describe_histogram!("pipeline_run_ms", "Pipeline run duration in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts of the last finished run.");
    });
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline run is already in progress")]
    RunInProgress,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Walk the archive into the past after the primary pass.
    pub backfill: bool,
    /// Use the drain budget and delay.
    pub drain: bool,
}

/// Everything a run produced; `run` is what went into the run log.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Option<i64>,
    pub run: SyncRun,
    pub ingest: IngestSummary,
    pub enrichment: EnrichmentSummary,
    pub moderation: ModerationReport,
}

/// Threads counts and errors through the stages of one run.
pub struct RunAccumulator {
    trigger: RunTrigger,
    started_at: i64,
    started: Instant,
    fetched: u64,
    upserted: u64,
    new_posts: u64,
    enriched: u64,
    hidden: u64,
    fallback_used: bool,
    errors: Vec<String>,
}

impl RunAccumulator {
    pub fn start(trigger: RunTrigger) -> Self {
        Self {
            trigger,
            started_at: chrono::Utc::now().timestamp(),
            started: Instant::now(),
            fetched: 0,
            upserted: 0,
            new_posts: 0,
            enriched: 0,
            hidden: 0,
            fallback_used: false,
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn absorb_ingest(&mut self, s: &IngestSummary) {
        self.fetched += s.fetched;
        self.upserted += s.upserted;
        self.new_posts += s.new_ids.len() as u64;
        self.fallback_used |= s.fallback_used;
        self.errors.extend(s.errors.iter().cloned());
    }

    pub fn absorb_enrichment(&mut self, s: &EnrichmentSummary) {
        self.enriched += s.processed();
        self.errors.extend(s.errors.iter().cloned());
    }

    pub fn absorb_moderation(&mut self, r: &ModerationReport) {
        if !r.dry_run {
            self.hidden += r.hidden;
        }
        self.errors.extend(r.errors.iter().cloned());
    }

    pub fn finish(self, success: bool) -> SyncRun {
        SyncRun {
            trigger: self.trigger,
            started_at: self.started_at,
            fetched: self.fetched,
            upserted: self.upserted,
            new_posts: self.new_posts,
            enriched: self.enriched,
            hidden: self.hidden,
            fallback_used: self.fallback_used,
            success,
            errors: self.errors,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Holds the run lock; `running` is readable without touching the lock.
struct RunGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct Pipeline {
    store: Arc<dyn PostStore>,
    primary: Arc<dyn FeedSource>,
    secondary: Arc<dyn FeedSource>,
    oracle: Option<DynVisionOracle>,
    images: Arc<dyn ImageHost>,
    gate: ModerationGate,
    cfg: PipelineConfig,
    run_lock: Mutex<()>,
    running: AtomicBool,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PostStore>,
        primary: Arc<dyn FeedSource>,
        secondary: Arc<dyn FeedSource>,
        oracle: Option<DynVisionOracle>,
        images: Arc<dyn ImageHost>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            gate: ModerationGate::from_config(&cfg.moderation),
            store,
            primary,
            secondary,
            oracle,
            images,
            cfg,
            run_lock: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// Wire production adapters from config.
    pub fn from_config(cfg: PipelineConfig) -> anyhow::Result<Self> {
        let store = SqlitePostStore::open(&cfg.store.path)
            .with_context(|| format!("opening store at {}", cfg.store.path.display()))?;
        let src = &cfg.sources;
        let primary = ListingSource::new(
            &src.listing_base_url,
            &src.subreddit,
            &src.user_agent,
            src.request_timeout(),
        )?;
        let secondary = ArchiveSource::new(
            &src.archive_base_url,
            &src.subreddit,
            &src.user_agent,
            src.request_timeout(),
        )?;
        let images = HttpImageHost::new(&src.user_agent, cfg.enrich.image_timeout())?;
        let oracle = build_oracle(&cfg.oracle);
        Ok(Self::new(
            Arc::new(store),
            Arc::new(primary),
            Arc::new(secondary),
            oracle,
            Arc::new(images),
            cfg,
        ))
    }

    pub fn store(&self) -> Arc<dyn PostStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<RunGuard<'_>, PipelineError> {
        let lock = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(RunGuard {
            _lock: lock,
            running: &self.running,
        })
    }

    pub async fn run(
        &self,
        trigger: RunTrigger,
        opts: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        ensure_metrics_described();
        let _guard = self.acquire().inspect_err(|_| {
            counter!("pipeline_rejected_total").increment(1);
            tracing::warn!(target: "pipeline", trigger = trigger.as_str(), "run already in progress");
        })?;

        tracing::info!(
            target: "pipeline",
            trigger = trigger.as_str(),
            backfill = opts.backfill,
            drain = opts.drain,
            "run started"
        );
        let mut acc = RunAccumulator::start(trigger);
        let mut report = RunReport {
            run_id: None,
            run: SyncRun {
                trigger,
                started_at: 0,
                fetched: 0,
                upserted: 0,
                new_posts: 0,
                enriched: 0,
                hidden: 0,
                fallback_used: false,
                success: false,
                errors: Vec::new(),
                duration_ms: 0,
            },
            ingest: IngestSummary::default(),
            enrichment: EnrichmentSummary::default(),
            moderation: ModerationReport::default(),
        };

        if let Err(e) = self.store.ping() {
            tracing::error!(target: "pipeline", error = %e, "store unreachable; aborting run");
            acc.error(format!("store unreachable: {e}"));
            report.run = acc.finish(false);
            self.finish(&mut report);
            return Ok(report);
        }

        let mut ingest_cfg = self.cfg.ingest.clone();
        ingest_cfg.backfill |= opts.backfill;
        report.ingest = IngestCoordinator::new(
            self.store.as_ref(),
            self.primary.as_ref(),
            self.secondary.as_ref(),
            &ingest_cfg,
        )
        .run()
        .await;
        acc.absorb_ingest(&report.ingest);

        report.enrichment = if self.cfg.enrich.enabled {
            let (budget, delay) = self.cfg.enrich.plan(opts.drain);
            EnrichmentWorker::new(
                self.store.as_ref(),
                self.oracle.as_deref(),
                self.images.as_ref(),
                self.cfg.enrich.batch_size,
                self.cfg.enrich.max_image_bytes,
            )
            .run(budget, delay)
            .await
        } else {
            EnrichmentSummary {
                disabled: true,
                ..Default::default()
            }
        };
        acc.absorb_enrichment(&report.enrichment);

        report.moderation = self
            .gate
            .moderate_new(self.store.as_ref(), self.images.as_ref(), &report.ingest.new_ids)
            .await;
        acc.absorb_moderation(&report.moderation);

        report.run = acc.finish(true);
        self.finish(&mut report);
        Ok(report)
    }

    /// Standalone moderation sweep over every visible post.
    pub async fn sweep(&self, opts: SweepOptions) -> Result<ModerationReport, PipelineError> {
        let _guard = self.acquire()?;
        Ok(self
            .gate
            .sweep(self.store.as_ref(), self.images.as_ref(), opts)
            .await)
    }

    fn finish(&self, report: &mut RunReport) {
        let run = &mut report.run;
        match self.store.record_run(run) {
            Ok(id) => report.run_id = Some(id),
            Err(e) => {
                tracing::warn!(target: "pipeline", error = %e, "recording run failed");
                run.errors.push(format!("recording run failed: {e}"));
            }
        }
        let outcome = if run.success { "success" } else { "failure" };
        counter!("pipeline_runs_total", "trigger" => run.trigger.as_str(), "outcome" => outcome)
            .increment(1);
        histogram!("pipeline_run_ms").record(run.duration_ms as f64);
        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            target: "pipeline",
            trigger = run.trigger.as_str(),
            success = run.success,
            fetched = run.fetched,
            new = run.new_posts,
            enriched = run.enriched,
            hidden = run.hidden,
            errors = run.errors.len(),
            duration_ms = run.duration_ms,
            "run finished"
        );
    }
}
