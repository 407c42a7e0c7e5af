// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;

use crate::config::ScheduleConfig;
use crate::pipeline::{Pipeline, PipelineError, RunOptions};
use crate::store::RunTrigger;

/// Spawn the periodic pipeline trigger. A tick that lands while another run
/// is active is skipped, not queued.
pub fn spawn_scheduler(pipeline: Arc<Pipeline>, cfg: ScheduleConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        if cfg.initial_delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(cfg.initial_delay_secs)).await;
        }
        let mut ticker = tokio::time::interval(cfg.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let opts = RunOptions {
                backfill: cfg.backfill,
                drain: false,
            };
            match pipeline.run(RunTrigger::Scheduled, opts).await {
                Ok(report) => {
                    counter!("scheduler_ticks_total", "outcome" => "ran").increment(1);
                    tracing::info!(
                        target: "pipeline",
                        run_id = ?report.run_id,
                        success = report.run.success,
                        "scheduled run done"
                    );
                }
                Err(PipelineError::RunInProgress) => {
                    counter!("scheduler_ticks_total", "outcome" => "skipped").increment(1);
                    tracing::info!(target: "pipeline", "scheduled tick skipped; run in progress");
                }
            }
        }
    })
}
