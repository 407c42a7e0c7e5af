//! One-shot pipeline run (or moderation sweep) from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use identity_corpus::config::PipelineConfig;
use identity_corpus::pipeline::{Pipeline, RunOptions};
use identity_corpus::store::RunTrigger;

#[derive(Parser)]
#[command(name = "sync-once", about = "Run one ingestion/enrichment/moderation pass")]
struct Cli {
    /// Path to pipeline TOML (defaults to $PIPELINE_CONFIG_PATH, then config/pipeline.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Walk the archive into the past after the primary pass
    #[arg(long)]
    backfill: bool,

    /// Use the drain budget and delay for enrichment
    #[arg(long)]
    drain: bool,

    /// Run the moderation sweep instead of a sync
    #[arg(long)]
    sweep: bool,

    /// With --sweep: report without hiding anything
    #[arg(long, requires = "sweep")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(p) => PipelineConfig::load_from(p)?,
        None => PipelineConfig::load_default()?,
    };
    let pipeline = Pipeline::from_config(cfg)?;

    let json = if cli.sweep {
        let opts = pipeline.config().moderation.sweep_options(cli.dry_run);
        let report = pipeline.sweep(opts).await?;
        for item in &report.manual_review {
            tracing::info!(id = %item.id, name = ?item.name, url = %item.url, "needs manual review");
        }
        serde_json::to_string_pretty(&report)
    } else {
        let opts = RunOptions {
            backfill: cli.backfill,
            drain: cli.drain,
        };
        let report = pipeline.run(RunTrigger::Manual, opts).await?;
        if !report.run.success {
            anyhow::bail!("run failed: {}", report.run.errors.join("; "));
        }
        serde_json::to_string_pretty(&report.run)
    };

    println!("{}", json.context("serializing report")?);
    Ok(())
}
