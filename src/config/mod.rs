// src/config/mod.rs
//! Pipeline configuration: one TOML file, every field defaulted.

pub mod oracle;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrich::config::EnrichConfig;
use crate::ingest::config::{IngestConfig, SourcesConfig};
use crate::moderation::ModerationConfig;
use oracle::OracleConfig;

pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/posts.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Wait this long before the first scheduled run.
    pub initial_delay_secs: u64,
    pub backfill: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 24 * 3600,
            initial_delay_secs: 60,
            backfill: false,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(60))
    }
}

/// Every tunable of the pipeline, enumerated in one place.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub sources: SourcesConfig,
    pub ingest: IngestConfig,
    pub enrich: EnrichConfig,
    pub oracle: OracleConfig,
    pub moderation: ModerationConfig,
    pub schedule: ScheduleConfig,
}

impl PipelineConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        Ok(cfg.resolved())
    }

    /// Load using env var + fallbacks:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PIPELINE_CONFIG_PATH} points to non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default().resolved())
    }

    fn resolved(mut self) -> Self {
        self.oracle = self.oracle.resolve();
        self
    }
}
