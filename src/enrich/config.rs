// src/enrich/config.rs
use std::time::Duration;

use serde::Deserialize;

/// Knobs for the enrichment worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub enabled: bool,
    /// Oracle calls allowed per run.
    pub budget: u32,
    /// Provider quota; sets the pause between calls.
    pub calls_per_hour: u32,
    /// Drain mode: large budget, fixed pause.
    pub drain_budget: u32,
    pub drain_delay_secs: u64,
    /// Candidates fetched per store query.
    pub batch_size: usize,
    pub max_image_bytes: usize,
    pub image_timeout_secs: u64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget: 25,
            calls_per_hour: 60,
            drain_budget: 1_000,
            drain_delay_secs: 5,
            batch_size: 50,
            // Oracle request limit is 5 MB after base64 inflation.
            max_image_bytes: 3_932_160,
            image_timeout_secs: 20,
        }
    }
}

impl EnrichConfig {
    /// Budget and per-call pause for a run.
    pub fn plan(&self, drain: bool) -> (u32, Duration) {
        if drain {
            (self.drain_budget, Duration::from_secs(self.drain_delay_secs))
        } else {
            (self.budget, delay_for_quota(self.calls_per_hour))
        }
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs.max(1))
    }
}

/// Pause that keeps `calls_per_hour` under quota. Zero quota means no pause.
pub fn delay_for_quota(calls_per_hour: u32) -> Duration {
    if calls_per_hour == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(3_600_000 / u64::from(calls_per_hour))
}
