// src/config/oracle.rs
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::retry::Backoff;

pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// "anthropic" | "fixed" (case-insensitive)
    pub provider: String,
    pub model: String,
    /// "ENV" means: read from ANTHROPIC_API_KEY
    pub api_key: String,
    pub timeout_secs: u64,
    pub throttle_retries: u32,
    pub throttle_backoff_ms: u64,
    /// Raw reply used by the "fixed" provider.
    pub fixed_reply: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-haiku-4-5-20251001".to_string(),
            api_key: "ENV".to_string(),
            timeout_secs: 60,
            throttle_retries: 3,
            throttle_backoff_ms: 2_000,
            fixed_reply: r#"{"name": null, "headline": null}"#.to_string(),
        }
    }
}

impl OracleConfig {
    /// Normalize the provider and resolve an "ENV" key. A missing key is not an
    /// error; it leaves `api_key` empty and the oracle disabled.
    pub fn resolve(mut self) -> Self {
        self.provider = self.provider.trim().to_lowercase();
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var(ENV_ANTHROPIC_API_KEY).unwrap_or_default();
        }
        self.api_key = self.api_key.trim().to_string();
        self
    }

    pub fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn throttle_backoff(&self) -> Backoff {
        Backoff::exponential(
            Duration::from_millis(self.throttle_backoff_ms),
            self.throttle_retries,
        )
    }
}
