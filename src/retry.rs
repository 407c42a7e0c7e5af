//! Bounded backoff used for throttled upstream calls.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry policy: how long to wait before retry `attempt` (1-based), and when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_retries: u32,
    pub kind: BackoffKind,
    /// Upper bound on a single wait.
    pub cap: Duration,
}

impl Backoff {
    pub fn exponential(base: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_retries,
            kind: BackoffKind::Exponential,
            cap: Duration::from_secs(300),
        }
    }

    pub fn fixed(base: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_retries,
            kind: BackoffKind::Fixed,
            cap: Duration::from_secs(300),
        }
    }

    /// Delay before retry number `attempt`, or `None` once retries are exhausted.
    /// An upstream `hint` (e.g. Retry-After) wins when it is longer.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let computed = match self.kind {
            BackoffKind::Fixed => self.base,
            BackoffKind::Exponential => {
                let shift = (attempt - 1).min(16);
                self.base.saturating_mul(1u32 << shift)
            }
        };
        let wait = match hint {
            Some(h) if h > computed => h,
            _ => computed,
        };
        Some(wait.min(self.cap))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500), 3)
    }
}
