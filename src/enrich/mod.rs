// src/enrich/mod.rs
//! Enrichment worker: resolves the poster identity of image posts through the
//! vision oracle, within a per-run call budget.

pub mod config;
pub mod image;
pub mod oracle;
pub mod prefilter;

use std::collections::HashSet;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::enrich::image::{fetch_image, ImageHost};
use crate::enrich::oracle::{OracleOutcome, VisionOracle};
use crate::store::{IdentityUpdate, Post, PostStore};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("enrich_oracle_calls_total", "Vision oracle invocations.");
        describe_counter!(
            "enrich_outcomes_total",
            "Candidates processed, labelled by outcome."
        );
        describe_counter!("enrich_oracle_errors_total", "Oracle transport/status failures.");
        describe_histogram!("enrich_oracle_ms", "Oracle round-trip time in milliseconds.");
    });
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentSummary {
    /// No oracle configured; nothing was attempted.
    pub disabled: bool,
    pub oracle_calls: u32,
    pub enriched: u64,
    pub not_found: u64,
    pub prefiltered: u64,
    pub image_rejected: u64,
    pub failures: u64,
    /// Stopped with candidates left because the budget ran out.
    pub budget_exhausted: bool,
    pub errors: Vec<String>,
}

impl EnrichmentSummary {
    /// Posts whose identity left `Unset` during this run.
    pub fn processed(&self) -> u64 {
        self.enriched + self.not_found + self.prefiltered + self.image_rejected
    }
}

pub struct EnrichmentWorker<'a> {
    store: &'a dyn PostStore,
    oracle: Option<&'a dyn VisionOracle>,
    images: &'a dyn ImageHost,
    batch_size: usize,
    max_image_bytes: usize,
}

impl<'a> EnrichmentWorker<'a> {
    pub fn new(
        store: &'a dyn PostStore,
        oracle: Option<&'a dyn VisionOracle>,
        images: &'a dyn ImageHost,
        batch_size: usize,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            store,
            oracle,
            images,
            batch_size: batch_size.max(1),
            max_image_bytes,
        }
    }

    /// Process unset candidates in score order until none remain or `budget`
    /// oracle calls were made. Sleeps `per_call_delay` between oracle calls.
    pub async fn run(&self, budget: u32, per_call_delay: Duration) -> EnrichmentSummary {
        ensure_metrics_described();
        let mut summary = EnrichmentSummary::default();

        let Some(oracle) = self.oracle else {
            summary.disabled = true;
            summary
                .errors
                .push("enrichment disabled: no vision oracle credential".to_string());
            tracing::warn!(target: "enrich", "no oracle configured; skipping enrichment");
            return summary;
        };

        // Ids that failed this run; left unset for a later run.
        let mut skip: HashSet<String> = HashSet::new();

        'outer: loop {
            let batch = match self
                .store
                .enrichment_candidates(self.batch_size + skip.len())
            {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(target: "enrich", error = %e, "candidate query failed");
                    summary.errors.push(format!("candidate query failed: {e}"));
                    break;
                }
            };
            let fresh: Vec<Post> = batch.into_iter().filter(|p| !skip.contains(&p.id)).collect();
            if fresh.is_empty() {
                break;
            }

            for post in fresh {
                if summary.oracle_calls >= budget {
                    summary.budget_exhausted = true;
                    break 'outer;
                }
                if !self
                    .process(oracle, &post, per_call_delay, &mut summary)
                    .await
                {
                    skip.insert(post.id);
                }
            }
        }

        tracing::info!(
            target: "enrich",
            provider = oracle.provider_name(),
            calls = summary.oracle_calls,
            enriched = summary.enriched,
            not_found = summary.not_found,
            prefiltered = summary.prefiltered,
            rejected = summary.image_rejected,
            failures = summary.failures,
            budget_exhausted = summary.budget_exhausted,
            "enrichment pass finished"
        );
        summary
    }

    /// Returns `false` when the post stays unset and must be skipped this run.
    async fn process(
        &self,
        oracle: &dyn VisionOracle,
        post: &Post,
        per_call_delay: Duration,
        summary: &mut EnrichmentSummary,
    ) -> bool {
        if prefilter::is_unlikely_subject(&post.title) {
            summary.prefiltered += 1;
            counter!("enrich_outcomes_total", "outcome" => "prefiltered").increment(1);
            return self.persist(post, IdentityUpdate::NotFound, summary);
        }

        let Some(url) = post.image_url.as_deref() else {
            summary.image_rejected += 1;
            return self.persist(post, IdentityUpdate::NotFound, summary);
        };

        let image = match fetch_image(self.images, url, self.max_image_bytes).await {
            Ok(img) => img,
            Err(reject) => {
                tracing::debug!(target: "enrich", id = %post.id, reason = %reject, "image rejected");
                summary.image_rejected += 1;
                counter!("enrich_outcomes_total", "outcome" => "image_rejected").increment(1);
                return self.persist(post, IdentityUpdate::NotFound, summary);
            }
        };

        if summary.oracle_calls > 0 && !per_call_delay.is_zero() {
            tokio::time::sleep(per_call_delay).await;
        }
        summary.oracle_calls += 1;
        counter!("enrich_oracle_calls_total").increment(1);
        let started = std::time::Instant::now();
        let outcome = oracle.extract(&image).await;
        histogram!("enrich_oracle_ms").record(started.elapsed().as_millis() as f64);

        match outcome {
            OracleOutcome::Extracted { name, headline } => {
                summary.enriched += 1;
                counter!("enrich_outcomes_total", "outcome" => "extracted").increment(1);
                self.persist(post, IdentityUpdate::Found { name, headline }, summary)
            }
            OracleOutcome::NoIdentityFound => {
                summary.not_found += 1;
                counter!("enrich_outcomes_total", "outcome" => "not_found").increment(1);
                self.persist(post, IdentityUpdate::NotFound, summary)
            }
            OracleOutcome::OracleError(msg) => {
                summary.failures += 1;
                counter!("enrich_oracle_errors_total").increment(1);
                tracing::warn!(target: "enrich", id = %post.id, error = %msg, "oracle call failed");
                summary.errors.push(format!("oracle failed for {}: {msg}", post.id));
                false
            }
        }
    }

    fn persist(&self, post: &Post, update: IdentityUpdate, summary: &mut EnrichmentSummary) -> bool {
        match self.store.set_identity(&post.id, &update) {
            Ok(true) => true,
            Ok(false) => {
                // Another run resolved it first.
                tracing::debug!(target: "enrich", id = %post.id, "identity already set");
                true
            }
            Err(e) => {
                tracing::warn!(target: "enrich", id = %post.id, error = %e, "identity write failed");
                summary.errors.push(format!("identity write failed for {}: {e}", post.id));
                false
            }
        }
    }
}
