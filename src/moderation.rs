// src/moderation.rs
//! Moderation gate: hides posts that match sensitive patterns and cannot be
//! verified, and queues the rest for manual review. Hiding is one-way.

use std::time::Duration;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::enrich::image::ImageHost;
use crate::store::{Identity, Post, PostStore};

pub const DEFAULT_SENSITIVE_PATTERNS: &[&str] = &[
    "firearm",
    "gun",
    "shooting",
    "weapon",
    "protest",
    "rally",
    "political",
    "politics",
    "democrat",
    "republican",
    "conservative",
    "liberal",
    "trump",
    "biden",
    "obama",
    "maga",
    "immigration",
    "immigrant",
    "deportation",
    "abortion",
    "pro-life",
    "pro-choice",
    "vaccine",
    "antivax",
    "covid hoax",
    "racist",
    "racism",
    "white supremac",
    "nazi",
    "terrorist",
    "terrorism",
    // misidentified in earlier runs
    "alex pretti",
];

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("moderation_flagged_total", "Posts matching a sensitive pattern.");
        describe_counter!("moderation_hidden_total", "Posts hidden by the gate.");
        describe_counter!("moderation_image_checks_total", "Image existence checks.");
    });
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Replaces the built-in list when non-empty.
    pub patterns: Vec<String>,
    /// Pause after this many image checks during a sweep.
    pub sweep_pause_every: u32,
    pub sweep_pause_ms: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            sweep_pause_every: 10,
            sweep_pause_ms: 1_000,
        }
    }
}

impl ModerationConfig {
    pub fn sweep_options(&self, dry_run: bool) -> SweepOptions {
        SweepOptions {
            dry_run,
            pause_every: self.sweep_pause_every,
            pause: Duration::from_millis(self.sweep_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HideReason {
    NoImage,
    NoIdentity,
    ImageUnreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Visible,
    AutoHidden(HideReason),
    NeedsManualReview,
}

#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    pub dry_run: bool,
    pub pause_every: u32,
    pub pause: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            pause_every: 10,
            pause: Duration::from_secs(1),
        }
    }
}

/// Posts left visible that a human should look at.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub id: String,
    pub title: String,
    pub name: Option<String>,
    pub url: String,
}

impl From<&Post> for ReviewItem {
    fn from(p: &Post) -> Self {
        Self {
            id: p.id.clone(),
            title: p.title.clone(),
            name: p.identity.name().map(str::to_string),
            url: p.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModerationReport {
    pub dry_run: bool,
    pub evaluated: u64,
    pub flagged: u64,
    /// Hidden by this pass (would be hidden, in dry-run).
    pub hidden: u64,
    pub hidden_no_image: u64,
    pub hidden_no_identity: u64,
    pub hidden_unreachable: u64,
    pub image_checks: u64,
    pub manual_review: Vec<ReviewItem>,
    pub errors: Vec<String>,
}

pub struct ModerationGate {
    patterns: Vec<String>,
}

impl Default for ModerationGate {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_PATTERNS.iter().map(|s| s.to_string()))
    }
}

impl ModerationGate {
    pub fn new<I: IntoIterator<Item = String>>(patterns: I) -> Self {
        let mut patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        patterns.sort();
        patterns.dedup();
        Self { patterns }
    }

    pub fn from_config(cfg: &ModerationConfig) -> Self {
        if cfg.patterns.is_empty() {
            Self::default()
        } else {
            Self::new(cfg.patterns.iter().cloned())
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Case-insensitive substring match over the title and a resolved name.
    pub fn matches(&self, post: &Post) -> bool {
        let title = post.title.to_lowercase();
        let name = post.identity.name().map(str::to_lowercase);
        self.patterns.iter().any(|p| {
            title.contains(p.as_str()) || name.as_deref().is_some_and(|n| n.contains(p.as_str()))
        })
    }

    /// Verdict for one post. Only a flagged post with image and identity
    /// triggers the existence check.
    pub async fn evaluate(&self, post: &Post, images: &dyn ImageHost) -> Verdict {
        if !self.matches(post) {
            return Verdict::Visible;
        }
        let Some(url) = post.image_url.as_deref() else {
            return Verdict::AutoHidden(HideReason::NoImage);
        };
        if !matches!(post.identity, Identity::Resolved { .. }) {
            return Verdict::AutoHidden(HideReason::NoIdentity);
        }
        if images.is_reachable(url).await {
            Verdict::NeedsManualReview
        } else {
            Verdict::AutoHidden(HideReason::ImageUnreachable)
        }
    }

    /// Apply the gate to posts inserted by the current run.
    pub async fn moderate_new(
        &self,
        store: &dyn PostStore,
        images: &dyn ImageHost,
        ids: &[String],
    ) -> ModerationReport {
        ensure_metrics_described();
        let mut report = ModerationReport::default();
        if ids.is_empty() {
            return report;
        }
        let posts = match store.get_posts(ids) {
            Ok(p) => p,
            Err(e) => {
                report.errors.push(format!("loading new posts failed: {e}"));
                return report;
            }
        };
        let opts = SweepOptions {
            dry_run: false,
            pause_every: 0,
            pause: Duration::ZERO,
        };
        for post in posts.iter().filter(|p| !p.hidden) {
            self.apply(store, images, post, &opts, &mut report).await;
        }
        tracing::info!(
            target: "moderation",
            evaluated = report.evaluated,
            flagged = report.flagged,
            hidden = report.hidden,
            "new posts moderated"
        );
        report
    }

    /// Re-evaluate every visible post. Idempotent; never unhides.
    pub async fn sweep(
        &self,
        store: &dyn PostStore,
        images: &dyn ImageHost,
        opts: SweepOptions,
    ) -> ModerationReport {
        ensure_metrics_described();
        let mut report = ModerationReport {
            dry_run: opts.dry_run,
            ..Default::default()
        };
        // Store narrows by pattern; the gate re-checks each row.
        let posts = match store.visible_posts_matching(&self.patterns, true) {
            Ok(p) => p,
            Err(e) => {
                report.errors.push(format!("loading visible posts failed: {e}"));
                return report;
            }
        };
        for post in &posts {
            self.apply(store, images, post, &opts, &mut report).await;
        }
        tracing::info!(
            target: "moderation",
            dry_run = opts.dry_run,
            flagged = report.flagged,
            hidden = report.hidden,
            review = report.manual_review.len(),
            checks = report.image_checks,
            "moderation sweep finished"
        );
        report
    }

    async fn apply(
        &self,
        store: &dyn PostStore,
        images: &dyn ImageHost,
        post: &Post,
        opts: &SweepOptions,
        report: &mut ModerationReport,
    ) {
        report.evaluated += 1;
        if !self.matches(post) {
            return;
        }
        report.flagged += 1;
        counter!("moderation_flagged_total").increment(1);

        let will_check =
            post.image_url.is_some() && matches!(post.identity, Identity::Resolved { .. });
        if will_check {
            if opts.pause_every > 0
                && report.image_checks > 0
                && report.image_checks % u64::from(opts.pause_every) == 0
                && !opts.pause.is_zero()
            {
                tokio::time::sleep(opts.pause).await;
            }
            report.image_checks += 1;
            counter!("moderation_image_checks_total").increment(1);
        }

        let reason = match self.evaluate(post, images).await {
            Verdict::Visible => return,
            Verdict::NeedsManualReview => {
                report.manual_review.push(ReviewItem::from(post));
                return;
            }
            Verdict::AutoHidden(reason) => reason,
        };

        if !opts.dry_run {
            match store.hide_post(&post.id) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    tracing::warn!(target: "moderation", id = %post.id, error = %e, "hide failed");
                    report.errors.push(format!("hiding {} failed: {e}", post.id));
                    return;
                }
            }
            counter!("moderation_hidden_total").increment(1);
        }
        report.hidden += 1;
        match reason {
            HideReason::NoImage => report.hidden_no_image += 1,
            HideReason::NoIdentity => report.hidden_no_identity += 1,
            HideReason::ImageUnreachable => report.hidden_unreachable += 1,
        }
        tracing::info!(target: "moderation", id = %post.id, ?reason, dry_run = opts.dry_run, "post hidden");
    }
}
