// tests/moderation_gate.rs
//
// Verdicts, same-run moderation of new posts, and the standalone sweep.

mod common;

use std::time::Duration;

use common::*;
use identity_corpus::moderation::{HideReason, ModerationGate, SweepOptions, Verdict};
use identity_corpus::store::PostStore;

fn post_of(store: &dyn PostStore, id: &str) -> identity_corpus::store::Post {
    store.get_posts(&[id.to_string()]).unwrap().remove(0)
}

fn no_pause(dry_run: bool) -> SweepOptions {
    SweepOptions {
        dry_run,
        pause_every: 10,
        pause: Duration::ZERO,
    }
}

#[tokio::test]
async fn verdicts_follow_image_and_identity() {
    let store = memory_store();
    let gate = ModerationGate::default();

    store
        .upsert_posts(&[new_post("noimg", "Protest turned networking event", 10, false)])
        .unwrap();
    seed(&store, "noname", "Protest turned networking event", 9, Some(""));
    seed(&store, "named", "Protest turned networking event", 8, Some("Jane Doe"));
    seed(&store, "dead", "Protest turned networking event", 7, Some("John Roe"));
    seed(&store, "calm", "Boss celebrates 90 hour weeks", 6, Some("Pat Poe"));

    let images = FakeImages::default().with_missing("https://i.redd.it/dead.png");

    assert_eq!(
        gate.evaluate(&post_of(&store, "noimg"), &images).await,
        Verdict::AutoHidden(HideReason::NoImage)
    );
    assert_eq!(
        gate.evaluate(&post_of(&store, "noname"), &images).await,
        Verdict::AutoHidden(HideReason::NoIdentity)
    );
    assert_eq!(
        gate.evaluate(&post_of(&store, "named"), &images).await,
        Verdict::NeedsManualReview
    );
    assert_eq!(
        gate.evaluate(&post_of(&store, "dead"), &images).await,
        Verdict::AutoHidden(HideReason::ImageUnreachable)
    );
    assert_eq!(
        gate.evaluate(&post_of(&store, "calm"), &images).await,
        Verdict::Visible
    );
}

#[tokio::test]
async fn unresolved_new_posts_matching_a_pattern_are_hidden() {
    let store = memory_store();
    seed(&store, "n1", "Political rant on LinkedIn", 5, None);
    seed(&store, "n2", "Intern gets a pizza party", 4, None);
    let gate = ModerationGate::default();

    let report = gate
        .moderate_new(&store, &FakeImages::default(), &["n1".into(), "n2".into()])
        .await;

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.flagged, 1);
    assert_eq!(report.hidden_no_identity, 1);
    assert!(post_of(&store, "n1").hidden);
    assert!(!post_of(&store, "n2").hidden);
}

#[tokio::test]
async fn sweep_hides_once_and_never_unhides() {
    let store = memory_store();
    seed(&store, "h1", "Guy compares layoffs to a shooting range", 10, Some(""));
    seed(&store, "r1", "Rally your team with this one trick", 9, Some("Jane Doe"));
    seed(&store, "v1", "Boss celebrates 90 hour weeks", 8, Some("Pat Poe"));
    seed(&store, "pre", "Intern gets a pizza party", 7, None);
    assert!(store.hide_post("pre").unwrap());

    let gate = ModerationGate::default();
    let images = FakeImages::default();

    let first = gate.sweep(&store, &images, no_pause(false)).await;
    assert_eq!(first.hidden, 1);
    assert_eq!(first.manual_review.len(), 1);
    assert_eq!(first.manual_review[0].id, "r1");
    assert_eq!(first.image_checks, 1);

    let second = gate.sweep(&store, &images, no_pause(false)).await;
    assert_eq!(second.hidden, 0, "already hidden posts are not re-hidden");
    assert_eq!(second.manual_review.len(), 1);

    assert!(post_of(&store, "h1").hidden);
    assert!(post_of(&store, "pre").hidden, "sweep never unhides");
    assert!(!post_of(&store, "r1").hidden);
    assert!(!post_of(&store, "v1").hidden);
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let store = memory_store();
    seed(&store, "h1", "Vaccine takes from a sales coach", 10, Some(""));

    let report = ModerationGate::default()
        .sweep(&store, &FakeImages::default(), no_pause(true))
        .await;

    assert!(report.dry_run);
    assert_eq!(report.hidden, 1);
    assert!(!post_of(&store, "h1").hidden);
}

#[tokio::test]
async fn resolved_name_alone_can_flag_a_post() {
    let store = memory_store();
    seed(&store, "x", "Thought leader strikes again", 10, Some("Alex Pretti"));
    let images = FakeImages::default().with_missing("https://i.redd.it/x.png");

    let report = ModerationGate::default()
        .sweep(&store, &images, no_pause(false))
        .await;
    assert_eq!(report.hidden_unreachable, 1);
    assert!(post_of(&store, "x").hidden);
}

#[tokio::test(start_paused = true)]
async fn sweep_pauses_between_image_check_groups() {
    let store = memory_store();
    for i in 0..5 {
        seed(&store, &format!("c{i}"), "Protest selfie", i, Some("Jane Doe"));
    }
    let opts = SweepOptions {
        dry_run: true,
        pause_every: 2,
        pause: Duration::from_secs(1),
    };
    let started = tokio::time::Instant::now();
    let report = ModerationGate::default()
        .sweep(&store, &FakeImages::default(), opts)
        .await;
    assert_eq!(report.image_checks, 5);
    // Pauses before checks 3 and 5.
    assert!(started.elapsed() >= Duration::from_secs(2));
}
