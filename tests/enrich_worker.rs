// tests/enrich_worker.rs
//
// Enrichment worker budget and sentinel handling with a scripted oracle.

mod common;

use std::time::Duration;

use common::*;
use identity_corpus::enrich::oracle::{OracleOutcome, VisionOracle};
use identity_corpus::enrich::EnrichmentWorker;
use identity_corpus::store::{Identity, PostStore};

const MAX_BYTES: usize = 3_932_160;

#[tokio::test]
async fn budget_caps_oracle_calls_and_leaves_the_rest_unset() {
    let store = memory_store();
    for i in 1..=20 {
        seed(&store, &format!("p{i:02}"), "Manager posts about hustle", i, None);
    }
    let oracle = ScriptedOracle::always(found("Jane Doe"));
    let images = FakeImages::default();

    let worker = EnrichmentWorker::new(&store, Some(&oracle), &images, 50, MAX_BYTES);
    let s = worker.run(5, Duration::ZERO).await;

    assert_eq!(oracle.calls(), 5);
    assert_eq!(s.oracle_calls, 5);
    assert_eq!(s.enriched, 5);
    assert!(s.budget_exhausted);
    assert_eq!(store.enrichment_candidates(100).unwrap().len(), 15);

    // Highest scores go first.
    let top: Vec<String> = (16..=20).map(|i| format!("p{i:02}")).collect();
    for post in store.get_posts(&top).unwrap() {
        assert_eq!(post.identity.name(), Some("Jane Doe"), "{}", post.id);
    }
}

#[tokio::test]
async fn sentinels_failures_and_successes_are_persisted_correctly() {
    let store = memory_store();
    seed(&store, "meta", "[META] Posting rules update", 100, None);
    seed(&store, "big", "Screenshot of a novel", 90, None);
    seed(&store, "err", "CEO on grindset", 80, None);
    seed(&store, "none", "Blurry screenshot", 70, None);
    seed(&store, "ok", "Recruiter on unpaid work", 60, None);

    let oracle = ScriptedOracle::new(vec![
        OracleOutcome::OracleError("status 500".into()),
        OracleOutcome::NoIdentityFound,
        found("Sam Lee"),
    ]);
    let images = FakeImages::default().with_oversized("https://i.redd.it/big.png");

    let worker = EnrichmentWorker::new(&store, Some(&oracle), &images, 50, MAX_BYTES);
    let s = worker.run(10, Duration::ZERO).await;

    assert_eq!(s.prefiltered, 1);
    assert_eq!(s.image_rejected, 1);
    assert_eq!(s.oracle_calls, 3);
    assert_eq!(s.failures, 1);
    assert_eq!(s.not_found, 1);
    assert_eq!(s.enriched, 1);
    assert!(!s.budget_exhausted);

    let ids: Vec<String> = ["meta", "big", "err", "none", "ok"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let posts = store.get_posts(&ids).unwrap();
    let identity = |id: &str| posts.iter().find(|p| p.id == id).unwrap().identity.clone();

    assert_eq!(identity("meta"), Identity::NotFound);
    assert_eq!(identity("big"), Identity::NotFound);
    assert_eq!(identity("err"), Identity::Unset, "oracle errors stay retryable");
    assert_eq!(identity("none"), Identity::NotFound);
    assert_eq!(identity("ok").name(), Some("Sam Lee"));
}

#[tokio::test]
async fn prefiltered_and_rejected_posts_do_not_consume_budget() {
    let store = memory_store();
    seed(&store, "q", "Anyone else tired of these posts?", 50, None);
    seed(&store, "gone", "Deleted image", 40, None);
    seed(&store, "real", "Founder humblebrag", 30, None);

    let oracle = ScriptedOracle::always(found("Alex Kim"));
    let images = FakeImages::default().with_missing("https://i.redd.it/gone.png");
    let worker = EnrichmentWorker::new(&store, Some(&oracle), &images, 1, MAX_BYTES);
    let s = worker.run(1, Duration::ZERO).await;

    assert_eq!(s.oracle_calls, 1);
    assert_eq!(s.processed(), 3);
    assert!(store.enrichment_candidates(10).unwrap().is_empty());
}

#[tokio::test]
async fn missing_oracle_disables_the_worker() {
    let store = memory_store();
    seed(&store, "p", "Anything", 1, None);
    let images = FakeImages::default();

    let worker = EnrichmentWorker::new(&store, None, &images, 50, MAX_BYTES);
    let s = worker.run(10, Duration::ZERO).await;

    assert!(s.disabled);
    assert_eq!(s.oracle_calls, 0);
    assert_eq!(s.errors.len(), 1);
    assert_eq!(store.enrichment_candidates(10).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn per_call_delay_separates_oracle_calls() {
    let store = memory_store();
    for i in 1..=3 {
        seed(&store, &format!("d{i}"), "Boss brags", i, None);
    }
    let oracle = ScriptedOracle::always(OracleOutcome::NoIdentityFound);
    let images = FakeImages::default();
    let worker = EnrichmentWorker::new(&store, Some(&oracle as &dyn VisionOracle), &images, 50, MAX_BYTES);

    let started = tokio::time::Instant::now();
    let s = worker.run(10, Duration::from_secs(60)).await;

    assert_eq!(s.oracle_calls, 3);
    // Pauses between calls only: two of them.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(120) && waited < Duration::from_secs(180), "{waited:?}");
}
