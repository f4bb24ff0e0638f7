mod common;

use std::sync::Arc;

use common::{harness_with_tagger, new_update, FlakyTagger};
use karmagate_core::{UpdateRequest, UpdateStatus};

#[tokio::test]
async fn test_transient_tagger_failures_are_retried() {
    let tagger = Arc::new(FlakyTagger::failing(2));
    let h = harness_with_tagger(tagger.clone(), 3).await;

    let outcome = h
        .engine
        .create_update(new_update(&["pkg-1.0-1.fc40"]))
        .await
        .unwrap();

    assert!(outcome.caveats.iter().all(|c| c.name != "external"));
    assert!(tagger
        .inner
        .is_tagged("f40-signing-pending", "pkg-1.0-1.fc40")
        .await);
}

#[tokio::test]
async fn test_exhausted_retries_become_caveats_after_commit() {
    let tagger = Arc::new(FlakyTagger::failing(u32::MAX));
    let h = harness_with_tagger(tagger.clone(), 2).await;

    let outcome = h
        .engine
        .create_update(new_update(&["pkg-1.0-1.fc40"]))
        .await
        .unwrap();

    let external: Vec<_> = outcome
        .caveats
        .iter()
        .filter(|c| c.name == "external")
        .collect();
    assert_eq!(external.len(), 1);
    assert!(external[0].description.contains("hub is down"));

    // The state change stands even though tagging failed.
    let stored = h.engine.get_update(&outcome.update.alias).await.unwrap();
    assert_eq!(stored.status, UpdateStatus::Pending);
    assert_eq!(stored.request, Some(UpdateRequest::Testing));
    assert!(!tagger
        .inner
        .is_tagged("f40-signing-pending", "pkg-1.0-1.fc40")
        .await);

    // Other effects of the same operation still ran.
    assert_eq!(h.notifier.topics().await, vec!["update.request.testing"]);
}
