mod common;

use common::{harness, new_update, update_in_testing, vote};
use karmagate_core::{UpdateRequest, UpdateStatus, UpdateType};
use karmagate_server::collaborators::BuildTagger;
use karmagate_server::EngineError;

#[tokio::test]
async fn test_three_positive_votes_promote_to_stable() {
    let (h, tagger) = harness().await;
    let alias = update_in_testing(&h, new_update(&["pkg-1.0-1.fc40"])).await;

    for author in ["alice", "bob"] {
        let outcome = h.engine.add_comment(&alias, vote(author, 1)).await.unwrap();
        assert_eq!(outcome.update.request, None);
    }
    let outcome = h.engine.add_comment(&alias, vote("carol", 1)).await.unwrap();

    assert_eq!(outcome.update.status, UpdateStatus::Testing);
    assert_eq!(outcome.update.request, Some(UpdateRequest::Stable));
    assert!(tagger.is_tagged("f40-updates-pending", "pkg-1.0-1.fc40").await);

    let events = h.notifier.events().await;
    let reached = events
        .iter()
        .find(|e| e.topic == "update.karma.threshold.reach")
        .expect("threshold event published");
    assert_eq!(reached.payload["status"], "stable");
}

#[tokio::test]
async fn test_negative_vote_after_promotion_disables_autopush() {
    let (h, _tagger) = harness().await;
    let alias = update_in_testing(&h, new_update(&["pkg-1.0-1.fc40"])).await;
    for author in ["alice", "bob", "carol"] {
        h.engine.add_comment(&alias, vote(author, 1)).await.unwrap();
    }

    let outcome = h.engine.add_comment(&alias, vote("dave", -1)).await.unwrap();

    let update = outcome.update;
    assert_eq!(update.status, UpdateStatus::Testing);
    assert!(!update.autokarma);
    assert!(!update.autotime);
    assert_eq!(
        update.comments.last().unwrap().text,
        h.engine.policy().disable_autopush_msg
    );
}

#[tokio::test]
async fn test_unstable_karma_obsoletes_update_in_testing() {
    let (h, tagger) = harness().await;
    let alias = update_in_testing(&h, new_update(&["pkg-1.0-1.fc40"])).await;
    tagger
        .tag_build("f40-updates-testing", "pkg-1.0-1.fc40")
        .await
        .unwrap();

    h.engine.add_comment(&alias, vote("alice", -1)).await.unwrap();
    h.engine.add_comment(&alias, vote("bob", -1)).await.unwrap();
    let outcome = h.engine.add_comment(&alias, vote("carol", -1)).await.unwrap();

    assert_eq!(outcome.update.status, UpdateStatus::Obsolete);
    assert_eq!(outcome.update.request, None);
    assert!(!tagger.is_tagged("f40-updates-testing", "pkg-1.0-1.fc40").await);
    let events = h.notifier.events().await;
    assert!(events
        .iter()
        .any(|e| e.topic == "update.karma.threshold.reach" && e.payload["status"] == "unstable"));
}

#[tokio::test]
async fn test_newer_build_obsoletes_pending_update() {
    let (h, _tagger) = harness().await;
    let mut old = new_update(&["pkg-1.0-1.fc40"]);
    old.bugs = vec![1234];
    old.notes = "Fix a crash".to_string();
    let old = h.engine.create_update(old).await.unwrap().update;

    let mut new = new_update(&["pkg-2.0-1.fc40"]);
    new.notes = "Rebase to 2.0".to_string();
    let outcome = h.engine.create_update(new).await.unwrap();

    assert_eq!(outcome.update.bugs, vec![1234]);
    assert_eq!(outcome.update.notes, "Rebase to 2.0\n\n----\n\nFix a crash");
    assert!(outcome
        .caveats
        .iter()
        .any(|c| c.description == "This update has obsoleted pkg-1.0-1.fc40, and has inherited its bugs and notes."));

    let old = h.engine.get_update(&old.alias).await.unwrap();
    assert_eq!(old.status, UpdateStatus::Obsolete);
    assert!(old
        .comments
        .last()
        .unwrap()
        .text
        .starts_with("This update has been obsoleted by [pkg-2.0-1.fc40]"));
}

#[tokio::test]
async fn test_update_with_more_packages_is_not_obsoleted() {
    let (h, _tagger) = harness().await;
    let old = h
        .engine
        .create_update(new_update(&["pkg-1.0-1.fc40", "lib-1.0-1.fc40"]))
        .await
        .unwrap()
        .update;

    let outcome = h
        .engine
        .create_update(new_update(&["pkg-2.0-1.fc40"]))
        .await
        .unwrap();

    assert_eq!(outcome.update.status, UpdateStatus::Pending);
    let old = h.engine.get_update(&old.alias).await.unwrap();
    assert_eq!(old.status, UpdateStatus::Pending);
    assert_eq!(old.request, Some(UpdateRequest::Testing));
}

#[tokio::test]
async fn test_security_update_obsoleting_keeps_security_type() {
    let (h, _tagger) = harness().await;
    let mut old = new_update(&["pkg-1.0-1.fc40"]);
    old.update_type = UpdateType::Security;
    old.severity = karmagate_core::UpdateSeverity::High;
    h.engine.create_update(old).await.unwrap();

    let outcome = h
        .engine
        .create_update(new_update(&["pkg-1.0-2.fc40"]))
        .await
        .unwrap();
    assert_eq!(outcome.update.update_type, UpdateType::Security);
}

#[tokio::test]
async fn test_locked_update_refuses_every_request() {
    let (h, _tagger) = harness().await;
    let created = h
        .engine
        .create_update(new_update(&["pkg-1.0-1.fc40"]))
        .await
        .unwrap();
    let alias = created.update.alias;
    h.engine.lock_for_push(&alias).await.unwrap();

    for action in [
        UpdateRequest::Testing,
        UpdateRequest::Stable,
        UpdateRequest::Obsolete,
        UpdateRequest::Unpush,
        UpdateRequest::Revoke,
    ] {
        let result = h.engine.set_request(&alias, action, "packager").await;
        assert!(
            matches!(result, Err(EngineError::LockedUpdate(_))),
            "{action} on a locked update"
        );
    }
}

#[tokio::test]
async fn test_autotime_sweep_pushes_after_stable_days() {
    let (h, tagger) = harness().await;
    let mut new = new_update(&["pkg-1.0-1.fc40"]);
    new.autotime = true;
    let alias = update_in_testing(&h, new).await;

    let early = h.engine.approve_testing().await.unwrap();
    assert_eq!(early.pushed, 0);

    h.clock.advance_days(7);
    let report = h.engine.approve_testing().await.unwrap();
    assert_eq!(report.pushed, 1);

    let update = h.engine.get_update(&alias).await.unwrap();
    assert_eq!(update.request, Some(UpdateRequest::Stable));
    assert!(tagger.is_tagged("f40-updates-pending", "pkg-1.0-1.fc40").await);
}
