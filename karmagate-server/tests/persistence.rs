mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{new_update, release, start, vote};
use karmagate_core::{PolicyConfig, UpdateStatus};
use karmagate_server::collaborators::{InMemoryNotifier, InMemoryTagger, NoopBugTracker};
use karmagate_server::state_machine::{
    InterpreterContext, RetryPolicy, SqliteRepository, UpdateRepository,
};
use karmagate_server::Engine;

fn engine_on(repository: Arc<SqliteRepository>) -> Engine {
    let interpreter = InterpreterContext {
        tagger: Arc::new(InMemoryTagger::new()),
        bug_tracker: Arc::new(NoopBugTracker),
        notifier: Arc::new(InMemoryNotifier::new()),
        repository,
        retry: RetryPolicy {
            attempts: 1,
            timeout: Duration::from_millis(500),
            backoff: Duration::from_millis(1),
        },
    };
    Engine::new(Arc::new(PolicyConfig::default()), interpreter).with_clock(start)
}

#[tokio::test]
async fn test_engine_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state").join("karmagate-state.db");

    let alias = {
        let repository = Arc::new(SqliteRepository::new(&db_path).unwrap());
        repository.put_release(&release()).await.unwrap();
        let engine = engine_on(repository);

        let old = engine
            .create_update(new_update(&["pkg-1.0-1.fc40"]))
            .await
            .unwrap()
            .update;
        engine
            .add_comment(&old.alias, vote("alice", 1))
            .await
            .unwrap();
        engine
            .create_update(new_update(&["pkg-1.1-1.fc40"]))
            .await
            .unwrap();
        old.alias
    };

    let repository = Arc::new(SqliteRepository::new(&db_path).unwrap());
    let engine = engine_on(repository.clone());
    let old = engine.get_update(&alias).await.unwrap();
    assert_eq!(old.status, UpdateStatus::Obsolete);
    assert!(old.comments.iter().any(|c| c.author == "alice" && c.karma == 1));

    let pending = repository
        .updates_with_status(UpdateStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].nvrs(), vec!["pkg-1.1-1.fc40"]);
    assert_eq!(
        repository.find_build_owner("pkg-1.1-1.fc40").await.unwrap(),
        Some(pending[0].alias.clone())
    );
}
