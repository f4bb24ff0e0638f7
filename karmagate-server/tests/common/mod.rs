#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use karmagate_core::{
    Alias, PolicyConfig, Release, ReleaseState, ReleaseTags, Timestamp, UpdateType,
};
use karmagate_server::collaborators::{
    BuildInfo, BuildTagger, CollaboratorError, InMemoryNotifier, InMemoryTagger, NoopBugTracker,
};
use karmagate_server::state_machine::{
    InMemoryRepository, InterpreterContext, RetryPolicy, UpdateRepository,
};
use karmagate_server::{Engine, NewComment, NewUpdate};

pub fn start() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn release() -> Release {
    Release {
        name: "F40".to_string(),
        long_name: "Fedora 40".to_string(),
        version: "40".to_string(),
        id_prefix: "FEDORA".to_string(),
        tags: ReleaseTags::for_dist("f40"),
        mandatory_days_in_testing: 7,
        state: ReleaseState::Current,
        critpath_min_karma: None,
        critpath_num_admin_approvals: None,
    }
}

/// Clock the tests can move forward.
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<Timestamp>>);

impl TestClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(start())))
    }

    pub fn now(&self) -> Timestamp {
        *self.0.lock().unwrap()
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::days(days);
    }
}

/// Tagger that fails a fixed number of calls before delegating.
pub struct FlakyTagger {
    failures_left: AtomicU32,
    pub inner: InMemoryTagger,
}

impl FlakyTagger {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            inner: InMemoryTagger::new(),
        }
    }

    fn fail(&self) -> Result<(), CollaboratorError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(CollaboratorError::unavailable("tagger", "hub is down"));
        }
        Ok(())
    }
}

#[async_trait]
impl BuildTagger for FlakyTagger {
    async fn tag_build(&self, tag: &str, nvr: &str) -> Result<(), CollaboratorError> {
        self.fail()?;
        self.inner.tag_build(tag, nvr).await
    }

    async fn untag_build(&self, tag: &str, nvr: &str) -> Result<(), CollaboratorError> {
        self.fail()?;
        self.inner.untag_build(tag, nvr).await
    }

    async fn list_tags(&self, nvr: &str) -> Result<Vec<String>, CollaboratorError> {
        self.inner.list_tags(nvr).await
    }

    async fn list_tagged(
        &self,
        tag: &str,
        latest_only: bool,
    ) -> Result<Vec<BuildInfo>, CollaboratorError> {
        self.inner.list_tagged(tag, latest_only).await
    }
}

pub struct Harness {
    pub engine: Engine,
    pub repository: Arc<InMemoryRepository>,
    pub notifier: Arc<InMemoryNotifier>,
    pub clock: TestClock,
}

pub async fn harness() -> (Harness, Arc<InMemoryTagger>) {
    let tagger = Arc::new(InMemoryTagger::new());
    let harness = harness_with_tagger(tagger.clone(), 1).await;
    (harness, tagger)
}

pub async fn harness_with_tagger(tagger: Arc<dyn BuildTagger>, attempts: u32) -> Harness {
    let repository = Arc::new(InMemoryRepository::new());
    repository.put_release(&release()).await.unwrap();
    let notifier = Arc::new(InMemoryNotifier::new());
    let clock = TestClock::new();
    let interpreter = InterpreterContext {
        tagger,
        bug_tracker: Arc::new(NoopBugTracker),
        notifier: notifier.clone(),
        repository: repository.clone(),
        retry: RetryPolicy {
            attempts,
            timeout: Duration::from_millis(500),
            backoff: Duration::from_millis(1),
        },
    };
    let engine_clock = clock.clone();
    let engine = Engine::new(Arc::new(PolicyConfig::default()), interpreter)
        .with_clock(move || engine_clock.now());
    Harness {
        engine,
        repository,
        notifier,
        clock,
    }
}

pub fn new_update(builds: &[&str]) -> NewUpdate {
    NewUpdate {
        release: "F40".to_string(),
        builds: builds.iter().map(|b| b.to_string()).collect(),
        submitter: "packager".to_string(),
        notes: "Update to the latest upstream release".to_string(),
        update_type: UpdateType::Bugfix,
        severity: Default::default(),
        bugs: vec![],
        stable_karma: Some(3),
        unstable_karma: Some(-3),
        stable_days: None,
        autokarma: true,
        autotime: false,
        close_bugs: true,
        request: None,
    }
}

/// Create an update and push it through the testing compose.
pub async fn update_in_testing(h: &Harness, new: NewUpdate) -> Alias {
    let created = h.engine.create_update(new).await.unwrap();
    let alias = created.update.alias;
    h.engine.lock_for_push(&alias).await.unwrap();
    h.engine.request_complete(&alias).await.unwrap();
    alias
}

pub fn vote(author: &str, karma: i32) -> NewComment {
    NewComment::new(author, "Works for me").with_karma(karma)
}
