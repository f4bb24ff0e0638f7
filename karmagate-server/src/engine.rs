//! The engine: per-update operations that load, transition, commit and only
//! then talk to collaborators.
//!
//! Every operation follows the same shape:
//! 1. take the update's lock and load it
//! 2. run pure policy code (`transition`, ledger, evaluator)
//! 3. commit every touched update in one repository transaction
//! 4. release the lock and execute the collected effects
//!
//! Effect failures become caveats on the returned `Outcome`.

use std::sync::Arc;

use chrono::Utc;
use karmagate_core::{Alias, PolicyConfig, Release, Timestamp, Update, UpdateRequest};
use serde_json::json;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::state_machine::{
    execute_effects, transition, update_summary, Caveat, Effect, InterpreterContext,
    PendingEffects, RequestEvent, TransitionContext, TransitionResult, UpdateStore,
};

/// Source of the current time. Injectable so tests can move the clock.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Result of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub update: Update,
    pub caveats: Vec<Caveat>,
}

#[derive(Clone)]
pub struct Engine {
    pub(crate) policy: Arc<PolicyConfig>,
    pub(crate) store: Arc<UpdateStore>,
    pub(crate) interpreter: InterpreterContext,
    clock: Clock,
}

impl Engine {
    pub fn new(policy: Arc<PolicyConfig>, interpreter: InterpreterContext) -> Self {
        let store = Arc::new(UpdateStore::new(interpreter.repository.clone()));
        Self {
            policy,
            store,
            interpreter,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn store(&self) -> &UpdateStore {
        &self.store
    }

    pub(crate) fn now(&self) -> Timestamp {
        (self.clock)()
    }

    pub(crate) fn context<'a>(&'a self, release: &'a Release, now: Timestamp) -> TransitionContext<'a> {
        TransitionContext {
            policy: &self.policy,
            release,
            now,
        }
    }

    pub async fn get_update(&self, alias: &Alias) -> Result<Update, EngineError> {
        self.store.load(alias).await
    }

    /// Execute effects for already committed updates.
    pub(crate) async fn run_effects(&self, batches: Vec<PendingEffects>) -> Vec<Caveat> {
        execute_effects(&self.interpreter, batches).await
    }

    /// Change the request of an update on behalf of `actor`.
    ///
    /// A refused request is still committed (the refusal may clear the
    /// request) and then returned as `PolicyViolation`.
    pub async fn set_request(
        &self,
        alias: &Alias,
        action: UpdateRequest,
        actor: &str,
    ) -> Result<Outcome, EngineError> {
        let now = self.now();
        let guard = self.store.lock(alias).await;
        let update = self.store.load(alias).await?;
        let release = self.store.release(&update.release).await?;
        let ctx = self.context(&release, now);

        info!("{} requested {} for {}", actor, action, alias);
        let result = transition(
            &ctx,
            update,
            RequestEvent::SetRequest {
                action,
                actor: actor.to_string(),
            },
        )?;
        self.store
            .commit(std::slice::from_ref(&result.update))
            .await?;
        drop(guard);

        let TransitionResult {
            update,
            effects,
            mut caveats,
            rejection,
        } = result;
        if let Some(reason) = rejection {
            warn!("{} request for {} refused: {}", action, alias, reason);
            return Err(EngineError::PolicyViolation(reason));
        }

        caveats.extend(
            self.run_effects(vec![PendingEffects {
                alias: alias.clone(),
                effects,
            }])
            .await,
        );
        Ok(Outcome { update, caveats })
    }

    /// Record that the compose has pushed the update's pending request.
    pub async fn request_complete(&self, alias: &Alias) -> Result<Outcome, EngineError> {
        let now = self.now();
        let guard = self.store.lock(alias).await;
        let update = self.store.load(alias).await?;
        let release = self.store.release(&update.release).await?;
        let bugs = self.store.repository().get_bugs(&update.bugs).await?;
        let ctx = self.context(&release, now);

        let result = transition(&ctx, update, RequestEvent::Complete { bugs })?;
        self.store
            .commit(std::slice::from_ref(&result.update))
            .await?;
        drop(guard);

        let mut caveats = result.caveats;
        caveats.extend(
            self.run_effects(vec![PendingEffects {
                alias: alias.clone(),
                effects: result.effects,
            }])
            .await,
        );
        Ok(Outcome {
            update: result.update,
            caveats,
        })
    }

    /// Lock an update for a compose. Locked updates refuse request changes
    /// and build edits until the push completes.
    pub async fn lock_for_push(&self, alias: &Alias) -> Result<Outcome, EngineError> {
        let now = self.now();
        let _guard = self.store.lock(alias).await;
        let mut update = self.store.load(alias).await?;
        if update.locked {
            return Err(EngineError::LockedUpdate(alias.to_string()));
        }
        if update.request.is_none() {
            return Err(EngineError::PolicyViolation(format!(
                "{} has no request to push",
                alias
            )));
        }

        update.locked = true;
        update.date_locked = Some(now);
        self.store.commit(std::slice::from_ref(&update)).await?;
        info!("Locked {} for push", alias);
        Ok(Outcome {
            update,
            caveats: vec![],
        })
    }

    /// Run a transition on an update whose lock the caller holds and fold a
    /// refusal into `caveats`. Returns the new update and whether the
    /// request went through.
    pub(crate) fn apply(
        &self,
        ctx: &TransitionContext<'_>,
        update: Update,
        event: RequestEvent,
        effects: &mut Vec<Effect>,
        caveats: &mut Vec<Caveat>,
    ) -> Result<(Update, bool), EngineError> {
        let result = transition(ctx, update, event)?;
        effects.extend(result.effects);
        caveats.extend(result.caveats);
        match result.rejection {
            Some(reason) => {
                info!("Request on {} refused: {}", result.update.alias, reason);
                caveats.push(Caveat::new("request", reason));
                Ok((result.update, false))
            }
            None => Ok((result.update, true)),
        }
    }

    /// Event published when karma moves an update on its own.
    pub(crate) fn threshold_reached(update: &Update, status: &str) -> Effect {
        Effect::Publish {
            topic: "update.karma.threshold.reach".to_string(),
            payload: json!({
                "update": update_summary(update),
                "status": status,
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::state_machine::transition::test_support::{now, update};
    use crate::state_machine::UpdateRepository;
    use karmagate_core::UpdateStatus;

    #[tokio::test]
    async fn test_set_request_commits_and_runs_effects() {
        let h = harness().await;
        let u = update(UpdateStatus::Pending, None);
        h.repository.commit(std::slice::from_ref(&u)).await.unwrap();

        let outcome = h
            .engine
            .set_request(&u.alias, UpdateRequest::Testing, "maintainer")
            .await
            .unwrap();

        assert_eq!(outcome.update.request, Some(UpdateRequest::Testing));
        assert!(outcome.caveats.is_empty());
        assert!(h.tagger.is_tagged("f40-signing-pending", "pkg-1.0-1.fc40").await);
        assert_eq!(h.notifier.topics().await, vec!["update.request.testing"]);
        assert_eq!(h.engine.get_update(&u.alias).await.unwrap(), outcome.update);
    }

    #[tokio::test]
    async fn test_refused_request_is_committed_then_reported() {
        let h = harness().await;
        // One day in testing and no karma is not enough for stable.
        let mut u = update(UpdateStatus::Testing, None);
        u.date_testing = Some(now() - chrono::Duration::days(1));
        h.repository.commit(std::slice::from_ref(&u)).await.unwrap();

        let result = h
            .engine
            .set_request(&u.alias, UpdateRequest::Stable, "maintainer")
            .await;
        assert!(matches!(result, Err(EngineError::PolicyViolation(_))));

        let stored = h.engine.get_update(&u.alias).await.unwrap();
        assert_eq!(stored.request, None);
        assert!(h.notifier.topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_update_is_not_found() {
        let h = harness().await;
        let result = h
            .engine
            .set_request(&Alias::from("FEDORA-2024-missing"), UpdateRequest::Testing, "x")
            .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_lock_for_push_blocks_requests_until_complete() {
        let h = harness().await;
        let u = update(UpdateStatus::Pending, Some(UpdateRequest::Testing));
        h.repository.commit(std::slice::from_ref(&u)).await.unwrap();

        let locked = h.engine.lock_for_push(&u.alias).await.unwrap();
        assert!(locked.update.locked);
        assert!(matches!(
            h.engine.lock_for_push(&u.alias).await,
            Err(EngineError::LockedUpdate(_))
        ));
        assert!(matches!(
            h.engine
                .set_request(&u.alias, UpdateRequest::Revoke, "maintainer")
                .await,
            Err(EngineError::LockedUpdate(_))
        ));

        let done = h.engine.request_complete(&u.alias).await.unwrap();
        assert_eq!(done.update.status, UpdateStatus::Testing);
        assert!(!done.update.locked);
        assert_eq!(h.notifier.topics().await, vec!["update.complete.testing"]);
    }

    #[tokio::test]
    async fn test_lock_for_push_requires_a_request() {
        let h = harness().await;
        let u = update(UpdateStatus::Testing, None);
        h.repository.commit(std::slice::from_ref(&u)).await.unwrap();
        assert!(matches!(
            h.engine.lock_for_push(&u.alias).await,
            Err(EngineError::PolicyViolation(_))
        ));
    }
}
