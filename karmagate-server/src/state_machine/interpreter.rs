//! Effect interpreter that executes effects against the collaborators.
//!
//! The interpreter is the boundary between the pure state machine and the
//! unreliable world outside. It runs after the state change is committed,
//! so nothing it does can roll that change back. Each call is bounded by a
//! timeout and retried a few times with linear backoff; a call that still
//! fails is logged and reported as a caveat.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use karmagate_core::Bug;
use tracing::{error, info, warn};

use super::effect::{Caveat, Effect, PendingEffects};
use super::repository::UpdateRepository;
use crate::collaborators::{BugTracker, BuildTagger, CollaboratorError, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
            backoff: Duration::from_millis(200),
        }
    }
}

/// Context needed by the interpreter to execute effects.
#[derive(Clone)]
pub struct InterpreterContext {
    pub tagger: Arc<dyn BuildTagger>,
    pub bug_tracker: Arc<dyn BugTracker>,
    pub notifier: Arc<dyn Notifier>,
    /// Where refreshed bug details are cached.
    pub repository: Arc<dyn UpdateRepository>,
    pub retry: RetryPolicy,
}

/// Run `call` until it succeeds or the retry policy is exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = CollaboratorError::Timeout(0);

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(
                u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("Attempt {}/{} to {} failed: {}", attempt, attempts, what, e);
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
        }
    }

    Err(last_error)
}

/// Execute effects in order and collect caveats for the ones that failed.
///
/// A failed effect does not stop the remaining ones.
pub async fn execute_effects(ctx: &InterpreterContext, batches: Vec<PendingEffects>) -> Vec<Caveat> {
    let mut caveats = Vec::new();

    for batch in batches {
        if batch.effects.is_empty() {
            continue;
        }
        info!(
            "Executing {} effects for {}",
            batch.effects.len(),
            batch.alias
        );
        for effect in batch.effects {
            let what = effect.describe();
            if let Err(e) = execute_effect(ctx, effect).await {
                error!("Effect '{}' for {} failed: {}", what, batch.alias, e);
                caveats.push(Caveat::new(
                    "external",
                    format!("Could not {} for {}: {}", what, batch.alias, e),
                ));
            }
        }
    }

    caveats
}

async fn execute_effect(ctx: &InterpreterContext, effect: Effect) -> Result<(), CollaboratorError> {
    let what = effect.describe();
    let retry = &ctx.retry;

    match effect {
        Effect::TagBuild { tag, nvr } => {
            with_retry(retry, &what, || ctx.tagger.tag_build(&tag, &nvr)).await
        }

        Effect::UntagBuild { tag, nvr } => {
            with_retry(retry, &what, || ctx.tagger.untag_build(&tag, &nvr)).await
        }

        Effect::UntagKnown { nvr, tags } => {
            let current = with_retry(retry, &what, || ctx.tagger.list_tags(&nvr)).await?;
            for tag in current.iter().filter(|t| tags.contains(t)) {
                with_retry(retry, &what, || ctx.tagger.untag_build(tag, &nvr)).await?;
            }
            Ok(())
        }

        Effect::BugComment { bug_id, text } => {
            with_retry(retry, &what, || ctx.bug_tracker.comment(bug_id, &text)).await
        }

        Effect::BugSetStatus {
            bug_id,
            status,
            comment,
        } => {
            with_retry(retry, &what, || {
                ctx.bug_tracker.set_status(bug_id, &status, &comment)
            })
            .await
        }

        Effect::BugClose {
            bug_id,
            fixed_in,
            comment,
        } => {
            with_retry(retry, &what, || {
                ctx.bug_tracker.close(bug_id, &fixed_in, &comment)
            })
            .await
        }

        Effect::RefreshBug { bug_id } => {
            let details =
                with_retry(retry, &what, || ctx.bug_tracker.fetch_details(bug_id)).await?;
            let cached = ctx
                .repository
                .get_bugs(&[bug_id])
                .await
                .map_err(|e| CollaboratorError::rejected("repository", e.to_string()))?;
            let bug = Bug {
                bug_id,
                title: Some(details.title),
                security: details.security,
                parent: cached.first().is_some_and(|b| b.parent),
            };
            ctx.repository
                .put_bug(&bug)
                .await
                .map_err(|e| CollaboratorError::rejected("repository", e.to_string()))
        }

        Effect::Publish { topic, payload } => {
            with_retry(retry, &what, || ctx.notifier.publish(&topic, &payload)).await
        }
    }
}
