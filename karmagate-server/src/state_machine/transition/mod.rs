//! Pure request transition function.
//!
//! `transition` takes an update and a request event and returns the new
//! update together with the effects that must follow once it is committed.
//! It performs no I/O: system comments are appended to the returned update,
//! everything external is described as an `Effect`.
//!
//! Each request has its own handler module with co-located tests:
//! - `promote`: testing and stable requests, including critical path gating
//! - `unpush`: unpush requests
//! - `obsolete`: obsolete requests and obsoletion by a newer build
//! - `revoke`: revoke requests
//! - `complete`: the push of a request has physically happened

mod complete;
mod obsolete;
mod promote;
mod revoke;
mod unpush;

use karmagate_core::{Alias, Bug, Comment, PolicyConfig, Release, Timestamp, Update, UpdateRequest};
use tracing::debug;

use super::effect::{Caveat, Effect};
use crate::error::EngineError;

/// What happened to an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    SetRequest {
        action: UpdateRequest,
        actor: String,
    },
    /// A newer build from another update supersedes this one.
    ObsoletedBy { nvr: String, alias: Alias },
    /// The requested push has happened.
    Complete { bugs: Vec<Bug> },
}

/// Read-only facts a transition needs.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub policy: &'a PolicyConfig,
    pub release: &'a Release,
    pub now: Timestamp,
}

impl TransitionContext<'_> {
    pub fn system_comment(&self, text: impl Into<String>) -> Comment {
        Comment::text(self.policy.system_account.clone(), text, self.now)
    }
}

/// Result of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    /// The update after the transition. Committed even when rejected.
    pub update: Update,
    pub effects: Vec<Effect>,
    pub caveats: Vec<Caveat>,
    /// Policy explanation when the request was refused.
    pub rejection: Option<String>,
}

impl TransitionResult {
    pub fn new(update: Update, effects: Vec<Effect>) -> Self {
        Self {
            update,
            effects,
            caveats: vec![],
            rejection: None,
        }
    }

    pub fn no_change(update: Update) -> Self {
        Self::new(update, vec![])
    }

    pub fn rejected(update: Update, reason: impl Into<String>) -> Self {
        Self {
            update,
            effects: vec![],
            caveats: vec![],
            rejection: Some(reason.into()),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    /// Turn a rejection into the error the caller sees.
    pub fn into_result(self) -> Result<Self, EngineError> {
        match self.rejection {
            Some(reason) => Err(EngineError::PolicyViolation(reason)),
            None => Ok(self),
        }
    }
}

/// Pure transition function.
///
/// Returns `Err(LockedUpdate)` for requests on a locked update. Policy
/// refusals are returned as a rejected `TransitionResult` because the
/// refused update may still have changed (its request is cleared).
pub fn transition(
    ctx: &TransitionContext<'_>,
    update: Update,
    event: RequestEvent,
) -> Result<TransitionResult, EngineError> {
    match event {
        RequestEvent::SetRequest { action, actor } => {
            if update.locked {
                return Err(EngineError::LockedUpdate(update.alias.to_string()));
            }
            if action.target_status() == Some(update.status) || update.request == Some(action) {
                debug!(
                    "{} already {} ({:?}); ignoring {} request",
                    update.alias, update.status, update.request, action
                );
                return Ok(TransitionResult::no_change(update));
            }
            Ok(match action {
                UpdateRequest::Testing | UpdateRequest::Stable => {
                    promote::handle(ctx, update, action, &actor)
                }
                UpdateRequest::Unpush => unpush::handle(ctx, update, &actor),
                UpdateRequest::Obsolete => obsolete::handle(ctx, update, &actor, None),
                UpdateRequest::Revoke => revoke::handle(ctx, update, &actor),
            })
        }
        RequestEvent::ObsoletedBy { nvr, alias } => {
            let actor = ctx.policy.system_account.clone();
            Ok(obsolete::handle(ctx, update, &actor, Some((nvr, alias))))
        }
        RequestEvent::Complete { bugs } => Ok(complete::handle(ctx, update, &bugs)),
    }
}

/// Remove every build of the update from the release's active tags.
fn untag_all(release: &Release, update: &Update) -> Vec<Effect> {
    let tags: Vec<String> = release.tags.active().into_iter().map(String::from).collect();
    update
        .builds
        .iter()
        .map(|b| Effect::UntagKnown {
            nvr: b.nvr.clone(),
            tags: tags.clone(),
        })
        .collect()
}

fn tag_all(tag: &str, update: &Update) -> Vec<Effect> {
    update.builds.iter().map(|b| Effect::tag(tag, &b.nvr)).collect()
}
