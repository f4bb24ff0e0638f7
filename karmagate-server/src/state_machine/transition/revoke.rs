//! Revoke: withdraw a pending request.

use karmagate_core::{Update, UpdateRequest, UpdateStatus};
use tracing::info;

use super::{TransitionContext, TransitionResult};
use crate::state_machine::effect::Effect;

pub fn handle(ctx: &TransitionContext<'_>, mut update: Update, actor: &str) -> TransitionResult {
    let Some(request) = update.request else {
        return TransitionResult::rejected(
            update,
            "Can only revoke an update with an existing request",
        );
    };

    if !matches!(
        update.status,
        UpdateStatus::Pending | UpdateStatus::Testing | UpdateStatus::Obsolete | UpdateStatus::Unpushed
    ) {
        let reason = format!(
            "Can only revoke a request on an update in pending, testing, unpushed or obsolete status, not {}",
            update.status
        );
        update.request = None;
        return TransitionResult::rejected(update, reason);
    }

    info!(
        "Revoking {} request on {} at the request of {}",
        request, update.alias, actor
    );

    if update.status == UpdateStatus::Pending && request == UpdateRequest::Testing {
        update.status = UpdateStatus::Unpushed;
    }
    // A stable request on a testing update leaves it in testing.

    let mut effects: Vec<Effect> = ctx
        .release
        .tags
        .pending_for(request)
        .into_iter()
        .flat_map(|tag| update.builds.iter().map(move |b| Effect::untag(tag, &b.nvr)))
        .collect();

    update.request = None;
    update.add_comment(ctx.system_comment(format!(
        "This update's {} request has been revoked by {}.",
        request, actor
    )));

    effects.push(Effect::publish("update.request.revoke", &update, actor));
    TransitionResult::new(update, effects)
}
