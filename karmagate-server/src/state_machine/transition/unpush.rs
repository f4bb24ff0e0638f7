//! Unpush: pull the update's builds back to the candidate tag.

use karmagate_core::{Update, UpdateStatus};
use tracing::info;

use super::{tag_all, untag_all, TransitionContext, TransitionResult};
use crate::state_machine::effect::Effect;

pub fn handle(ctx: &TransitionContext<'_>, mut update: Update, actor: &str) -> TransitionResult {
    if matches!(update.status, UpdateStatus::Stable | UpdateStatus::Obsolete) {
        update.request = None;
        let reason = format!("Can't unpush an update in {} status", update.status);
        return TransitionResult::rejected(update, reason);
    }

    info!("Unpushing {} at the request of {}", update.alias, actor);

    let mut effects = untag_all(ctx.release, &update);
    effects.extend(tag_all(&ctx.release.tags.candidate, &update));

    update.status = UpdateStatus::Unpushed;
    update.request = None;
    update.pushed = false;
    update.add_comment(ctx.system_comment("This update has been unpushed."));

    effects.push(Effect::publish("update.request.unpush", &update, actor));
    TransitionResult::new(update, effects)
}
