//! Obsolete: withdraw the update, optionally in favour of a newer build.

use karmagate_core::{Alias, Update, UpdateStatus};
use tracing::info;

use super::{untag_all, TransitionContext, TransitionResult};
use crate::state_machine::effect::Effect;

pub fn handle(
    ctx: &TransitionContext<'_>,
    mut update: Update,
    actor: &str,
    newer: Option<(String, Alias)>,
) -> TransitionResult {
    info!("Obsoleting {}", update.alias);

    let mut effects = untag_all(ctx.release, &update);

    update.status = UpdateStatus::Obsolete;
    update.request = None;

    let text = match &newer {
        Some((nvr, alias)) => format!(
            "This update has been obsoleted by [{}]({}).",
            nvr,
            ctx.policy.update_url(alias)
        ),
        None => "This update has been obsoleted.".to_string(),
    };
    update.add_comment(ctx.system_comment(text));

    effects.push(Effect::publish("update.request.obsolete", &update, actor));
    TransitionResult::new(update, effects)
}
