//! Completion of a push: the compose has moved the builds, so the request
//! becomes the status.

use karmagate_core::{Bug, Update, UpdateRequest, UpdateStatus, UpdateType};
use tracing::{info, warn};

use super::{TransitionContext, TransitionResult};
use crate::state_machine::effect::Effect;

pub fn handle(ctx: &TransitionContext<'_>, mut update: Update, bugs: &[Bug]) -> TransitionResult {
    let request = match update.request {
        Some(request @ (UpdateRequest::Testing | UpdateRequest::Stable)) => request,
        other => {
            warn!(
                "Ignoring push completion for {} with request {:?}",
                update.alias, other
            );
            return TransitionResult::no_change(update);
        }
    };

    let mut effects: Vec<Effect> = ctx
        .release
        .tags
        .pending_for(request)
        .into_iter()
        .flat_map(|tag| update.builds.iter().map(move |b| Effect::untag(tag, &b.nvr)))
        .collect();

    let repository = match request {
        UpdateRequest::Stable => {
            update.status = UpdateStatus::Stable;
            update.date_stable = Some(ctx.now);
            ctx.release.long_name.clone()
        }
        _ => {
            update.status = UpdateStatus::Testing;
            update.date_testing = Some(ctx.now);
            format!("{} testing", ctx.release.long_name)
        }
    };

    update.request = None;
    update.pushed = true;
    update.date_pushed = Some(ctx.now);
    update.locked = false;
    update.date_locked = None;
    info!("{} is now {}", update.alias, update.status);

    update.add_comment(ctx.system_comment(format!(
        "This update has been pushed to {}.",
        update.status
    )));

    effects.extend(bug_effects(ctx, &update, bugs, &repository));
    effects.push(Effect::publish(
        format!("update.complete.{}", update.status),
        &update,
        &ctx.policy.system_account,
    ));
    TransitionResult::new(update, effects)
}

fn bug_effects(
    ctx: &TransitionContext<'_>,
    update: &Update,
    bugs: &[Bug],
    repository: &str,
) -> Vec<Effect> {
    let title = update.title();
    let related = bugs.iter().filter(|b| update.bugs.contains(&b.bug_id));

    if update.status == UpdateStatus::Testing {
        let comment = ctx.policy.testing_bug_msg(&title, repository, &update.alias);
        return related
            .filter(|b| !(b.security && b.parent))
            .map(|b| Effect::BugSetStatus {
                bug_id: b.bug_id,
                status: "ON_QA".to_string(),
                comment: comment.clone(),
            })
            .collect();
    }

    let comment = ctx.policy.stable_bug_msg(&title, repository);
    related
        .filter_map(|b| {
            if !update.close_bugs {
                return Some(Effect::BugComment {
                    bug_id: b.bug_id,
                    text: comment.clone(),
                });
            }
            if update.update_type == UpdateType::Security && b.parent {
                return None;
            }
            Some(Effect::BugClose {
                bug_id: b.bug_id,
                fixed_in: update.nvrs(),
                comment: comment.clone(),
            })
        })
        .collect()
}
