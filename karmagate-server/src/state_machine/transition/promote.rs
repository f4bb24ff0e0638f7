//! Testing and stable requests.
//!
//! A stable request must clear two gates. Critical path updates need either
//! enough time and karma or enough admin approvals. Other updates need the
//! stable karma threshold, or else the mandatory days in testing.

use karmagate_core::{
    threshold, ReleaseState, ThresholdEvaluator, Update, UpdateRequest, UpdateStatus,
};
use tracing::{debug, info};

use super::{tag_all, TransitionContext, TransitionResult};
use crate::state_machine::effect::Effect;

pub fn handle(
    ctx: &TransitionContext<'_>,
    mut update: Update,
    requested: UpdateRequest,
    actor: &str,
) -> TransitionResult {
    let evaluator = ThresholdEvaluator::new(ctx.policy);
    let mut action = requested;
    let mut notes: Vec<String> = Vec::new();

    if action == UpdateRequest::Stable {
        if update.critpath {
            if let Some(required) = ctx.policy.num_admin_approvals_for(ctx.release) {
                if !evaluator.critpath_approved(&update, ctx.release, ctx.now) {
                    let note = critpath_note(ctx, &update, required);
                    if update.status == UpdateStatus::Testing {
                        update.request = None;
                        return TransitionResult::rejected(update, note);
                    }
                    info!("Forcing critical path update {} into testing", update.alias);
                    action = UpdateRequest::Testing;
                    notes.push(note);
                }
            }
        } else {
            let karma = evaluator.karma(&update).total();
            let karma_met =
                threshold(update.stable_karma).is_some_and(|stable| karma >= stable);
            if karma_met || evaluator.critpath_approved(&update, ctx.release, ctx.now) {
                debug!("{} meets stable karma requirements", update.alias);
            } else if evaluator.mandatory_days(&update, ctx.release) > 0
                && !evaluator.has_stable_comment(&update)
                && !evaluator.meets_testing_requirements(&update, ctx.release, ctx.now)
            {
                let note = ctx.policy.not_yet_tested_msg.clone();
                if update.status == UpdateStatus::Testing {
                    update.request = None;
                    return TransitionResult::rejected(update, note);
                }
                if update.request == Some(UpdateRequest::Testing) {
                    return TransitionResult::rejected(update, note);
                }
                action = UpdateRequest::Testing;
                notes.push(note);
            }
        }
    }

    let mut effects = Vec::new();
    match action {
        UpdateRequest::Testing => {
            effects.extend(tag_all(&ctx.release.tags.pending_signing, &update))
        }
        UpdateRequest::Stable => {
            effects.extend(tag_all(&ctx.release.tags.pending_stable, &update))
        }
        _ => {}
    }

    if matches!(update.status, UpdateStatus::Obsolete | UpdateStatus::Unpushed) {
        info!("Resubmitting {} from {}", update.alias, update.status);
        update.status = UpdateStatus::Pending;
        effects.extend(tag_all(&ctx.release.tags.candidate, &update));
    }

    update.request = Some(action);
    info!("{} has been submitted for {}", update.alias, action);

    let mut text = format!(
        "This update has been submitted for {} by {}. {}",
        action,
        actor,
        notes.join(" ")
    );
    if ctx.release.state == ReleaseState::Frozen && action == UpdateRequest::Stable {
        text.push_str(
            "\n\nThere is an ongoing freeze; this will be pushed to stable after the freeze is over.",
        );
    }
    update.add_comment(ctx.system_comment(text.trim_end()));

    effects.push(Effect::publish(
        format!("update.request.{}", action),
        &update,
        actor,
    ));
    TransitionResult::new(update, effects)
}

fn critpath_note(ctx: &TransitionContext<'_>, update: &Update, required: u32) -> String {
    let min_karma = ctx.policy.min_karma_for(ctx.release);
    let community = (min_karma - i32::try_from(required).unwrap_or(i32::MAX)).max(0);
    format!(
        "This critical path update has not yet been approved for pushing to the stable \
         repository.  It must first reach a karma of {}, consisting of {} positive karma \
         from proventesters, along with {} additional karma from the community. Or, it must \
         spend {} days in testing without any negative feedback",
        min_karma,
        required,
        community,
        ctx.policy.mandatory_days(update.critpath, ctx.release)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::transition::test_support::*;
    use crate::state_machine::transition::transition;
    use chrono::Duration;
    use karmagate_core::{Comment, PolicyConfig, Release};

    fn run(
        policy: &PolicyConfig,
        release: &Release,
        update: Update,
        action: UpdateRequest,
    ) -> TransitionResult {
        let ctx = TransitionContext {
            policy,
            release,
            now: now(),
        };
        transition(&ctx, update, set_request(action)).unwrap()
    }

    fn votes(n: u32) -> Vec<Comment> {
        (0..n)
            .map(|i| {
                Comment::text(format!("tester{}", i), "works", now()).with_karma(1)
            })
            .collect()
    }

    #[test]
    fn test_initial_testing_request_tags_pending_signing() {
        let policy = PolicyConfig::default();
        let release = release();
        let result = run(
            &policy,
            &release,
            update(UpdateStatus::Pending, None),
            UpdateRequest::Testing,
        );
        assert_eq!(result.update.request, Some(UpdateRequest::Testing));
        assert_eq!(result.update.status, UpdateStatus::Pending);
        assert_eq!(
            result.effects[0],
            Effect::tag("f40-signing-pending", "pkg-1.0-1.fc40")
        );
        assert_eq!(
            result.update.comments.last().unwrap().text,
            "This update has been submitted for testing by maintainer."
        );
        assert!(matches!(
            result.effects.last(),
            Some(Effect::Publish { topic, .. }) if topic == "update.request.testing"
        ));
    }

    #[test]
    fn test_stable_request_with_enough_karma() {
        let policy = PolicyConfig::default();
        let release = release();
        let mut before = update(UpdateStatus::Testing, None);
        before.comments = votes(3);
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert_eq!(result.update.request, Some(UpdateRequest::Stable));
        assert_eq!(
            result.effects[0],
            Effect::tag("f40-updates-pending", "pkg-1.0-1.fc40")
        );
    }

    #[test]
    fn test_untested_stable_request_in_testing_is_rejected() {
        let policy = PolicyConfig::default();
        let release = release();
        let mut before = update(UpdateStatus::Testing, Some(UpdateRequest::Testing));
        before.date_testing = Some(now() - Duration::days(2));
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert_eq!(
            result.rejection.as_deref(),
            Some(policy.not_yet_tested_msg.as_str())
        );
        assert_eq!(result.update.request, None);
        assert!(result.effects.is_empty());
    }

    #[test]
    fn test_untested_stable_request_with_testing_request_keeps_it() {
        let policy = PolicyConfig::default();
        let release = release();
        let before = update(UpdateStatus::Pending, Some(UpdateRequest::Testing));
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert!(result.is_rejected());
        assert_eq!(result.update.request, Some(UpdateRequest::Testing));
    }

    #[test]
    fn test_untested_stable_request_from_unpushed_is_downgraded() {
        let policy = PolicyConfig::default();
        let release = release();
        let before = update(UpdateStatus::Unpushed, None);
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert!(!result.is_rejected());
        assert_eq!(result.update.status, UpdateStatus::Pending);
        assert_eq!(result.update.request, Some(UpdateRequest::Testing));
        assert!(result
            .effects
            .contains(&Effect::tag("f40-updates-candidate", "pkg-1.0-1.fc40")));
        assert!(result.update.comments.last().unwrap().text.contains(
            "This update has not yet met the minimum testing requirements"
        ));
    }

    #[test]
    fn test_stable_request_after_mandatory_days() {
        let policy = PolicyConfig::default();
        let release = release();
        let mut before = update(UpdateStatus::Testing, None);
        before.date_testing = Some(now() - Duration::days(7));
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert_eq!(result.update.request, Some(UpdateRequest::Stable));
    }

    #[test]
    fn test_critpath_stable_request_in_testing_is_rejected_with_note() {
        let mut policy = PolicyConfig::default();
        policy.critpath_min_karma = 3;
        let release = release();
        let mut before = update(UpdateStatus::Testing, None);
        before.critpath = true;
        before.date_testing = Some(now() - Duration::days(3));
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        let note = result.rejection.clone().unwrap();
        assert!(note.starts_with(
            "This critical path update has not yet been approved for pushing to the stable repository."
        ));
        assert!(note.contains("reach a karma of 3, consisting of 2 positive karma from proventesters, along with 1 additional karma"));
        assert!(note.ends_with("spend 14 days in testing without any negative feedback"));
        assert_eq!(result.update.request, None);
    }

    #[test]
    fn test_critpath_stable_request_while_pending_is_downgraded() {
        let mut policy = PolicyConfig::default();
        policy.critpath_min_karma = 3;
        let release = release();
        let mut before = update(UpdateStatus::Pending, None);
        before.critpath = true;
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert!(!result.is_rejected());
        assert_eq!(result.update.request, Some(UpdateRequest::Testing));
    }

    #[test]
    fn test_critpath_approved_by_admins_goes_stable() {
        let mut policy = PolicyConfig::default();
        policy.critpath_min_karma = 2;
        let release = release();
        let mut before = update(UpdateStatus::Testing, None);
        before.critpath = true;
        before.stable_karma = Some(5);
        before.comments = votes(2)
            .into_iter()
            .map(|mut c| {
                c.author_groups = vec!["proventesters".to_string()];
                c
            })
            .collect();
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert_eq!(result.update.request, Some(UpdateRequest::Stable));
    }

    #[test]
    fn test_frozen_release_adds_freeze_note() {
        let policy = PolicyConfig::default();
        let mut release = release();
        release.state = ReleaseState::Frozen;
        let mut before = update(UpdateStatus::Testing, None);
        before.comments = votes(3);
        let result = run(&policy, &release, before, UpdateRequest::Stable);
        assert!(result
            .update
            .comments
            .last()
            .unwrap()
            .text
            .ends_with("pushed to stable after the freeze is over."));
    }

    #[test]
    fn test_resubmitting_obsolete_update() {
        let policy = PolicyConfig::default();
        let release = release();
        let result = run(
            &policy,
            &release,
            update(UpdateStatus::Obsolete, None),
            UpdateRequest::Testing,
        );
        assert_eq!(result.update.status, UpdateStatus::Pending);
        assert_eq!(result.update.request, Some(UpdateRequest::Testing));
    }
}
