//! Comments and the karma they carry.
//!
//! Adding a comment is the main way an update moves on its own: after the
//! comment is recorded the threshold evaluator decides whether the new
//! karma promotes, obsoletes or stops automatic pushing of the update.

use karmagate_core::{
    threshold, Alias, BugFeedback, Comment, Decision, KarmaLedger, Locked, TestCaseFeedback,
    ThresholdEvaluator, Update, UpdateRequest, UpdateStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::engine::{Engine, Outcome};
use crate::error::EngineError;
use crate::state_machine::{
    update_summary, Caveat, Effect, PendingEffects, RequestEvent, TransitionContext,
};

/// A comment as submitted by a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub author: String,
    #[serde(default)]
    pub author_groups: Vec<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub karma: i32,
    #[serde(default)]
    pub karma_critpath: i32,
    #[serde(default)]
    pub bug_feedback: Vec<BugFeedback>,
    #[serde(default)]
    pub testcase_feedback: Vec<TestCaseFeedback>,
}

impl NewComment {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_karma(mut self, karma: i32) -> Self {
        self.karma = karma;
        self
    }

    fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
            && self.karma == 0
            && self.karma_critpath == 0
            && self.bug_feedback.iter().all(|f| f.karma == 0)
            && self.testcase_feedback.iter().all(|f| f.karma == 0)
    }
}

impl Engine {
    /// Record a comment and act on the karma it carries.
    pub async fn add_comment(
        &self,
        alias: &Alias,
        new: NewComment,
    ) -> Result<Outcome, EngineError> {
        if new.is_empty() {
            return Err(EngineError::Validation(
                "You must provide either some text or feedback".to_string(),
            ));
        }

        let now = self.now();
        let guard = self.store.lock(alias).await;
        let mut update = self.store.load(alias).await?;
        let release = self.store.release(&update.release).await?;
        let ctx = self.context(&release, now);
        let ledger = KarmaLedger::new(&self.policy);

        let mut caveats = Vec::new();
        let mut effects = Vec::new();

        let mut karma = new.karma;
        if karma != 0 && new.author == update.submitter {
            karma = 0;
            caveats.push(Caveat::new(
                "karma",
                "You may not give karma to your own updates.",
            ));
        }
        if karma != 0 && !new.anonymous {
            if let Some(previous) = ledger.vote_of(&update, &new.author) {
                if previous != karma {
                    caveats.push(Caveat::new("karma", "Your karma standing was reversed."));
                }
            }
        }

        let system_author = self.policy.is_system_user(&new.author);
        let comment = Comment {
            author: new.author,
            author_groups: new.author_groups,
            anonymous: new.anonymous,
            karma,
            karma_critpath: new.karma_critpath,
            text: new.text,
            timestamp: now,
            bug_feedback: new.bug_feedback,
            testcase_feedback: new.testcase_feedback,
        };
        let published = json!({
            "author": comment.author,
            "karma": comment.karma,
            "text": comment.text,
            "timestamp": comment.timestamp,
        });
        let agent = comment.author.clone();
        update.add_comment(comment);

        if karma != 0 {
            info!(
                "Karma for {} is now {}",
                update.alias,
                ledger.compute(&update).total()
            );
        }

        if !system_author {
            update = self.check_karma_thresholds(&ctx, update, &mut effects, &mut caveats)?;
        }
        update = self.obsolete_if_unstable(&ctx, update, &mut effects, &mut caveats)?;

        if !system_author {
            effects.push(Effect::Publish {
                topic: "update.comment".to_string(),
                payload: json!({
                    "comment": published,
                    "update": update_summary(&update),
                    "agent": agent,
                }),
            });
        }

        self.store.commit(std::slice::from_ref(&update)).await?;
        drop(guard);

        caveats.extend(
            self.run_effects(vec![PendingEffects {
                alias: alias.clone(),
                effects,
            }])
            .await,
        );
        Ok(Outcome { update, caveats })
    }

    fn check_karma_thresholds(
        &self,
        ctx: &TransitionContext<'_>,
        mut update: Update,
        effects: &mut Vec<Effect>,
        caveats: &mut Vec<Caveat>,
    ) -> Result<Update, EngineError> {
        let evaluator = ThresholdEvaluator::new(&self.policy);
        let decision = match evaluator.evaluate(&update) {
            Ok(decision) => decision,
            Err(Locked(alias)) => {
                info!("{} is locked; skipping karma thresholds", alias);
                return Ok(update);
            }
        };
        debug!("Threshold decision for {}: {:?}", update.alias, decision);

        let system = self.policy.system_account.clone();
        match decision {
            Decision::NoAction => {}
            Decision::PromoteToStable => {
                info!("Automatically marking {} as stable", update.alias);
                let (promoted, accepted) = self.apply(
                    ctx,
                    update,
                    RequestEvent::SetRequest {
                        action: UpdateRequest::Stable,
                        actor: system,
                    },
                    effects,
                    caveats,
                )?;
                if accepted {
                    effects.push(Engine::threshold_reached(&promoted, "stable"));
                }
                update = promoted;
            }
            Decision::Obsolete => {
                info!("{} reached its unstable karma threshold", update.alias);
                let (obsoleted, accepted) = self.apply(
                    ctx,
                    update,
                    RequestEvent::SetRequest {
                        action: UpdateRequest::Obsolete,
                        actor: system,
                    },
                    effects,
                    caveats,
                )?;
                if accepted {
                    effects.push(Engine::threshold_reached(&obsoleted, "unstable"));
                }
                update = obsoleted;
            }
            Decision::DisableAutopush => {
                info!(
                    "Disabling automatic push of {} due to negative karma",
                    update.alias
                );
                update.autokarma = false;
                update.autotime = false;
                update.add_comment(ctx.system_comment(self.policy.disable_autopush_msg.clone()));
            }
            Decision::StableEligible => {
                info!(
                    "{} reached stable karma; the maintainer may push it",
                    update.alias
                );
            }
        }
        Ok(update)
    }

    /// A pending update that has not reached testing yet is obsoleted as
    /// soon as its karma drops to the unstable threshold.
    fn obsolete_if_unstable(
        &self,
        ctx: &TransitionContext<'_>,
        update: Update,
        effects: &mut Vec<Effect>,
        caveats: &mut Vec<Caveat>,
    ) -> Result<Update, EngineError> {
        let karma = KarmaLedger::new(&self.policy).compute(&update).total();
        let unstable = update.autokarma
            && !update.locked
            && update.status == UpdateStatus::Pending
            && update.request == Some(UpdateRequest::Testing)
            && threshold(update.unstable_karma).is_some_and(|limit| karma <= limit);
        if !unstable {
            return Ok(update);
        }

        info!("Obsoleting pending update {} with karma {}", update.alias, karma);
        let (update, _) = self.apply(
            ctx,
            update,
            RequestEvent::SetRequest {
                action: UpdateRequest::Obsolete,
                actor: self.policy.system_account.clone(),
            },
            effects,
            caveats,
        )?;
        Ok(update)
    }
}
