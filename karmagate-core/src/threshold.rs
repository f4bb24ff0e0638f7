//! Karma and time thresholds deciding when an update moves on its own.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::karma::{Karma, KarmaLedger};
use crate::model::{Alias, Release, Timestamp, Update, UpdateStatus};
use crate::policy::{PolicyConfig, STABLE_ELIGIBLE_PHRASE};

/// What the karma thresholds call for after a karma-affecting mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    NoAction,
    /// Negative karma arrived while autokarma was on.
    DisableAutopush,
    PromoteToStable,
    /// Stable karma reached without autokarma; the maintainer may push.
    StableEligible,
    Obsolete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("update {0} is locked")]
pub struct Locked(pub Alias);

/// A karma threshold of zero is the same as no threshold.
pub fn threshold(value: Option<i32>) -> Option<i32> {
    value.filter(|v| *v != 0)
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvaluator<'a> {
    policy: &'a PolicyConfig,
    ledger: KarmaLedger<'a>,
}

impl<'a> ThresholdEvaluator<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self {
            policy,
            ledger: KarmaLedger::new(policy),
        }
    }

    pub fn ledger(&self) -> &KarmaLedger<'a> {
        &self.ledger
    }

    pub fn karma(&self, update: &Update) -> Karma {
        self.ledger.compute(update)
    }

    /// Apply the karma rules in order. Only updates in testing move.
    pub fn evaluate(&self, update: &Update) -> Result<Decision, Locked> {
        if update.locked {
            return Err(Locked(update.alias.clone()));
        }
        if update.status != UpdateStatus::Testing {
            return Ok(Decision::NoAction);
        }

        let karma = self.karma(update);
        let total = karma.total();

        if update.autokarma && karma.negative != 0 {
            return Ok(Decision::DisableAutopush);
        }
        if let Some(stable) = threshold(update.stable_karma) {
            if total >= stable {
                return Ok(if update.autokarma {
                    Decision::PromoteToStable
                } else {
                    Decision::StableEligible
                });
            }
        }
        if let Some(unstable) = threshold(update.unstable_karma) {
            if total <= unstable {
                return Ok(Decision::Obsolete);
            }
        }
        Ok(Decision::NoAction)
    }

    /// Whole days since the update reached testing.
    pub fn days_in_testing(&self, update: &Update, now: Timestamp) -> u32 {
        update
            .date_testing
            .map(|entered| (now - entered).num_days().max(0))
            .and_then(|days| u32::try_from(days).ok())
            .unwrap_or(0)
    }

    pub fn mandatory_days(&self, update: &Update, release: &Release) -> u32 {
        self.policy.mandatory_days(update.critpath, release)
    }

    pub fn meets_testing_requirements(
        &self,
        update: &Update,
        release: &Release,
        now: Timestamp,
    ) -> bool {
        let karma = self.karma(update);
        let num_days = self.mandatory_days(update, release);

        if karma.total() >= self.policy.min_karma_for(release) {
            return true;
        }
        if update.critpath {
            // Any standing negative vote blocks time-based promotion.
            if karma.negative < 0 {
                return false;
            }
            return self.days_in_testing(update, now) >= num_days;
        }
        if num_days == 0 {
            return true;
        }
        if threshold(update.stable_karma).is_some_and(|stable| karma.total() >= stable) {
            return true;
        }
        self.days_in_testing(update, now) >= num_days
    }

    /// Days left before time alone qualifies the update; zero once met.
    pub fn days_to_stable(&self, update: &Update, release: &Release, now: Timestamp) -> u32 {
        if update.date_testing.is_none() || self.meets_testing_requirements(update, release, now)
        {
            return 0;
        }
        self.mandatory_days(update, release)
            .saturating_sub(self.days_in_testing(update, now))
    }

    /// +1 votes since the last reset from members of an admin group.
    pub fn num_admin_approvals(&self, update: &Update) -> u32 {
        let count = self
            .ledger
            .comments_since_reset(update)
            .iter()
            .filter(|c| !c.anonymous && c.karma == 1 && self.policy.is_admin(&c.author_groups))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn critpath_approved(&self, update: &Update, release: &Release, now: Timestamp) -> bool {
        if self.meets_testing_requirements(update, release, now) {
            return true;
        }
        match self.policy.num_admin_approvals_for(release) {
            Some(required) => {
                self.num_admin_approvals(update) >= required
                    && self.karma(update).total() >= self.policy.min_karma_for(release)
            }
            None => false,
        }
    }

    /// Whether the stable eligibility comment was already posted since the
    /// last reset.
    pub fn has_stable_comment(&self, update: &Update) -> bool {
        self.ledger.comments_since_reset(update).iter().any(|c| {
            c.author == self.policy.system_account
                && c.text.starts_with("This update ")
                && c.text.contains(STABLE_ELIGIBLE_PHRASE)
        })
    }
}
