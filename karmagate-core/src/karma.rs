//! Composite karma computed from an update's comment history.
//!
//! Only comments after the most recent karma reset count. A reset is a
//! comment by the system account announcing that builds were added to or
//! removed from the update. Within that window each author's most recent
//! non-zero vote is the one that counts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{Comment, Update};
use crate::policy::PolicyConfig;

const RESET_MARKERS: [&str; 2] = ["New build", "Removed build"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Karma {
    /// Sum of positive votes.
    pub positive: i32,
    /// Sum of negative votes (zero or less).
    pub negative: i32,
}

impl Karma {
    pub fn total(&self) -> i32 {
        self.positive + self.negative
    }
}

/// Counts of good and bad feedback on a single bug or test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackKarma {
    /// Number of authors reporting a problem, as a non-positive number.
    pub negative: i32,
    pub positive: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct KarmaLedger<'a> {
    policy: &'a PolicyConfig,
}

impl<'a> KarmaLedger<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self { policy }
    }

    pub fn is_reset(&self, comment: &Comment) -> bool {
        comment.author == self.policy.system_account
            && RESET_MARKERS.iter().any(|m| comment.text.contains(m))
    }

    /// Comments after the most recent reset, oldest first. The reset comment
    /// itself is excluded.
    pub fn comments_since_reset<'u>(&self, update: &'u Update) -> &'u [Comment] {
        match update.comments.iter().rposition(|c| self.is_reset(c)) {
            Some(reset) => &update.comments[reset + 1..],
            None => &update.comments,
        }
    }

    pub fn compute(&self, update: &Update) -> Karma {
        let mut karma = Karma::default();
        let mut counted = HashSet::new();

        for comment in self.comments_since_reset(update).iter().rev() {
            if comment.anonymous || comment.karma == 0 {
                continue;
            }
            if !counted.insert(comment.author.as_str()) {
                continue;
            }
            if comment.karma > 0 {
                karma.positive += comment.karma;
            } else {
                karma.negative += comment.karma;
            }
        }

        karma
    }

    /// The vote `author` currently has standing on the update, if any.
    pub fn vote_of(&self, update: &Update, author: &str) -> Option<i32> {
        self.comments_since_reset(update)
            .iter()
            .rev()
            .find(|c| !c.anonymous && c.karma != 0 && c.author == author)
            .map(|c| c.karma)
    }

    pub fn bug_karma(&self, update: &Update, bug_id: u64) -> FeedbackKarma {
        self.feedback_karma(update, |comment| {
            comment
                .bug_feedback
                .iter()
                .filter(|f| f.bug_id == bug_id)
                .map(|f| f.karma)
                .collect()
        })
    }

    pub fn testcase_karma(&self, update: &Update, testcase: &str) -> FeedbackKarma {
        self.feedback_karma(update, |comment| {
            // Duplicate entries within one comment count once.
            comment
                .testcase_feedback
                .iter()
                .find(|f| f.testcase == testcase)
                .map(|f| vec![f.karma])
                .unwrap_or_default()
        })
    }

    fn feedback_karma<F>(&self, update: &Update, karma_of: F) -> FeedbackKarma
    where
        F: Fn(&Comment) -> Vec<i32>,
    {
        let mut result = FeedbackKarma::default();
        let mut seen = HashSet::new();

        for comment in self.comments_since_reset(update).iter().rev() {
            if comment.anonymous || !seen.insert(comment.author.as_str()) {
                continue;
            }
            for karma in karma_of(comment) {
                if karma > 0 {
                    result.positive += 1;
                } else if karma < 0 {
                    result.negative -= 1;
                }
            }
        }

        result
    }
}
