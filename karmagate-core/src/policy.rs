//! Immutable promotion policy.
//!
//! Built once at startup and shared by reference with the karma ledger,
//! the threshold evaluator and the request state machine.

use std::collections::BTreeSet;

use crate::model::{Alias, Release};

/// Text posted once an update becomes eligible for stable. The same phrase
/// is used to detect that the comment was already posted.
pub const STABLE_ELIGIBLE_PHRASE: &str = "can be pushed to stable now if the maintainer wishes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Account the engine authors its own comments as.
    pub system_account: String,
    /// Accounts whose comments never trigger threshold checks.
    pub system_users: BTreeSet<String>,
    /// Groups whose +1 counts as an admin approval for critical path updates.
    pub admin_groups: BTreeSet<String>,
    pub critpath_packages: BTreeSet<String>,
    pub critpath_min_karma: i32,
    /// `None` disables the admin approval gate.
    pub critpath_num_admin_approvals: Option<u32>,
    pub critpath_stable_after_days_without_negative_karma: u32,
    /// Base URL update links are built from.
    pub base_url: String,
    pub disable_autopush_msg: String,
    pub not_yet_tested_msg: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::with_system_account("karmagate")
    }
}

impl PolicyConfig {
    pub fn with_system_account(account: &str) -> Self {
        Self {
            system_account: account.to_string(),
            system_users: [account, "autoqa", "taskotron"]
                .into_iter()
                .map(String::from)
                .collect(),
            admin_groups: [
                "proventesters",
                "security_respons",
                "bodhiadmin",
                "sysadmin-main",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            critpath_packages: BTreeSet::new(),
            critpath_min_karma: 2,
            critpath_num_admin_approvals: Some(2),
            critpath_stable_after_days_without_negative_karma: 14,
            base_url: "http://localhost:6543".to_string(),
            disable_autopush_msg: format!(
                "{account} is disabling automatic push to stable due to negative karma. \
                 The maintainer may push manually if they determine that the issue is not severe."
            ),
            not_yet_tested_msg: "This update has not yet met the minimum testing requirements \
                                 defined in the Package Update Acceptance Criteria"
                .to_string(),
        }
    }

    pub fn is_system_user(&self, user: &str) -> bool {
        self.system_users.contains(user)
    }

    pub fn is_admin<S: AsRef<str>>(&self, groups: &[S]) -> bool {
        groups
            .iter()
            .any(|g| self.admin_groups.contains(g.as_ref()))
    }

    pub fn is_critpath<'a>(&self, mut packages: impl Iterator<Item = &'a str>) -> bool {
        packages.any(|p| self.critpath_packages.contains(p))
    }

    pub fn min_karma_for(&self, release: &Release) -> i32 {
        release
            .critpath_min_karma
            .unwrap_or(self.critpath_min_karma)
    }

    pub fn num_admin_approvals_for(&self, release: &Release) -> Option<u32> {
        release
            .critpath_num_admin_approvals
            .or(self.critpath_num_admin_approvals)
    }

    /// Days an update must spend in testing before time alone qualifies it.
    pub fn mandatory_days(&self, critpath: bool, release: &Release) -> u32 {
        if critpath {
            self.critpath_stable_after_days_without_negative_karma
        } else {
            release.mandatory_days_in_testing
        }
    }

    pub fn update_url(&self, alias: &Alias) -> String {
        format!("{}/updates/{}", self.base_url.trim_end_matches('/'), alias)
    }

    pub fn testing_approval_msg(&self, days: u32) -> String {
        format!("This update has reached {days} days in testing and {STABLE_ELIGIBLE_PHRASE}")
    }

    pub fn stable_bug_msg(&self, title: &str, repository: &str) -> String {
        format!(
            "{title} has been pushed to the {repository} repository. \
             If problems still persist, please make note of it in this bug report."
        )
    }

    pub fn testing_bug_msg(&self, title: &str, repository: &str, alias: &Alias) -> String {
        format!(
            "{title} has been pushed to the {repository} repository.\n\
             See https://fedoraproject.org/wiki/QA:Updates_Testing for\n\
             instructions on how to install test updates.\n\
             You can provide feedback for this update here: {}",
            self.update_url(alias)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReleaseState, ReleaseTags};

    fn release() -> Release {
        Release {
            name: "F40".to_string(),
            long_name: "Fedora 40".to_string(),
            version: "40".to_string(),
            id_prefix: "FEDORA".to_string(),
            tags: ReleaseTags::for_dist("f40"),
            mandatory_days_in_testing: 7,
            state: ReleaseState::Current,
            critpath_min_karma: None,
            critpath_num_admin_approvals: None,
        }
    }

    #[test]
    fn test_defaults() {
        let policy = PolicyConfig::default();
        assert!(policy.is_system_user("karmagate"));
        assert!(policy.is_system_user("autoqa"));
        assert!(!policy.is_system_user("alice"));
        assert_eq!(policy.critpath_num_admin_approvals, Some(2));
        assert!(policy.disable_autopush_msg.starts_with("karmagate is disabling"));
    }

    #[test]
    fn test_release_overrides_take_precedence() {
        let policy = PolicyConfig::default();
        let mut release = release();
        assert_eq!(policy.min_karma_for(&release), 2);
        release.critpath_min_karma = Some(3);
        release.critpath_num_admin_approvals = Some(0);
        assert_eq!(policy.min_karma_for(&release), 3);
        assert_eq!(policy.num_admin_approvals_for(&release), Some(0));
    }

    #[test]
    fn test_mandatory_days_depends_on_critpath() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.mandatory_days(false, &release()), 7);
        assert_eq!(policy.mandatory_days(true, &release()), 14);
    }

    #[test]
    fn test_admin_membership() {
        let policy = PolicyConfig::default();
        assert!(policy.is_admin(&["packager", "proventesters"]));
        assert!(!policy.is_admin(&["packager"]));
        let none: [&str; 0] = [];
        assert!(!policy.is_admin(&none));
    }

    #[test]
    fn test_testing_approval_msg_contains_phrase() {
        let policy = PolicyConfig::default();
        let msg = policy.testing_approval_msg(7);
        assert!(msg.starts_with("This update has reached 7 days in testing"));
        assert!(msg.contains(STABLE_ELIGIBLE_PHRASE));
    }

    #[test]
    fn test_update_url_strips_trailing_slash() {
        let mut policy = PolicyConfig::default();
        policy.base_url = "https://updates.example.org/".to_string();
        assert_eq!(
            policy.update_url(&Alias::from("FEDORA-2024-abc")),
            "https://updates.example.org/updates/FEDORA-2024-abc"
        );
    }
}
