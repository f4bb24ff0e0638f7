//! Entity model for updates and the reference data they point at.
//!
//! Entities reference each other by key (release name, update alias, bug id)
//! rather than by pointer. Whoever needs a related entity loads it explicitly
//! from a repository.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Timestamp = DateTime<Utc>;

/// Returned when a string does not name a variant of one of the model enums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Newtype for an update alias (e.g. `FEDORA-2024-1a2b3c4d5e`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alias(pub String);

impl Alias {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Alias {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Alias {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Position of an update in the distribution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Testing,
    Stable,
    Unpushed,
    Obsolete,
    Processing,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Testing => "testing",
            UpdateStatus::Stable => "stable",
            UpdateStatus::Unpushed => "unpushed",
            UpdateStatus::Obsolete => "obsolete",
            UpdateStatus::Processing => "processing",
        }
    }

    /// Resting statuses that only move again on an explicit request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateStatus::Stable | UpdateStatus::Obsolete | UpdateStatus::Unpushed
        )
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UpdateStatus::Pending),
            "testing" => Ok(UpdateStatus::Testing),
            "stable" => Ok(UpdateStatus::Stable),
            "unpushed" => Ok(UpdateStatus::Unpushed),
            "obsolete" => Ok(UpdateStatus::Obsolete),
            "processing" => Ok(UpdateStatus::Processing),
            other => Err(ParseEnumError {
                kind: "update status",
                value: other.to_string(),
            }),
        }
    }
}

/// A pending intent to move an update to another status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateRequest {
    Testing,
    Stable,
    Obsolete,
    Unpush,
    Revoke,
}

impl UpdateRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateRequest::Testing => "testing",
            UpdateRequest::Stable => "stable",
            UpdateRequest::Obsolete => "obsolete",
            UpdateRequest::Unpush => "unpush",
            UpdateRequest::Revoke => "revoke",
        }
    }

    /// The status this request leads to, if it leads to one.
    pub fn target_status(&self) -> Option<UpdateStatus> {
        match self {
            UpdateRequest::Testing => Some(UpdateStatus::Testing),
            UpdateRequest::Stable => Some(UpdateStatus::Stable),
            UpdateRequest::Obsolete => Some(UpdateStatus::Obsolete),
            UpdateRequest::Unpush => Some(UpdateStatus::Unpushed),
            UpdateRequest::Revoke => None,
        }
    }
}

impl fmt::Display for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateRequest {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "testing" => Ok(UpdateRequest::Testing),
            "stable" => Ok(UpdateRequest::Stable),
            "obsolete" => Ok(UpdateRequest::Obsolete),
            "unpush" => Ok(UpdateRequest::Unpush),
            "revoke" => Ok(UpdateRequest::Revoke),
            other => Err(ParseEnumError {
                kind: "update request",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Bugfix,
    Security,
    Enhancement,
    Newpackage,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Bugfix => "bugfix",
            UpdateType::Security => "security",
            UpdateType::Enhancement => "enhancement",
            UpdateType::Newpackage => "newpackage",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bugfix" => Ok(UpdateType::Bugfix),
            "security" => Ok(UpdateType::Security),
            "enhancement" => Ok(UpdateType::Enhancement),
            "newpackage" => Ok(UpdateType::Newpackage),
            other => Err(ParseEnumError {
                kind: "update type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSeverity {
    #[default]
    Unspecified,
    Urgent,
    High,
    Medium,
    Low,
}

impl UpdateSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSeverity::Unspecified => "unspecified",
            UpdateSeverity::Urgent => "urgent",
            UpdateSeverity::High => "high",
            UpdateSeverity::Medium => "medium",
            UpdateSeverity::Low => "low",
        }
    }
}

impl fmt::Display for UpdateSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateSeverity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(UpdateSeverity::Unspecified),
            "urgent" => Ok(UpdateSeverity::Urgent),
            "high" => Ok(UpdateSeverity::High),
            "medium" => Ok(UpdateSeverity::Medium),
            "low" => Ok(UpdateSeverity::Low),
            other => Err(ParseEnumError {
                kind: "update severity",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    Disabled,
    Pending,
    Frozen,
    Current,
    Archived,
}

impl ReleaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseState::Disabled => "disabled",
            ReleaseState::Pending => "pending",
            ReleaseState::Frozen => "frozen",
            ReleaseState::Current => "current",
            ReleaseState::Archived => "archived",
        }
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(ReleaseState::Disabled),
            "pending" => Ok(ReleaseState::Pending),
            "frozen" => Ok(ReleaseState::Frozen),
            "current" => Ok(ReleaseState::Current),
            "archived" => Ok(ReleaseState::Archived),
            other => Err(ParseEnumError {
                kind: "release state",
                value: other.to_string(),
            }),
        }
    }
}

/// Build-system tag names a release maps onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTags {
    pub candidate: String,
    pub testing: String,
    pub stable: String,
    pub pending_signing: String,
    pub pending_testing: String,
    pub pending_stable: String,
    pub override_tag: String,
}

impl ReleaseTags {
    /// Tags following the usual `<dist>-updates-*` naming scheme.
    pub fn for_dist(dist: &str) -> Self {
        Self {
            candidate: format!("{dist}-updates-candidate"),
            testing: format!("{dist}-updates-testing"),
            stable: format!("{dist}-updates"),
            pending_signing: format!("{dist}-signing-pending"),
            pending_testing: format!("{dist}-updates-testing-pending"),
            pending_stable: format!("{dist}-updates-pending"),
            override_tag: format!("{dist}-override"),
        }
    }

    /// Every tag an update's build can be carried in, candidate excluded.
    pub fn active(&self) -> Vec<&str> {
        vec![
            self.testing.as_str(),
            self.stable.as_str(),
            self.pending_signing.as_str(),
            self.pending_testing.as_str(),
            self.pending_stable.as_str(),
        ]
    }

    /// Pending tags added when `request` is set on an update.
    pub fn pending_for(&self, request: UpdateRequest) -> Vec<&str> {
        match request {
            UpdateRequest::Testing => {
                vec![self.pending_signing.as_str(), self.pending_testing.as_str()]
            }
            UpdateRequest::Stable => vec![self.pending_stable.as_str()],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Short name, e.g. `F40`. Primary key.
    pub name: String,
    pub long_name: String,
    pub version: String,
    /// Prefix of update aliases, e.g. `FEDORA`.
    pub id_prefix: String,
    pub tags: ReleaseTags,
    pub mandatory_days_in_testing: u32,
    pub state: ReleaseState,
    /// Per-release override of the critical path minimum karma.
    #[serde(default)]
    pub critpath_min_karma: Option<i32>,
    /// Per-release override of the critical path admin approvals.
    #[serde(default)]
    pub critpath_num_admin_approvals: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub nvr: String,
    pub package: String,
    /// Name of the release the build was built for.
    pub release: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugFeedback {
    pub bug_id: u64,
    pub karma: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseFeedback {
    pub testcase: String,
    pub karma: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    /// Groups the author belonged to when commenting.
    #[serde(default)]
    pub author_groups: Vec<String>,
    #[serde(default)]
    pub anonymous: bool,
    pub karma: i32,
    #[serde(default)]
    pub karma_critpath: i32,
    pub text: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub bug_feedback: Vec<BugFeedback>,
    #[serde(default)]
    pub testcase_feedback: Vec<TestCaseFeedback>,
}

impl Comment {
    /// A plain comment without karma or feedback.
    pub fn text(author: impl Into<String>, text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            author: author.into(),
            author_groups: Vec::new(),
            anonymous: false,
            karma: 0,
            karma_critpath: 0,
            text: text.into(),
            timestamp,
            bug_feedback: Vec::new(),
            testcase_feedback: Vec::new(),
        }
    }

    pub fn with_karma(mut self, karma: i32) -> Self {
        self.karma = karma;
        self
    }
}

/// Bug tracker facts cached for an update's bugs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub bug_id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub security: bool,
    /// Parent tracker bug of a security issue rather than a per-release bug.
    #[serde(default)]
    pub parent: bool,
}

impl Bug {
    pub fn new(bug_id: u64) -> Self {
        Self {
            bug_id,
            title: None,
            security: false,
            parent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildrootOverride {
    pub nvr: String,
    pub submitter: String,
    pub notes: String,
    pub expiration_date: Timestamp,
    #[serde(default)]
    pub expired_date: Option<Timestamp>,
}

impl BuildrootOverride {
    pub fn is_expired(&self) -> bool {
        self.expired_date.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub alias: Alias,
    /// Name of the release every build belongs to.
    pub release: String,
    pub builds: Vec<Build>,
    pub submitter: String,
    #[serde(default)]
    pub bugs: Vec<u64>,
    #[serde(default)]
    pub cves: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub update_type: UpdateType,
    #[serde(default)]
    pub severity: UpdateSeverity,
    pub status: UpdateStatus,
    pub request: Option<UpdateRequest>,
    pub autokarma: bool,
    pub autotime: bool,
    pub stable_karma: Option<i32>,
    pub unstable_karma: Option<i32>,
    pub stable_days: Option<u32>,
    #[serde(default)]
    pub critpath: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub pushed: bool,
    #[serde(default)]
    pub close_bugs: bool,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub date_submitted: Timestamp,
    #[serde(default)]
    pub date_modified: Option<Timestamp>,
    #[serde(default)]
    pub date_testing: Option<Timestamp>,
    #[serde(default)]
    pub date_stable: Option<Timestamp>,
    #[serde(default)]
    pub date_locked: Option<Timestamp>,
    #[serde(default)]
    pub date_pushed: Option<Timestamp>,
}

impl Update {
    /// The update title is always derived from its builds.
    pub fn title(&self) -> String {
        self.builds
            .iter()
            .map(|b| b.nvr.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn packages(&self) -> BTreeSet<&str> {
        self.builds.iter().map(|b| b.package.as_str()).collect()
    }

    pub fn nvrs(&self) -> Vec<String> {
        self.builds.iter().map(|b| b.nvr.clone()).collect()
    }

    pub fn is_security(&self) -> bool {
        self.update_type == UpdateType::Security
    }

    pub fn add_comment(&mut self, comment: Comment) {
        self.date_modified = Some(comment.timestamp);
        self.comments.push(comment);
    }
}
