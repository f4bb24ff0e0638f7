//! Effects (side effects as data).
//!
//! Transitions describe the external calls that must follow a committed
//! state change. The interpreter executes them after the update's lock has
//! been released, so a slow collaborator never holds up the update.

use karmagate_core::{Alias, Update};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    // =========================================================================
    // Build tagging
    // =========================================================================
    TagBuild { tag: String, nvr: String },

    UntagBuild { tag: String, nvr: String },

    /// Remove the build from whichever of `tags` it currently carries.
    UntagKnown { nvr: String, tags: Vec<String> },

    // =========================================================================
    // Bug tracker
    // =========================================================================
    BugComment { bug_id: u64, text: String },

    BugSetStatus {
        bug_id: u64,
        status: String,
        comment: String,
    },

    BugClose {
        bug_id: u64,
        fixed_in: Vec<String>,
        comment: String,
    },

    /// Fetch title and security flag and cache them for the update.
    RefreshBug { bug_id: u64 },

    // =========================================================================
    // Notifications
    // =========================================================================
    Publish {
        topic: String,
        payload: serde_json::Value,
    },
}

impl Effect {
    pub fn tag(tag: &str, nvr: &str) -> Self {
        Effect::TagBuild {
            tag: tag.to_string(),
            nvr: nvr.to_string(),
        }
    }

    pub fn untag(tag: &str, nvr: &str) -> Self {
        Effect::UntagBuild {
            tag: tag.to_string(),
            nvr: nvr.to_string(),
        }
    }

    /// Publish `topic` with the update summary and the acting user.
    pub fn publish(topic: impl Into<String>, update: &Update, agent: &str) -> Self {
        Effect::Publish {
            topic: topic.into(),
            payload: json!({
                "update": update_summary(update),
                "agent": agent,
            }),
        }
    }

    /// Short description used in logs and caveats.
    pub fn describe(&self) -> String {
        match self {
            Effect::TagBuild { tag, nvr } => format!("tag {} into {}", nvr, tag),
            Effect::UntagBuild { tag, nvr } => format!("untag {} from {}", nvr, tag),
            Effect::UntagKnown { nvr, .. } => format!("untag {}", nvr),
            Effect::BugComment { bug_id, .. } => format!("comment on bug #{}", bug_id),
            Effect::BugSetStatus { bug_id, status, .. } => {
                format!("set bug #{} to {}", bug_id, status)
            }
            Effect::BugClose { bug_id, .. } => format!("close bug #{}", bug_id),
            Effect::RefreshBug { bug_id } => format!("fetch bug #{}", bug_id),
            Effect::Publish { topic, .. } => format!("publish {}", topic),
        }
    }
}

/// Fields of an update included in notification payloads.
pub fn update_summary(update: &Update) -> serde_json::Value {
    json!({
        "alias": update.alias,
        "title": update.title(),
        "release": update.release,
        "status": update.status,
        "request": update.request,
        "submitter": update.submitter,
        "type": update.update_type,
        "critpath": update.critpath,
    })
}

/// Non-fatal note returned alongside a successful outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    pub name: String,
    pub description: String,
}

impl Caveat {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Effects of one update, kept with the alias they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEffects {
    pub alias: Alias,
    pub effects: Vec<Effect>,
}
