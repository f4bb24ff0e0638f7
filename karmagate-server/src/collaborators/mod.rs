//! Contracts for the external systems the engine drives: the build tagger,
//! the bug tracker and the notification bus.
//!
//! Every call is fallible and may be slow. The interpreter bounds each call
//! with a timeout and a small number of retries.

pub mod bugs;
pub mod notifier;
pub mod tagger;

use thiserror::Error;

pub use bugs::{BugDetails, BugTracker, BugzillaClient, NoopBugTracker};
pub use notifier::{InMemoryNotifier, Notifier, PublishedEvent, TracingNotifier};
pub use tagger::{BuildInfo, BuildTagger, InMemoryTagger};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("{service} rejected the call: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("call timed out after {0} ms")]
    Timeout(u64),
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    pub fn rejected(service: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            message: message.into(),
        }
    }
}
