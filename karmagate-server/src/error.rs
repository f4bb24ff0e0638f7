//! Errors returned by engine operations.
//!
//! Failures of external collaborators are not represented here: they are
//! retried by the interpreter and surface as caveats on an otherwise
//! successful outcome.

use thiserror::Error;

use crate::state_machine::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("update {0} is locked")]
    LockedUpdate(String),

    /// Carries the human-readable explanation shown to the caller.
    #[error("{0}")]
    PolicyViolation(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }
}

impl From<karmagate_core::Locked> for EngineError {
    fn from(locked: karmagate_core::Locked) -> Self {
        Self::LockedUpdate(locked.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karmagate_core::{Alias, Locked};

    #[test]
    fn test_policy_violation_renders_verbatim() {
        let err = EngineError::PolicyViolation("Can't do that".to_string());
        assert_eq!(err.to_string(), "Can't do that");
    }

    #[test]
    fn test_locked_conversion() {
        let err: EngineError = Locked(Alias::from("FEDORA-2024-abc")).into();
        assert!(matches!(err, EngineError::LockedUpdate(ref a) if a == "FEDORA-2024-abc"));
    }

    #[test]
    fn test_not_found_message() {
        let err = EngineError::not_found("release", "F99");
        assert_eq!(err.to_string(), "release F99 not found");
    }
}
