//! Update lifecycle engine: the request state machine, comment processing,
//! obsoletion, editing and the approve-testing sweep, persisted through an
//! `UpdateRepository` and talking to the outside world through effects.

pub mod approve_testing;
pub mod collaborators;
pub mod comments;
pub mod config;
pub mod editing;
pub mod engine;
pub mod error;
mod obsoletion;
pub mod state_machine;

pub use approve_testing::{approve_testing_loop, SweepReport};
pub use comments::NewComment;
pub use editing::{NewUpdate, UpdateEdit};
pub use engine::{Clock, Engine, Outcome};
pub use error::EngineError;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_version() -> String {
    // Nix builds pass the hash in; cargo builds fall back to git detection.
    let hash = option_env!("KARMAGATE_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(hash) if hash.len() >= 8 => hash[..8].to_string(),
        Some(hash) => hash.to_string(),
        None => built_info::PKG_VERSION.to_string(),
    }
}
