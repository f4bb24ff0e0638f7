//! Explicit state machine for the update request lifecycle.
//!
//! The design separates:
//! - **State**: the update aggregate (`karmagate_core::Update`)
//! - **Events**: what happened (`RequestEvent`)
//! - **Effects**: what to do outside (`Effect`)
//! - **Transition**: pure function `(Update, RequestEvent) -> (Update, Vec<Effect>)`
//!
//! The store serializes work per update and commits the result; the
//! interpreter then executes effects against the collaborators.

pub mod effect;
pub mod interpreter;
pub mod repository;
pub mod store;
pub mod transition;

pub use effect::*;
pub use interpreter::{execute_effects, InterpreterContext, RetryPolicy};
pub use repository::{InMemoryRepository, RepositoryError, SqliteRepository, UpdateRepository};
pub use store::UpdateStore;
pub use transition::*;
