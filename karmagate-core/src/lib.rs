//! Pure policy core for the update lifecycle: the entity model, NVR
//! ordering, the karma ledger and the threshold evaluator. Nothing in this
//! crate performs I/O.

pub mod karma;
pub mod model;
pub mod nvr;
pub mod policy;
pub mod threshold;

pub use karma::{FeedbackKarma, Karma, KarmaLedger};
pub use model::*;
pub use nvr::{rpmvercmp, Nvr, NvrError};
pub use policy::{PolicyConfig, STABLE_ELIGIBLE_PHRASE};
pub use threshold::{threshold, Decision, Locked, ThresholdEvaluator};
