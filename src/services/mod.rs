//! Service layer for permitsync run logic.
//!
//! Kept separate from the CLI so the same run can be driven by tests or
//! other front ends.

pub mod pipeline;

pub use pipeline::{Credentials, HarvestConfig, LoginPlan, Pipeline, RunOutcome};
