//! Change detection: fingerprints, preserve rules, and planning.

pub mod fingerprint;
pub mod planner;
pub mod preserve;

pub use planner::{DeployPlan, LocalSnapshot, PlanOptions};
