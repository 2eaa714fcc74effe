//! Utility modules for hashdeploy.

pub mod errors;
pub mod logger;

pub use errors::{DeployError, Result};
