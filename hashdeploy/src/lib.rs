//! hashdeploy library
//!
//! Incremental deployment of a local directory tree to a remote server,
//! driven by a content-hash manifest stored next to the deployed files.

pub mod config;
pub mod executor;
pub mod fs;
pub mod sync;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod transfer;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{DeployOptions, DeployStats, Deployer};
pub use utils::errors::DeployError;
pub type Result<T> = std::result::Result<T, DeployError>;
