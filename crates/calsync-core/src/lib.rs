//! Configuration loading and validation for CalSync.

pub mod config;
pub mod error;

pub use config::{Account, SyncConfig, SyncFlow};
pub use error::ConfigError;
