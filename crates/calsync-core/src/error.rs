//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// Any of these is fatal at startup; nothing downstream runs with a
/// partially valid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing or empty required key: {0}")]
    MissingKey(String),

    #[error("Invalid numeric value for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Sync flow {flow:?} references undeclared {role} account id {account_id}")]
    UnknownAccount {
        flow: String,
        role: &'static str,
        account_id: u32,
    },

    #[error("No accounts configured. Set ACCOUNT_1_NAME and related keys.")]
    NoAccounts,

    #[error("No sync flows configured. Set SYNC_FLOW_1_NAME and related keys.")]
    NoFlows,
}
