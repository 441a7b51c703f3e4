//! Typed configuration records and the numbered-group loader.
//!
//! Accounts and sync flows are declared as numbered key groups
//! (`ACCOUNT_<N>_*`, `SYNC_FLOW_<N>_*`) starting at N=1. The loader scans
//! contiguously and stops at the first index whose `_NAME` key is absent;
//! a missing required key for an in-range index is an error naming that
//! key, not a silent skip.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

/// Upper bound on the numbered-group scan. Indexes past the first gap are
/// never read regardless.
pub const MAX_INDEX: u32 = 32;

const DEFAULT_DAILY_SYNC_HOUR: u32 = 6;
const DEFAULT_POLL_DAYS_BACK: i64 = 2;
const DEFAULT_POLL_DAYS_FORWARD: i64 = 14;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// A configured calendar account with its OAuth2 refresh credential.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: u32,
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// One directional sync rule: source (account, calendar) to target
/// (account, calendar) with signed minute offsets for the busy range.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFlow {
    pub name: String,
    pub source_account_id: u32,
    pub source_calendar_id: String,
    pub target_account_id: u32,
    pub target_calendar_id: String,
    /// Minutes added to the event start (zero or negative).
    pub start_offset: i64,
    /// Minutes added to the event end (zero or positive).
    pub end_offset: i64,
}

/// Immutable configuration snapshot produced at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub accounts: Vec<Account>,
    pub sync_flows: Vec<SyncFlow>,
    /// Hour of day (UTC) for the daily polling sweep.
    pub daily_sync_hour: u32,
    /// Default polling window.
    pub poll_days_back: i64,
    pub poll_days_forward: i64,
    /// Calendar API base URL override (tests and diagnostics).
    pub api_base_url: Option<String>,
    /// OAuth2 token endpoint override (tests and diagnostics).
    pub token_url: Option<String>,
    /// Public URL push notifications are delivered to.
    pub callback_url: Option<String>,
    /// HTTP bind address for the webhook/ops server.
    pub bind_addr: String,
}

impl SyncConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from a flat key/value namespace.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let accounts = load_accounts(vars)?;
        let sync_flows = load_sync_flows(vars)?;

        let account_ids: HashSet<u32> = accounts.iter().map(|a| a.id).collect();
        for flow in &sync_flows {
            if !account_ids.contains(&flow.source_account_id) {
                return Err(ConfigError::UnknownAccount {
                    flow: flow.name.clone(),
                    role: "source",
                    account_id: flow.source_account_id,
                });
            }
            if !account_ids.contains(&flow.target_account_id) {
                return Err(ConfigError::UnknownAccount {
                    flow: flow.name.clone(),
                    role: "target",
                    account_id: flow.target_account_id,
                });
            }
        }

        let daily_sync_hour =
            parse_or_default(vars, "DAILY_SYNC_HOUR", DEFAULT_DAILY_SYNC_HOUR)?;
        if daily_sync_hour > 23 {
            return Err(ConfigError::InvalidValue {
                key: "DAILY_SYNC_HOUR".into(),
                message: "must be between 0 and 23".into(),
            });
        }

        let config = Self {
            accounts,
            sync_flows,
            daily_sync_hour,
            poll_days_back: parse_or_default(vars, "POLL_DAYS_BACK", DEFAULT_POLL_DAYS_BACK)?,
            poll_days_forward: parse_or_default(
                vars,
                "POLL_DAYS_FORWARD",
                DEFAULT_POLL_DAYS_FORWARD,
            )?,
            api_base_url: get(vars, "CALENDAR_API_BASE_URL").map(str::to_string),
            token_url: get(vars, "CALENDAR_TOKEN_URL").map(str::to_string),
            callback_url: get(vars, "WEBHOOK_CALLBACK_URL").map(str::to_string),
            bind_addr: get(vars, "BIND_ADDR")
                .unwrap_or(DEFAULT_BIND_ADDR)
                .to_string(),
        };

        tracing::info!(
            accounts = config.accounts.len(),
            sync_flows = config.sync_flows.len(),
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Look up an account by id.
    pub fn account(&self, account_id: u32) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == account_id)
    }

    /// Unique (account id, calendar id) pairs appearing as flow sources.
    pub fn source_calendars(&self) -> Vec<(u32, String)> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for flow in &self.sync_flows {
            let key = (flow.source_account_id, flow.source_calendar_id.clone());
            if seen.insert(key.clone()) {
                sources.push(key);
            }
        }
        sources
    }
}

fn load_accounts(vars: &HashMap<String, String>) -> Result<Vec<Account>, ConfigError> {
    let mut accounts = Vec::new();

    for n in 1..=MAX_INDEX {
        let name_key = format!("ACCOUNT_{n}_NAME");
        if get(vars, &name_key).is_none() {
            break;
        }

        let account = Account {
            id: n,
            name: require(vars, &name_key)?,
            client_id: require(vars, &format!("ACCOUNT_{n}_CLIENT_ID"))?,
            client_secret: require(vars, &format!("ACCOUNT_{n}_CLIENT_SECRET"))?,
            refresh_token: require(vars, &format!("ACCOUNT_{n}_REFRESH_TOKEN"))?,
        };

        tracing::info!(account_id = n, name = %account.name, "Loaded account");
        accounts.push(account);
    }

    if accounts.is_empty() {
        return Err(ConfigError::NoAccounts);
    }
    Ok(accounts)
}

fn load_sync_flows(vars: &HashMap<String, String>) -> Result<Vec<SyncFlow>, ConfigError> {
    let mut flows = Vec::new();

    for n in 1..=MAX_INDEX {
        let name_key = format!("SYNC_FLOW_{n}_NAME");
        if get(vars, &name_key).is_none() {
            break;
        }

        let start_offset_key = format!("SYNC_FLOW_{n}_START_OFFSET");
        let end_offset_key = format!("SYNC_FLOW_{n}_END_OFFSET");

        let flow = SyncFlow {
            name: require(vars, &name_key)?,
            source_account_id: require_parse(vars, &format!("SYNC_FLOW_{n}_SOURCE_ACCOUNT_ID"))?,
            source_calendar_id: require(vars, &format!("SYNC_FLOW_{n}_SOURCE_CALENDAR_ID"))?,
            target_account_id: require_parse(vars, &format!("SYNC_FLOW_{n}_TARGET_ACCOUNT_ID"))?,
            target_calendar_id: require(vars, &format!("SYNC_FLOW_{n}_TARGET_CALENDAR_ID"))?,
            start_offset: require_parse(vars, &start_offset_key)?,
            end_offset: require_parse(vars, &end_offset_key)?,
        };

        if flow.start_offset > 0 {
            return Err(ConfigError::InvalidValue {
                key: start_offset_key,
                message: "must be zero or negative (minutes before event start)".into(),
            });
        }
        if flow.end_offset < 0 {
            return Err(ConfigError::InvalidValue {
                key: end_offset_key,
                message: "must be zero or positive (minutes after event end)".into(),
            });
        }

        tracing::info!(flow = %flow.name, "Loaded sync flow");
        flows.push(flow);
    }

    if flows.is_empty() {
        return Err(ConfigError::NoFlows);
    }
    Ok(flows)
}

/// Trimmed, non-empty lookup.
fn get<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn require(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    get(vars, key)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
}

fn require_parse<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
) -> Result<T, ConfigError> {
    let raw = require(vars, key)?;
    raw.parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: raw,
    })
}

fn parse_or_default<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match get(vars, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
