//! Per-account client construction and caching.

use std::collections::HashMap;
use std::sync::Arc;

use calsync_calendar::{client, Calendar, CalendarClient, CalendarError, Credentials};
use calsync_core::SyncConfig;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Unknown account id {0}")]
    UnknownAccount(u32),

    /// Credential exchange for this account failed; other accounts are
    /// unaffected.
    #[error("Account {account_id} authentication failed: {source}")]
    Auth {
        account_id: u32,
        #[source]
        source: CalendarError,
    },

    /// A remote call for an already-authenticated account failed.
    #[error("Account {account_id} calendar request failed: {source}")]
    Calendar {
        account_id: u32,
        #[source]
        source: CalendarError,
    },
}

/// Hands out one authenticated `CalendarClient` per configured account.
///
/// Clients are built lazily and cached. The cache lock is held across
/// construction so two concurrent requests for the same account never
/// perform the token exchange twice.
pub struct AccountManager {
    config: Arc<SyncConfig>,
    clients: tokio::sync::Mutex<HashMap<u32, Arc<CalendarClient>>>,
}

impl AccountManager {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            config,
            clients: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Get or build the client for an account, verifying its credential on
    /// first use.
    pub async fn get_client(&self, account_id: u32) -> Result<Arc<CalendarClient>, AccountError> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(&account_id) {
            return Ok(Arc::clone(client));
        }

        let account = self
            .config
            .account(account_id)
            .ok_or(AccountError::UnknownAccount(account_id))?;

        let credentials = Credentials {
            client_id: account.client_id.clone(),
            client_secret: account.client_secret.clone(),
            refresh_token: account.refresh_token.clone(),
        };

        let client = CalendarClient::with_endpoints(
            account_id,
            credentials,
            self.config
                .api_base_url
                .as_deref()
                .unwrap_or(client::CALENDAR_API_BASE),
            self.config
                .token_url
                .as_deref()
                .unwrap_or(client::TOKEN_URL),
        );

        client
            .verify_credentials()
            .await
            .map_err(|source| AccountError::Auth { account_id, source })?;

        info!(account_id, name = %account.name, "Calendar client ready");

        let client = Arc::new(client);
        clients.insert(account_id, Arc::clone(&client));
        Ok(client)
    }

    /// Diagnostic passthrough: calendars visible to an account.
    pub async fn list_calendars(&self, account_id: u32) -> Result<Vec<Calendar>, AccountError> {
        let client = self.get_client(account_id).await?;
        client
            .list_calendars()
            .await
            .map_err(|source| AccountError::Calendar { account_id, source })
    }
}
