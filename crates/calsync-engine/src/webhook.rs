//! Push-notification handling.
//!
//! The provider's push protocol carries no event payload: a notification
//! only says "something changed in the calendar behind this channel". A
//! valid notification triggers a bounded re-fetch of that calendar which is
//! replayed through the engine. The channel registry is in-memory only, so
//! a restart requires re-subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use calsync_calendar::CalendarError;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::account::AccountManager;
use crate::sync::{EngineError, ProcessingResult, SyncEngine, SyncType};

pub const HEADER_CHANNEL_ID: &str = "x-goog-channel-id";
pub const HEADER_RESOURCE_ID: &str = "x-goog-resource-id";
pub const HEADER_RESOURCE_STATE: &str = "x-goog-resource-state";

/// Processing must finish well inside the provider's delivery timeout;
/// anything unfinished is left to the next poll.
const PROCESSING_BUDGET: Duration = Duration::from_secs(25);

/// How far the re-fetch reaches: start of yesterday to end of a week out.
const REFETCH_DAYS_FORWARD: i64 = 7;

#[derive(Debug, Error)]
pub enum WebhookValidationError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Unknown channel id: {0}")]
    UnknownChannel(String),
}

/// An active push subscription for one source calendar.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub channel_id: String,
    pub resource_id: String,
    pub account_id: u32,
    pub calendar_id: String,
    pub expiration: Option<DateTime<Utc>>,
}

/// A notification that passed validation.
#[derive(Debug, Clone)]
pub struct Notification {
    pub channel_id: String,
    pub resource_id: String,
    pub state: String,
}

pub struct WebhookHandler {
    engine: Arc<SyncEngine>,
    accounts: Arc<AccountManager>,
    channels: RwLock<HashMap<String, Subscription>>,
}

impl WebhookHandler {
    pub fn new(engine: Arc<SyncEngine>, accounts: Arc<AccountManager>) -> Self {
        Self {
            engine,
            accounts,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Check required headers and that the channel is one this process
    /// registered. Nothing that fails here ever reaches the engine.
    pub fn validate(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<Notification, WebhookValidationError> {
        let channel_id = require_header(headers, HEADER_CHANNEL_ID)?;
        let resource_id = require_header(headers, HEADER_RESOURCE_ID)?;
        let state = require_header(headers, HEADER_RESOURCE_STATE)?;

        if !self.channels.read().contains_key(channel_id) {
            return Err(WebhookValidationError::UnknownChannel(
                channel_id.to_string(),
            ));
        }

        Ok(Notification {
            channel_id: channel_id.to_string(),
            resource_id: resource_id.to_string(),
            state: state.to_string(),
        })
    }

    /// Act on a validated notification. The initial `sync` handshake is
    /// acknowledged without fetching; `exists`/`update` trigger a bounded
    /// re-fetch of the channel's calendar.
    #[instrument(skip(self, notification), fields(channel_id = %notification.channel_id), level = "info")]
    pub async fn handle_notification(&self, notification: &Notification) -> Vec<ProcessingResult> {
        if notification.state == "sync" {
            info!("Subscription handshake acknowledged");
            return Vec::new();
        }

        let subscription = match self.channels.read().get(&notification.channel_id) {
            Some(sub) => sub.clone(),
            None => return Vec::new(),
        };

        match tokio::time::timeout(PROCESSING_BUDGET, self.refetch_and_process(&subscription))
            .await
        {
            Ok(results) => results,
            Err(_) => {
                warn!("Processing budget exceeded; the next poll will reconcile");
                Vec::new()
            }
        }
    }

    async fn refetch_and_process(&self, subscription: &Subscription) -> Vec<ProcessingResult> {
        let now = Utc::now();
        let start = Utc.from_utc_datetime(
            &(now - ChronoDuration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default(),
        );
        let end = Utc.from_utc_datetime(
            &(now + ChronoDuration::days(REFETCH_DAYS_FORWARD))
                .date_naive()
                .and_hms_opt(23, 59, 59)
                .unwrap_or_default(),
        );

        let client = match self.accounts.get_client(subscription.account_id).await {
            Ok(client) => client,
            Err(e) => {
                warn!(account_id = subscription.account_id, error = %e, "Client unavailable");
                return Vec::new();
            }
        };

        let events = match client
            .list_events(&subscription.calendar_id, start, end)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(calendar_id = %subscription.calendar_id, error = %e, "Re-fetch failed");
                return Vec::new();
            }
        };

        info!(
            calendar_id = %subscription.calendar_id,
            events = events.len(),
            "Replaying re-fetched events"
        );

        let mut results = Vec::new();
        for event in &events {
            results.extend(self.engine.process_event(event, SyncType::Webhook).await);
        }
        results
    }

    /// Open a push channel for a source calendar and register it.
    #[instrument(skip(self, callback_url), level = "info")]
    pub async fn subscribe(
        &self,
        account_id: u32,
        calendar_id: &str,
        callback_url: &str,
    ) -> Result<Subscription, EngineError> {
        let client = self.accounts.get_client(account_id).await?;
        let channel_id = Uuid::new_v4().to_string();
        let channel = client.watch(calendar_id, &channel_id, callback_url).await?;

        let subscription = Subscription {
            channel_id: channel.id.clone(),
            resource_id: channel.resource_id,
            account_id,
            calendar_id: calendar_id.to_string(),
            expiration: channel.expiration,
        };

        info!(
            channel_id = %subscription.channel_id,
            expiration = ?subscription.expiration,
            "Subscribed to calendar notifications"
        );

        self.channels
            .write()
            .insert(subscription.channel_id.clone(), subscription.clone());
        Ok(subscription)
    }

    /// Stop a channel and drop it from the registry. Returns `false` when
    /// the channel was not registered.
    #[instrument(skip(self), level = "info")]
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<bool, EngineError> {
        let subscription = self.channels.write().remove(channel_id);
        let Some(subscription) = subscription else {
            return Ok(false);
        };

        let client = self.accounts.get_client(subscription.account_id).await?;
        match client
            .stop_channel(&subscription.channel_id, &subscription.resource_id)
            .await
        {
            Ok(()) | Err(CalendarError::NotFound(_)) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Active subscriptions, for diagnostics.
    pub fn channels(&self) -> Vec<Subscription> {
        self.channels.read().values().cloned().collect()
    }
}

fn require_header<'a>(
    headers: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, WebhookValidationError> {
    headers
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(WebhookValidationError::MissingHeader(name))
}
