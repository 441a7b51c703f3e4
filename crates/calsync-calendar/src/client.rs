//! Calendar API client with refresh-token authentication.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::instrument;

use crate::error::CalendarError;
use crate::retry::{with_retry, RetryConfig};
use crate::types::*;

pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth2 client credentials plus a pre-obtained refresh token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// One authenticated client per account. Access tokens are exchanged
/// lazily from the refresh token and cached until a call is rejected.
pub struct CalendarClient {
    http: reqwest::Client,
    account_id: u32,
    credentials: Credentials,
    base_url: String,
    token_url: String,
    retry: RetryConfig,
    access_token: tokio::sync::Mutex<Option<String>>,
}

impl CalendarClient {
    pub fn new(account_id: u32, credentials: Credentials) -> Self {
        Self::with_endpoints(account_id, credentials, CALENDAR_API_BASE, TOKEN_URL)
    }

    /// Construct against non-default endpoints (config override, tests).
    pub fn with_endpoints(
        account_id: u32,
        credentials: Credentials,
        base_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_id,
            credentials,
            base_url: base_url.into(),
            token_url: token_url.into(),
            retry: RetryConfig::default(),
            access_token: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the retry policy (tests shorten the backoff).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn account_id(&self) -> u32 {
        self.account_id
    }

    /// Perform one token exchange to prove the stored credential works.
    pub async fn verify_credentials(&self) -> Result<(), CalendarError> {
        self.refresh_access_token().await.map(|_| ())
    }

    /// List all calendars visible to this account. Diagnostic only.
    #[instrument(skip(self), level = "info")]
    pub async fn list_calendars(&self) -> Result<Vec<Calendar>, CalendarError> {
        let url = format!("{}/users/me/calendarList", self.base_url);

        let response = self.send_authorized(|http| http.get(&url)).await?;
        let resp: CalendarListResponse = self.handle_response(response).await?;
        Ok(resp.items.into_iter().map(Calendar::from).collect())
    }

    /// List events in a calendar over a time range, fully materialized.
    /// Pagination is followed internally.
    #[instrument(skip(self), level = "info")]
    pub async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/calendars/{}/events?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime&maxResults=250",
                self.base_url,
                urlencoding::encode(calendar_id),
                urlencoding::encode(&time_min.to_rfc3339()),
                urlencoding::encode(&time_max.to_rfc3339()),
            );
            if let Some(pt) = &page_token {
                url.push_str(&format!("&pageToken={pt}"));
            }

            let response = self.send_authorized(|http| http.get(&url)).await?;
            let page: EventListResponse = self.handle_response(response).await?;

            events.extend(
                page.items
                    .into_iter()
                    .map(|api| Event::from_api(api, calendar_id, self.account_id)),
            );

            match page.next_page_token {
                Some(pt) => page_token = Some(pt),
                None => break,
            }
        }

        Ok(events)
    }

    /// Create an event. Date-only boundaries produce an all-day event.
    #[instrument(skip(self, start, end, description), level = "info")]
    pub async fn create_event(
        &self,
        calendar_id: &str,
        title: &str,
        start: &EventTime,
        end: &EventTime,
        description: Option<&str>,
    ) -> Result<Event, CalendarError> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id),
        );

        let mut body = serde_json::json!({
            "summary": title,
            "start": event_time_body(start),
            "end": event_time_body(end),
        });
        if let Some(desc) = description {
            body["description"] = serde_json::Value::String(desc.to_string());
        }

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        let api_event: ApiEvent = self.handle_response(response).await?;
        Ok(Event::from_api(api_event, calendar_id, self.account_id))
    }

    /// Delete an event by id.
    #[instrument(skip(self), level = "info")]
    pub async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url,
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id),
        );

        let response = self.send_authorized(|http| http.delete(&url)).await?;

        // Delete returns 204 No Content on success.
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Open a push-notification channel for a calendar.
    #[instrument(skip(self, callback_url), level = "info")]
    pub async fn watch(
        &self,
        calendar_id: &str,
        channel_id: &str,
        callback_url: &str,
    ) -> Result<Channel, CalendarError> {
        let url = format!(
            "{}/calendars/{}/events/watch",
            self.base_url,
            urlencoding::encode(calendar_id),
        );

        let body = serde_json::json!({
            "id": channel_id,
            "type": "web_hook",
            "address": callback_url,
        });

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        let api: ApiChannel = self.handle_response(response).await?;
        Ok(Channel::from(api))
    }

    /// Stop a push-notification channel. An already-expired channel is
    /// treated as stopped.
    #[instrument(skip(self), level = "info")]
    pub async fn stop_channel(
        &self,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), CalendarError> {
        let url = format!("{}/channels/stop", self.base_url);

        let body = serde_json::json!({
            "id": channel_id,
            "resourceId": resource_id,
        });

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == StatusCode::NOT_FOUND {
            tracing::warn!(channel_id, "Channel not found or already expired");
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Send a request with the cached token, retrying transient failures.
    /// One 401 triggers a single token refresh and one more try; the
    /// caller sees the second 401 as `TokenExpired`.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, CalendarError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let token = self.access_token().await?;
        let response =
            with_retry(&self.retry, || build(&self.http).bearer_auth(&token).send()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(account_id = self.account_id, "Access token rejected, refreshing");
        let token = self.refresh_access_token().await?;
        let response =
            with_retry(&self.retry, || build(&self.http).bearer_auth(&token).send()).await?;
        Ok(response)
    }

    async fn access_token(&self) -> Result<String, CalendarError> {
        if let Some(token) = self.access_token.lock().await.clone() {
            return Ok(token);
        }
        self.refresh_access_token().await
    }

    async fn refresh_access_token(&self) -> Result<String, CalendarError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CalendarError::AuthFailed(format!("{status}: {text}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::AuthFailed(format!("Malformed token response: {e}")))?;

        *self.access_token.lock().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CalendarError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CalendarError::ApiError(format!("JSON parse error: {e}")))
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Map a non-success response to the error taxonomy.
async fn error_from_response(response: reqwest::Response) -> CalendarError {
    let status = response.status();

    match status.as_u16() {
        401 => CalendarError::TokenExpired,
        403 => {
            let text = response.text().await.unwrap_or_default();
            CalendarError::PermissionDenied(text)
        }
        404 => {
            let text = response.text().await.unwrap_or_default();
            CalendarError::NotFound(text)
        }
        429 => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            CalendarError::RateLimited(retry_after)
        }
        _ => {
            let text = response.text().await.unwrap_or_default();
            CalendarError::ApiError(format!("{status}: {text}"))
        }
    }
}

fn event_time_body(time: &EventTime) -> serde_json::Value {
    match time {
        EventTime::DateTime(dt) => serde_json::json!({
            "dateTime": dt.to_rfc3339(),
            "timeZone": "UTC",
        }),
        EventTime::Date(d) => serde_json::json!({
            "date": d.format("%Y-%m-%d").to_string(),
        }),
    }
}
