//! Calendar API types and data structures.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Calendar event snapshot as fetched from the remote API. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub calendar_id: String,
    pub account_id: u32,
    pub title: String,
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
    pub attendees: Vec<Attendee>,
    pub participant_count: u32,
    pub status: EventStatus,
    pub transparency: Transparency,
    pub creator: Option<String>,
    pub organizer: Option<String>,
}

/// Event boundary - a specific instant or an all-day date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    /// The boundary as a UTC instant; all-day dates resolve to midnight.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap_or_default()),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }
}

/// Event status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

/// Whether the event blocks time (opaque) or not (transparent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    #[default]
    Opaque,
    Transparent,
}

/// Event attendee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub display_name: Option<String>,
    pub is_organizer: bool,
}

/// Calendar metadata, used by the diagnostic listing only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub summary: String,
    pub is_primary: bool,
    pub access_role: String,
}

/// An open push-notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub resource_id: String,
    pub expiration: Option<DateTime<Utc>>,
}

// API response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: Option<ApiEventTime>,
    pub end: Option<ApiEventTime>,
    #[serde(default)]
    pub attendees: Vec<ApiAttendee>,
    pub creator: Option<ApiPerson>,
    pub organizer: Option<ApiPerson>,
    pub status: Option<String>,
    pub transparency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttendee {
    pub email: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub organizer: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPerson {
    pub email: Option<String>,
}

/// One page of an event listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<ApiEvent>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListResponse {
    #[serde(default)]
    pub items: Vec<ApiCalendar>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCalendar {
    pub id: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
    pub access_role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiChannel {
    pub id: String,
    pub resource_id: String,
    /// Milliseconds since the epoch, serialized as a string by the API.
    pub expiration: Option<String>,
}

impl Event {
    /// Convert an API event into the domain snapshot.
    pub fn from_api(api: ApiEvent, calendar_id: &str, account_id: u32) -> Self {
        let (start, all_day) = api
            .start
            .map(|t| parse_event_time(&t))
            .unwrap_or((EventTime::DateTime(Utc::now()), false));

        let end = api
            .end
            .map(|t| parse_event_time(&t).0)
            .unwrap_or_else(|| start.clone());

        let status = match api.status.as_deref() {
            Some("tentative") => EventStatus::Tentative,
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        };

        let transparency = match api.transparency.as_deref() {
            Some("transparent") => Transparency::Transparent,
            _ => Transparency::Opaque,
        };

        let attendees: Vec<Attendee> = api
            .attendees
            .into_iter()
            .map(|a| Attendee {
                email: a.email,
                display_name: a.display_name,
                is_organizer: a.organizer,
            })
            .collect();

        let participant_count = attendees.len() as u32;

        Self {
            id: api.id,
            calendar_id: calendar_id.to_string(),
            account_id,
            title: api.summary.unwrap_or_default(),
            description: api.description,
            start,
            end,
            all_day,
            attendees,
            participant_count,
            status,
            transparency,
            creator: api.creator.and_then(|p| p.email),
            organizer: api.organizer.and_then(|p| p.email),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == EventStatus::Confirmed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    pub fn is_transparent(&self) -> bool {
        self.transparency == Transparency::Transparent
    }

    pub fn has_multiple_participants(&self) -> bool {
        self.participant_count >= 2
    }
}

impl From<ApiCalendar> for Calendar {
    fn from(api: ApiCalendar) -> Self {
        Self {
            id: api.id,
            summary: api.summary.unwrap_or_default(),
            is_primary: api.primary,
            access_role: api.access_role.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

impl From<ApiChannel> for Channel {
    fn from(api: ApiChannel) -> Self {
        let expiration = api
            .expiration
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Self {
            id: api.id,
            resource_id: api.resource_id,
            expiration,
        }
    }
}

fn parse_event_time(api: &ApiEventTime) -> (EventTime, bool) {
    if let Some(dt_str) = &api.date_time {
        if let Ok(dt) = DateTime::parse_from_rfc3339(dt_str) {
            return (EventTime::DateTime(dt.with_timezone(&Utc)), false);
        }
    }
    if let Some(date_str) = &api.date {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            return (EventTime::Date(date), true);
        }
    }
    (EventTime::DateTime(Utc::now()), false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_event_from_api() {
        let json = r#"{
            "id": "event123",
            "summary": "Team Meeting",
            "description": "Weekly sync",
            "start": {"dateTime": "2024-01-15T10:00:00Z"},
            "end": {"dateTime": "2024-01-15T11:00:00Z"},
            "status": "confirmed",
            "attendees": [
                {"email": "alice@example.com", "organizer": true},
                {"email": "bob@example.com"}
            ],
            "organizer": {"email": "alice@example.com"}
        }"#;

        let api_event: ApiEvent = serde_json::from_str(json).unwrap();
        let event = Event::from_api(api_event, "primary", 1);

        assert_eq!(event.id, "event123");
        assert_eq!(event.title, "Team Meeting");
        assert_eq!(event.account_id, 1);
        assert_eq!(event.participant_count, 2);
        assert!(event.has_multiple_participants());
        assert!(event.is_confirmed());
        assert_eq!(event.transparency, Transparency::Opaque);
        assert_eq!(event.organizer, Some("alice@example.com".to_string()));
        assert!(!event.all_day);
    }

    #[test]
    fn test_all_day_event() {
        let json = r#"{
            "id": "event456",
            "summary": "Offsite",
            "start": {"date": "2024-01-15"},
            "end": {"date": "2024-01-16"}
        }"#;

        let api_event: ApiEvent = serde_json::from_str(json).unwrap();
        let event = Event::from_api(api_event, "primary", 1);

        assert!(event.all_day);
        assert_eq!(
            event.start,
            EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        assert_eq!(
            event.end,
            EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap())
        );
    }

    #[test]
    fn test_transparent_and_cancelled_parsing() {
        let json = r#"{
            "id": "event789",
            "summary": "Focus time",
            "start": {"dateTime": "2024-01-15T09:00:00Z"},
            "end": {"dateTime": "2024-01-15T10:00:00Z"},
            "status": "cancelled",
            "transparency": "transparent"
        }"#;

        let api_event: ApiEvent = serde_json::from_str(json).unwrap();
        let event = Event::from_api(api_event, "primary", 2);

        assert!(event.is_cancelled());
        assert!(event.is_transparent());
        assert_eq!(event.participant_count, 0);
    }

    #[test]
    fn test_event_time_as_datetime() {
        let date = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        let dt = date.as_datetime();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T00:00:00+00:00");
        assert!(date.is_date());
    }

    #[test]
    fn test_channel_expiration_parsing() {
        let api = ApiChannel {
            id: "chan-1".into(),
            resource_id: "res-1".into(),
            expiration: Some("1705312800000".into()),
        };
        let channel = Channel::from(api);
        assert_eq!(
            channel.expiration.unwrap().to_rfc3339(),
            "2024-01-15T10:00:00+00:00"
        );
    }
}
