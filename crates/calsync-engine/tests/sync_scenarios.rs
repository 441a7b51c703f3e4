//! End-to-end reconciliation scenarios against a mocked calendar API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use calsync_calendar::{Event, EventStatus, EventTime, Transparency};
use calsync_core::{Account, SyncConfig, SyncFlow};
use calsync_engine::{Action, AccountManager, PollingScheduler, SyncEngine, SyncType};
use chrono::{DateTime, Utc};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn account(id: u32, name: &str) -> Account {
    Account {
        id,
        name: name.into(),
        client_id: "client".into(),
        client_secret: "secret".into(),
        refresh_token: format!("refresh_{id}"),
    }
}

fn flow(name: &str, source_calendar: &str, target_calendar: &str) -> SyncFlow {
    SyncFlow {
        name: name.into(),
        source_account_id: 1,
        source_calendar_id: source_calendar.into(),
        target_account_id: 1,
        target_calendar_id: target_calendar.into(),
        start_offset: -15,
        end_offset: 15,
    }
}

fn engine_for(server: &MockServer, flows: Vec<SyncFlow>) -> Arc<SyncEngine> {
    let config = Arc::new(SyncConfig {
        accounts: vec![account(1, "Work")],
        sync_flows: flows,
        daily_sync_hour: 6,
        poll_days_back: 2,
        poll_days_forward: 14,
        api_base_url: Some(server.uri()),
        token_url: Some(format!("{}/token", server.uri())),
        callback_url: None,
        bind_addr: "127.0.0.1:0".into(),
    });
    let accounts = Arc::new(AccountManager::new(Arc::clone(&config)));
    Arc::new(SyncEngine::new(config, accounts))
}

async fn mock_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok1"
        })))
        .mount(server)
        .await;
}

fn instant(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn meeting(id: &str, calendar_id: &str, start: &str, end: &str) -> Event {
    Event {
        id: id.into(),
        calendar_id: calendar_id.into(),
        account_id: 1,
        title: "Team Meeting".into(),
        description: None,
        start: EventTime::DateTime(instant(start)),
        end: EventTime::DateTime(instant(end)),
        all_day: false,
        attendees: Vec::new(),
        participant_count: 2,
        status: EventStatus::Confirmed,
        transparency: Transparency::Opaque,
        creator: None,
        organizer: None,
    }
}

fn busy_item(id: &str, start: &str, end: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "summary": "Busy",
        "start": {"dateTime": start},
        "end": {"dateTime": end}
    })
}

#[tokio::test]
async fn test_second_pass_finds_the_block_it_created() {
    let server = MockServer::start().await;
    mock_token(&server).await;

    // First reconciliation sees an empty target.
    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Afterwards the created block is visible.
    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [busy_item("b1", "2024-01-15T09:45:00Z", "2024-01-15T11:15:00Z")]
        })))
        .mount(&server)
        .await;

    // Exactly one create, with the minute-truncated, offset-widened range.
    Mock::given(method("POST"))
        .and(path("/calendars/personal%40cal/events"))
        .and(body_partial_json(serde_json::json!({
            "summary": "Busy",
            "description": "Busy block for: Team Meeting",
            "start": {"dateTime": "2024-01-15T09:45:00+00:00"},
            "end": {"dateTime": "2024-01-15T11:15:00+00:00"}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(busy_item("b1", "2024-01-15T09:45:00Z", "2024-01-15T11:15:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![flow("w2p", "work@cal", "personal@cal")]);
    let event = meeting("e1", "work@cal", "2024-01-15T10:00:30Z", "2024-01-15T11:00:09Z");

    let first = engine.process_event(&event, SyncType::Webhook).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].action, Action::Created);

    let second = engine.process_event(&event, SyncType::Polling).await;
    assert_eq!(second[0].action, Action::Existed);

    let stats = engine.stats();
    assert_eq!(stats.events_processed, 2);
    assert_eq!(stats.busy_blocks_created, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn test_cancellation_removes_block_then_becomes_noop() {
    let server = MockServer::start().await;
    mock_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [busy_item("b1", "2024-01-15T09:45:00Z", "2024-01-15T11:15:00Z")]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/calendars/personal%40cal/events/b1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![flow("w2p", "work@cal", "personal@cal")]);
    let mut event = meeting("e1", "work@cal", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z");
    event.status = EventStatus::Cancelled;

    let first = engine.process_event(&event, SyncType::Webhook).await;
    assert_eq!(first[0].action, Action::Deleted);

    // A replayed cancellation finds nothing and degrades to a skip.
    let second = engine.process_event(&event, SyncType::Webhook).await;
    assert_eq!(second[0].action, Action::Skipped);
    assert_eq!(second[0].reason.as_deref(), Some("no busy block to remove"));

    assert_eq!(engine.stats().busy_blocks_deleted, 1);
}

#[tokio::test]
async fn test_transparent_event_takes_down_its_block() {
    let server = MockServer::start().await;
    mock_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [busy_item("b1", "2024-01-15T09:45:00Z", "2024-01-15T11:15:00Z")]
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/calendars/personal%40cal/events/b1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![flow("w2p", "work@cal", "personal@cal")]);
    let mut event = meeting("e1", "work@cal", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z");
    event.transparency = Transparency::Transparent;

    let results = engine.process_event(&event, SyncType::Polling).await;
    assert_eq!(results[0].action, Action::Deleted);
}

#[tokio::test]
async fn test_ineligible_events_never_touch_the_target() {
    let server = MockServer::start().await;
    // No mocks at all: any remote call would fail the test with an error
    // action instead of a skip.

    let engine = engine_for(&server, vec![flow("w2p", "work@cal", "personal@cal")]);

    let mut tentative = meeting("e1", "work@cal", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z");
    tentative.status = EventStatus::Tentative;
    let results = engine.process_event(&tentative, SyncType::Webhook).await;
    assert_eq!(results[0].action, Action::Skipped);
    assert_eq!(results[0].reason.as_deref(), Some("event is tentative"));

    let mut solo = meeting("e2", "work@cal", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z");
    solo.participant_count = 1;
    let results = engine.process_event(&solo, SyncType::Webhook).await;
    assert_eq!(results[0].action, Action::Skipped);
    assert_eq!(
        results[0].reason.as_deref(),
        Some("fewer than two participants")
    );

    let unmapped = meeting("e3", "other@cal", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z");
    let results = engine.process_event(&unmapped, SyncType::Webhook).await;
    assert_eq!(results[0].action, Action::Skipped);
    assert_eq!(
        results[0].reason.as_deref(),
        Some("no applicable sync flow")
    );
}

#[tokio::test]
async fn test_flow_failure_does_not_stop_siblings() {
    let server = MockServer::start().await;
    mock_token(&server).await;

    // First target rejects the listing outright.
    Mock::given(method("GET"))
        .and(path("/calendars/locked%40cal/events"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(busy_item("b1", "2024-01-15T09:45:00Z", "2024-01-15T11:15:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(
        &server,
        vec![
            flow("w2locked", "work@cal", "locked@cal"),
            flow("w2p", "work@cal", "personal@cal"),
        ],
    );
    let event = meeting("e1", "work@cal", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z");

    let results = engine.process_event(&event, SyncType::Webhook).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].action, Action::Error);
    assert!(results[0].error.as_deref().unwrap().contains("Permission denied"));
    assert_eq!(results[1].action, Action::Created);

    let stats = engine.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.busy_blocks_created, 1);
}

#[tokio::test]
async fn test_poll_run_aggregates_a_summary() {
    let server = MockServer::start().await;
    mock_token(&server).await;

    // Source calendar: one eligible meeting, one solo appointment.
    Mock::given(method("GET"))
        .and(path("/calendars/work%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {
                    "id": "e1",
                    "summary": "Team Meeting",
                    "start": {"dateTime": "2024-01-15T10:00:00Z"},
                    "end": {"dateTime": "2024-01-15T11:00:00Z"},
                    "attendees": [
                        {"email": "a@example.com", "organizer": true},
                        {"email": "b@example.com"}
                    ]
                },
                {
                    "id": "e2",
                    "summary": "Dentist",
                    "start": {"dateTime": "2024-01-15T14:00:00Z"},
                    "end": {"dateTime": "2024-01-15T15:00:00Z"}
                }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/calendars/personal%40cal/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(busy_item("b1", "2024-01-15T09:45:00Z", "2024-01-15T11:15:00Z")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![flow("w2p", "work@cal", "personal@cal")]);
    let scheduler = PollingScheduler::new(Arc::clone(&engine));

    let summary = scheduler.run(2, 14).await;
    assert_eq!(summary.sync_type, SyncType::Polling);
    assert_eq!(summary.calendars_synced, 1);
    assert_eq!(summary.calendars_failed, 0);
    assert_eq!(summary.events_found, 2);
    assert_eq!(summary.busy_blocks_created, 1);
    assert_eq!(summary.errors, 0);

    let run_stats = scheduler.run_stats();
    assert_eq!(run_stats.total_runs, 1);
    assert_eq!(run_stats.successful_runs, 1);
    assert!(run_stats.last_error.is_none());
}

#[tokio::test]
async fn test_failing_source_calendar_is_recorded_not_fatal() {
    let server = MockServer::start().await;
    mock_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/calendars/work%40cal/events"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/second%40cal/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .mount(&server)
        .await;

    let engine = engine_for(
        &server,
        vec![
            flow("w2p", "work@cal", "personal@cal"),
            flow("s2p", "second@cal", "personal@cal"),
        ],
    );
    let scheduler = PollingScheduler::new(Arc::clone(&engine));

    let summary = scheduler.run(2, 14).await;
    assert_eq!(summary.calendars_synced, 1);
    assert_eq!(summary.calendars_failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].contains("work@cal"));

    let run_stats = scheduler.run_stats();
    assert_eq!(run_stats.failed_runs, 1);
    assert!(run_stats.last_error.is_some());
}
