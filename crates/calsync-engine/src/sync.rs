//! Per-event decision procedure and batch reconciliation.

use std::sync::Arc;
use std::time::Instant;

use calsync_calendar::{CalendarError, Event};
use calsync_core::{SyncConfig, SyncFlow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::account::{AccountError, AccountManager};
use crate::busy::{self, BusyBlock, BUSY_TITLE};

/// Which delivery path handed an event to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Webhook,
    Polling,
}

/// What the engine did for one (event, flow) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Deleted,
    Existed,
    Skipped,
    Error,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

/// Outcome record for one (event, flow) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub flow: String,
    pub event_id: String,
    pub event_title: String,
    pub sync_type: SyncType,
    pub success: bool,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cumulative counters, readable as a snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub events_processed: u64,
    pub busy_blocks_created: u64,
    pub busy_blocks_deleted: u64,
    pub errors: u64,
    pub accounts: usize,
    pub sync_flows: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Outcome of reconciling one source calendar over a time range.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarSyncReport {
    pub account_id: u32,
    pub calendar_id: String,
    pub events_found: usize,
    pub busy_blocks_created: u64,
    pub busy_blocks_deleted: u64,
    pub errors: u64,
    pub duration_ms: u64,
    pub results: Vec<ProcessingResult>,
}

/// Aggregate outcome of a full sweep over every source calendar.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub sync_type: SyncType,
    pub calendars_synced: usize,
    pub calendars_failed: usize,
    pub events_found: usize,
    pub busy_blocks_created: u64,
    pub busy_blocks_deleted: u64,
    pub errors: u64,
    pub duration_ms: u64,
    pub reports: Vec<CalendarSyncReport>,
    pub failures: Vec<String>,
}

/// The reconciliation engine. Stateless apart from counters: every decision
/// is recomputed from the event and what the target calendar currently
/// contains.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    accounts: Arc<AccountManager>,
    stats: Mutex<EngineStats>,
}

impl SyncEngine {
    pub fn new(config: Arc<SyncConfig>, accounts: Arc<AccountManager>) -> Self {
        let stats = EngineStats {
            accounts: config.accounts.len(),
            sync_flows: config.sync_flows.len(),
            ..EngineStats::default()
        };
        Self {
            config,
            accounts,
            stats: Mutex::new(stats),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        let mut stats = self.stats.lock();
        stats.events_processed = 0;
        stats.busy_blocks_created = 0;
        stats.busy_blocks_deleted = 0;
        stats.errors = 0;
        stats.last_updated = Some(Utc::now());
    }

    /// Run the decision procedure for one event against every applicable
    /// flow. One result per flow; a remote failure in one flow is captured
    /// in its result and never stops the others.
    #[instrument(skip(self, event), fields(event_id = %event.id), level = "info")]
    pub async fn process_event(&self, event: &Event, sync_type: SyncType) -> Vec<ProcessingResult> {
        let flows: Vec<&SyncFlow> = self
            .config
            .sync_flows
            .iter()
            .filter(|f| {
                f.source_account_id == event.account_id
                    && f.source_calendar_id == event.calendar_id
            })
            .collect();

        let results = if flows.is_empty() {
            vec![skipped(
                "-",
                event,
                sync_type,
                "no applicable sync flow",
            )]
        } else {
            let mut results = Vec::with_capacity(flows.len());
            for flow in flows {
                let result = match self.process_for_flow(event, flow, sync_type).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(flow = %flow.name, error = %e, "Flow processing failed");
                        ProcessingResult {
                            flow: flow.name.clone(),
                            event_id: event.id.clone(),
                            event_title: event.title.clone(),
                            sync_type,
                            success: false,
                            action: Action::Error,
                            reason: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                results.push(result);
            }
            results
        };

        self.record(&results);
        results
    }

    async fn process_for_flow(
        &self,
        event: &Event,
        flow: &SyncFlow,
        sync_type: SyncType,
    ) -> Result<ProcessingResult, EngineError> {
        let block = BusyBlock::from_event_and_flow(event, flow);

        // Cancelled and transparent events must take existing blocks down,
        // not merely be ignored.
        if event.is_cancelled() || event.is_transparent() {
            return self.remove_busy_blocks(event, flow, &block, sync_type).await;
        }

        if !event.is_confirmed() {
            return Ok(skipped(&flow.name, event, sync_type, "event is tentative"));
        }

        if !event.has_multiple_participants() {
            return Ok(skipped(
                &flow.name,
                event,
                sync_type,
                "fewer than two participants",
            ));
        }

        let client = self.accounts.get_client(flow.target_account_id).await?;
        let (window_start, window_end) = block.search_window();
        let existing = client
            .list_events(&flow.target_calendar_id, window_start, window_end)
            .await?;

        if !busy::exact_matches(&block, &existing).is_empty() {
            return Ok(done(
                &flow.name,
                event,
                sync_type,
                Action::Existed,
                Some("busy block already present"),
            ));
        }

        if busy::is_covered(&block, &existing) {
            return Ok(done(
                &flow.name,
                event,
                sync_type,
                Action::Existed,
                Some("range covered by existing busy blocks"),
            ));
        }

        // The description is the only breadcrumb back to the source event.
        let description = format!("Busy block for: {}", event.title);
        client
            .create_event(
                &flow.target_calendar_id,
                BUSY_TITLE,
                &block.start,
                &block.end,
                Some(&description),
            )
            .await?;

        info!(
            flow = %flow.name,
            target = %flow.target_calendar_id,
            "Created busy block"
        );
        Ok(done(&flow.name, event, sync_type, Action::Created, None))
    }

    /// Deletion branch: remove every exact-range busy block in the target.
    async fn remove_busy_blocks(
        &self,
        event: &Event,
        flow: &SyncFlow,
        block: &BusyBlock,
        sync_type: SyncType,
    ) -> Result<ProcessingResult, EngineError> {
        let client = self.accounts.get_client(flow.target_account_id).await?;
        let (window_start, window_end) = block.search_window();
        let existing = client
            .list_events(&flow.target_calendar_id, window_start, window_end)
            .await?;

        let matches = busy::exact_matches(block, &existing);
        if matches.is_empty() {
            return Ok(skipped(
                &flow.name,
                event,
                sync_type,
                "no busy block to remove",
            ));
        }

        for matched in matches {
            match client
                .delete_event(&flow.target_calendar_id, &matched.id)
                .await
            {
                Ok(()) => {}
                // Someone else removed it first; the goal state holds.
                Err(CalendarError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            flow = %flow.name,
            target = %flow.target_calendar_id,
            "Removed busy block"
        );
        Ok(done(&flow.name, event, sync_type, Action::Deleted, None))
    }

    /// Reconcile every event in one source calendar over a time range.
    #[instrument(skip(self, start, end), level = "info")]
    pub async fn sync_calendar(
        &self,
        account_id: u32,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sync_type: SyncType,
    ) -> Result<CalendarSyncReport, EngineError> {
        let started = Instant::now();

        let client = self.accounts.get_client(account_id).await?;
        let events = client.list_events(calendar_id, start, end).await?;

        let mut report = CalendarSyncReport {
            account_id,
            calendar_id: calendar_id.to_string(),
            events_found: events.len(),
            busy_blocks_created: 0,
            busy_blocks_deleted: 0,
            errors: 0,
            duration_ms: 0,
            results: Vec::new(),
        };

        for event in &events {
            let results = self.process_event(event, sync_type).await;
            for result in &results {
                match result.action {
                    Action::Created => report.busy_blocks_created += 1,
                    Action::Deleted => report.busy_blocks_deleted += 1,
                    Action::Error => report.errors += 1,
                    _ => {}
                }
            }
            report.results.extend(results);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            account_id,
            calendar_id,
            events = report.events_found,
            created = report.busy_blocks_created,
            deleted = report.busy_blocks_deleted,
            errors = report.errors,
            "Calendar sync complete"
        );
        Ok(report)
    }

    /// Reconcile every distinct source calendar. A failing calendar is
    /// recorded and the sweep continues; this never returns an error.
    #[instrument(skip(self, start, end), level = "info")]
    pub async fn sync_all_sources(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sync_type: SyncType,
    ) -> SyncSummary {
        let started = Instant::now();

        let mut summary = SyncSummary {
            sync_type,
            calendars_synced: 0,
            calendars_failed: 0,
            events_found: 0,
            busy_blocks_created: 0,
            busy_blocks_deleted: 0,
            errors: 0,
            duration_ms: 0,
            reports: Vec::new(),
            failures: Vec::new(),
        };

        for (account_id, calendar_id) in self.config.source_calendars() {
            match self
                .sync_calendar(account_id, &calendar_id, start, end, sync_type)
                .await
            {
                Ok(report) => {
                    summary.calendars_synced += 1;
                    summary.events_found += report.events_found;
                    summary.busy_blocks_created += report.busy_blocks_created;
                    summary.busy_blocks_deleted += report.busy_blocks_deleted;
                    summary.errors += report.errors;
                    summary.reports.push(report);
                }
                Err(e) => {
                    warn!(account_id, %calendar_id, error = %e, "Calendar sync failed");
                    summary.calendars_failed += 1;
                    summary
                        .failures
                        .push(format!("account {account_id} calendar {calendar_id}: {e}"));
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary
    }

    fn record(&self, results: &[ProcessingResult]) {
        let mut stats = self.stats.lock();
        stats.events_processed += 1;
        for result in results {
            match result.action {
                Action::Created => stats.busy_blocks_created += 1,
                Action::Deleted => stats.busy_blocks_deleted += 1,
                Action::Error => stats.errors += 1,
                _ => {}
            }
        }
        stats.last_updated = Some(Utc::now());
    }
}

fn done(
    flow: &str,
    event: &Event,
    sync_type: SyncType,
    action: Action,
    reason: Option<&str>,
) -> ProcessingResult {
    ProcessingResult {
        flow: flow.to_string(),
        event_id: event.id.clone(),
        event_title: event.title.clone(),
        sync_type,
        success: true,
        action,
        reason: reason.map(str::to_string),
        error: None,
    }
}

fn skipped(flow: &str, event: &Event, sync_type: SyncType, reason: &str) -> ProcessingResult {
    done(flow, event, sync_type, Action::Skipped, Some(reason))
}
