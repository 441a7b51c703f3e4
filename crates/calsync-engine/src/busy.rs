//! Busy-block computation and matching.
//!
//! A busy block has no foreign key to the event that caused it: its identity
//! is purely the time range plus the target calendar. The range is a
//! deterministic function of the source event's times and the flow's
//! offsets, so any later pass over the same event recomputes the same range
//! and finds the block again.

use calsync_calendar::{Event, EventTime};
use calsync_core::SyncFlow;
use chrono::{DateTime, Duration, Timelike, Utc};

/// Title given to every placeholder event. Matching is case-insensitive
/// because some calendar UIs re-capitalize titles.
pub const BUSY_TITLE: &str = "Busy";

/// A placeholder to be reconciled against one target calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct BusyBlock {
    pub target_account_id: u32,
    pub target_calendar_id: String,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
}

impl BusyBlock {
    /// Compute the busy range for an event under a flow.
    ///
    /// All-day events pass through unmodified in all-day form. Timed events
    /// get seconds truncated and the flow's signed minute offsets applied.
    pub fn from_event_and_flow(event: &Event, flow: &SyncFlow) -> Self {
        if event.all_day {
            return Self {
                target_account_id: flow.target_account_id,
                target_calendar_id: flow.target_calendar_id.clone(),
                start: event.start.clone(),
                end: event.end.clone(),
                all_day: true,
            };
        }

        let start = truncate_to_minute(event.start.as_datetime())
            + Duration::minutes(flow.start_offset);
        let end =
            truncate_to_minute(event.end.as_datetime()) + Duration::minutes(flow.end_offset);

        Self {
            target_account_id: flow.target_account_id,
            target_calendar_id: flow.target_calendar_id.clone(),
            start: EventTime::DateTime(start),
            end: EventTime::DateTime(end),
            all_day: false,
        }
    }

    /// Search window for reconciliation: the busy range widened by an hour
    /// on each side.
    pub fn search_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.start.as_datetime() - Duration::hours(1),
            self.end.as_datetime() + Duration::hours(1),
        )
    }
}

pub fn is_busy_title(title: &str) -> bool {
    title.eq_ignore_ascii_case(BUSY_TITLE)
}

/// Existing busy blocks whose range exactly equals the computed range.
pub fn exact_matches<'a>(block: &BusyBlock, candidates: &'a [Event]) -> Vec<&'a Event> {
    candidates
        .iter()
        .filter(|e| is_busy_title(&e.title) && ranges_equal(e, block))
        .collect()
}

/// Whether existing timed busy blocks fully cover the computed range.
/// All-day blocks never count as cover, and all-day ranges are never
/// tested for coverage.
pub fn is_covered(block: &BusyBlock, candidates: &[Event]) -> bool {
    if block.all_day {
        return false;
    }

    let start = block.start.as_datetime();
    let end = block.end.as_datetime();

    let mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = candidates
        .iter()
        .filter(|e| is_busy_title(&e.title) && !e.all_day)
        .map(|e| {
            (
                truncate_to_minute(e.start.as_datetime()),
                truncate_to_minute(e.end.as_datetime()),
            )
        })
        .filter(|(s, e)| s < e)
        .collect();
    intervals.sort();

    let mut cursor = start;
    for (s, e) in intervals {
        if s > cursor {
            break;
        }
        if e > cursor {
            cursor = e;
        }
        if cursor >= end {
            return true;
        }
    }
    cursor >= end
}

fn ranges_equal(event: &Event, block: &BusyBlock) -> bool {
    if event.all_day != block.all_day {
        return false;
    }
    if block.all_day {
        event.start == block.start && event.end == block.end
    } else {
        truncate_to_minute(event.start.as_datetime()) == block.start.as_datetime()
            && truncate_to_minute(event.end.as_datetime()) == block.end.as_datetime()
    }
}

fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}
